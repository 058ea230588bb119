//! Single-Flight Refresher
//!
//! Hands out valid tokens per identity while guaranteeing that concurrent
//! callers for the same identity share one upstream acquisition.
//!
//! The acquisition runs as its own task. Waiters hold a shared handle to its
//! result, so a waiter that gives up does not cancel the login for others,
//! and the in-flight marker is cleared by a drop guard on every exit path,
//! including panics.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

use crate::error::{AuthenticationError, SessionAuthError};
use crate::telemetry::{NoOpMetrics, SessionMetrics};
use crate::token::{TokenAcquirer, TokenStore};
use crate::types::{ClientIdentity, Credentials, TokenInfo};

type SharedAcquisition = Shared<BoxFuture<'static, Result<TokenInfo, SessionAuthError>>>;
type InFlightMap = Arc<Mutex<HashMap<ClientIdentity, SharedAcquisition>>>;

/// Removes the in-flight marker when the acquisition task ends.
struct InFlightGuard {
    in_flight: InFlightMap,
    identity: ClientIdentity,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.identity);
    }
}

enum Flight {
    Ready(TokenInfo),
    Pending(SharedAcquisition),
}

/// Single-flight token refresher.
pub struct SingleFlightRefresher {
    acquirer: Arc<dyn TokenAcquirer>,
    store: Arc<dyn TokenStore>,
    in_flight: InFlightMap,
    metrics: Arc<dyn SessionMetrics>,
}

impl SingleFlightRefresher {
    /// Create new refresher.
    pub fn new(acquirer: Arc<dyn TokenAcquirer>, store: Arc<dyn TokenStore>) -> Self {
        Self {
            acquirer,
            store,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            metrics: Arc::new(NoOpMetrics),
        }
    }

    /// Set the metrics sink.
    pub fn with_metrics(mut self, metrics: Arc<dyn SessionMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Return a token valid for use now, acquiring one if needed.
    ///
    /// A stored token is returned only while its refresh point lies ahead.
    pub async fn get_valid_token(
        &self,
        credentials: &Credentials,
    ) -> Result<TokenInfo, SessionAuthError> {
        match self.join_or_start(credentials, false) {
            Flight::Ready(token) => Ok(token),
            Flight::Pending(acquisition) => acquisition.await,
        }
    }

    /// Acquire a new token regardless of the stored one.
    ///
    /// Joins an acquisition already in flight instead of starting another.
    pub async fn force_refresh(
        &self,
        credentials: &Credentials,
    ) -> Result<TokenInfo, SessionAuthError> {
        match self.join_or_start(credentials, true) {
            Flight::Ready(token) => Ok(token),
            Flight::Pending(acquisition) => acquisition.await,
        }
    }

    /// Stored token for an identity, valid or not.
    pub fn current_token(&self, identity: &ClientIdentity) -> Option<TokenInfo> {
        self.store.get(identity)
    }

    /// Discard the stored token for an identity.
    pub fn invalidate(&self, identity: &ClientIdentity) -> bool {
        let removed = self.store.remove(identity);
        if removed {
            info!(identity = %identity, "token invalidated");
        }
        removed
    }

    /// Discard the stored token only if it is still `stale`.
    ///
    /// Concurrent requests that observed the same rejected token invalidate it
    /// once; a replacement stored in the meantime survives.
    pub fn invalidate_if_current(&self, identity: &ClientIdentity, stale: &TokenInfo) -> bool {
        let removed = self.store.remove_if(identity, &|current| {
            current.issued_at == stale.issued_at
                && current.access_credential() == stale.access_credential()
        });
        if removed {
            info!(identity = %identity, "token invalidated");
        }
        removed
    }

    /// Number of acquisitions currently in flight.
    pub fn in_flight_count(&self) -> usize {
        self.lock_in_flight().len()
    }

    fn lock_in_flight(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<ClientIdentity, SharedAcquisition>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn join_or_start(&self, credentials: &Credentials, force: bool) -> Flight {
        let identity = credentials.identity();
        let mut in_flight = self.lock_in_flight();

        if let Some(existing) = in_flight.get(&identity) {
            debug!(identity = %identity, "joining in-flight acquisition");
            return Flight::Pending(existing.clone());
        }

        // Checked under the in-flight lock: an acquisition stores its token
        // before clearing its marker, so a miss here means none has landed.
        if !force {
            if let Some(token) = self.store.get(&identity) {
                if !token.needs_refresh() {
                    return Flight::Ready(token);
                }
            }
        }

        let acquisition = self.spawn_acquisition(identity.clone(), credentials.clone());
        in_flight.insert(identity, acquisition.clone());
        Flight::Pending(acquisition)
    }

    fn spawn_acquisition(
        &self,
        identity: ClientIdentity,
        credentials: Credentials,
    ) -> SharedAcquisition {
        let acquirer = Arc::clone(&self.acquirer);
        let store = Arc::clone(&self.store);
        let metrics = Arc::clone(&self.metrics);
        let guard = InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
            identity: identity.clone(),
        };

        let task = tokio::spawn(async move {
            let _guard = guard;
            debug!(identity = %identity, "starting token acquisition");

            let result = acquirer
                .acquire(&credentials)
                .await
                .map_err(into_acquisition_error);

            match &result {
                Ok(token) => {
                    store.store(identity.clone(), token.clone());
                    metrics.record_token_acquisition(identity.short(), true);
                    info!(
                        identity = %identity,
                        expires_at = %token.expires_at,
                        "token acquired"
                    );
                }
                Err(error) => {
                    metrics.record_token_acquisition(identity.short(), false);
                    warn!(identity = %identity, error = %error, "token acquisition failed");
                }
            }

            result
        });

        async move {
            task.await.unwrap_or_else(|e| {
                Err(SessionAuthError::Authentication(AuthenticationError::Failed {
                    message: format!("token acquisition task aborted: {}", e),
                }))
            })
        }
        .boxed()
        .shared()
    }
}

/// Normalize acquisition faults to what every waiter sees.
///
/// Authentication, webhook and timeout errors keep their type; anything else
/// becomes `AuthenticationError::Failed`.
fn into_acquisition_error(error: SessionAuthError) -> SessionAuthError {
    match error {
        SessionAuthError::Authentication(_) | SessionAuthError::Webhook(_) => error,
        error if error.is_timeout() => error,
        other => SessionAuthError::Authentication(AuthenticationError::Failed {
            message: other.to_string(),
        }),
    }
}
