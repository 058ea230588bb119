//! Webhook Auth Bridge
//!
//! Acquisition through an external workflow: trigger it, then poll a local
//! endpoint until a freshly written credential appears.
//!
//! The bridge keeps no token of its own. Every [`WebhookAuthBridge::get_valid_token`]
//! call performs a full trigger-and-poll round trip; callers that need low
//! latency should wire it behind a [`SingleFlightRefresher`](crate::token::SingleFlightRefresher)
//! or use direct login instead.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::core::{HttpMethod, HttpRequest, HttpTransport};
use crate::error::{create_error_from_response, SessionAuthError, WebhookError};
use crate::token::decode::{decode_login_value, normalize_shape};
use crate::token::TokenAcquirer;
use crate::types::{Credentials, RefreshConfig, TokenInfo, WebhookConfig};

/// Field spellings for the credential issue time.
const AUTH_TIME_FIELDS: &[&str] = &["authTime", "auth_time", "issuedAt", "issued_at"];

/// Field spellings for the endpoint's computed validity flag.
const VALID_FLAG_FIELDS: &[&str] = &["isValid", "is_valid", "valid"];

/// Epoch values above this are milliseconds.
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// Webhook-driven token acquisition.
pub struct WebhookAuthBridge {
    transport: Arc<dyn HttpTransport>,
    config: WebhookConfig,
    refresh: RefreshConfig,
}

impl WebhookAuthBridge {
    /// Create new bridge.
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        config: WebhookConfig,
        refresh: RefreshConfig,
    ) -> Self {
        Self {
            transport,
            config,
            refresh,
        }
    }

    pub fn config(&self) -> &WebhookConfig {
        &self.config
    }

    /// Trigger the workflow and poll until a fresh credential is available.
    ///
    /// The trigger is fire-and-forget: a failed acknowledgement is logged and
    /// polling runs regardless, since the workflow may still have written a
    /// credential.
    ///
    /// # Errors
    ///
    /// `WebhookError::Timeout` when no fresh credential appears on any cycle.
    pub async fn get_valid_token(&self) -> Result<TokenInfo, SessionAuthError> {
        let started = Instant::now();
        let attempts = self.config.max_retries.max(1);

        for attempt in 1..=attempts {
            match self.trigger().await {
                Ok(status) => debug!(attempt, status, "webhook triggered, polling for credential"),
                Err(error) => warn!(
                    attempt,
                    error = %error,
                    "webhook trigger not acknowledged, polling anyway"
                ),
            }

            if let Some(token) = self.poll_until_fresh().await {
                info!(
                    attempt,
                    waited_ms = started.elapsed().as_millis() as u64,
                    "webhook credential received"
                );
                return Ok(token);
            }
            warn!(attempt, "no fresh credential within polling bound");

            if attempt < attempts {
                tokio::time::sleep(self.config.retry_delay).await;
            }
        }

        Err(SessionAuthError::Webhook(WebhookError::Timeout {
            attempts,
            waited: started.elapsed(),
        }))
    }

    /// Fire the trigger. Only receipt matters; the body is ignored.
    async fn trigger(&self) -> Result<u16, SessionAuthError> {
        let request = HttpRequest::new(HttpMethod::Post, self.config.trigger_url.clone())
            .with_timeout(self.config.request_timeout);
        let response = self.transport.send(request).await?;

        if response.status >= 400 {
            return Err(create_error_from_response(response.status, &response.body));
        }
        Ok(response.status)
    }

    /// Poll at `poll_interval` until `max_wait` elapses.
    async fn poll_until_fresh(&self) -> Option<TokenInfo> {
        let deadline = Instant::now() + self.config.max_wait;

        loop {
            match self.poll_once().await {
                Ok(Some(token)) => return Some(token),
                Ok(None) => debug!("credential not yet available"),
                Err(error) => debug!(error = %error, "poll failed"),
            }

            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            tokio::time::sleep_until((now + self.config.poll_interval).min(deadline)).await;
        }
    }

    async fn poll_once(&self) -> Result<Option<TokenInfo>, SessionAuthError> {
        let request = HttpRequest::new(HttpMethod::Get, self.config.poll_url.clone())
            .with_timeout(self.config.request_timeout);
        let response = self.transport.send(request).await?;

        if response.status == 404 || response.status == 204 || !response.is_success() {
            return Ok(None);
        }

        let value: Value = match serde_json::from_str(&response.body) {
            Ok(value) => value,
            Err(_) => return Ok(None),
        };
        Ok(self.fresh_token(&value, Utc::now()))
    }

    /// Token from a poll payload when it is present, valid and recent.
    fn fresh_token(&self, value: &Value, now: DateTime<Utc>) -> Option<TokenInfo> {
        let object = normalize_shape(value)?;

        if let Some(false) = first_bool(object, VALID_FLAG_FIELDS) {
            return None;
        }

        let auth_time = first_timestamp(object, AUTH_TIME_FIELDS)?;
        let window = ChronoDuration::from_std(self.config.freshness_window)
            .unwrap_or_else(|_| ChronoDuration::days(1));
        let age = now.signed_duration_since(auth_time);
        if age > window {
            debug!(age_secs = age.num_seconds(), "stored credential is stale");
            return None;
        }
        // Clock skew up to one window is tolerated; beyond that the timestamp is bogus.
        if age < -window {
            warn!(auth_time = %auth_time, "stored credential claims a future issue time");
            return None;
        }

        let payload = decode_login_value(value).ok()?;
        let lifetime = payload.lifetime.unwrap_or(self.refresh.assumed_lifetime);

        Some(TokenInfo::new(
            payload.access_credential,
            payload.secondary_credential,
            auth_time,
            lifetime,
            self.refresh.refresh_buffer,
        ))
    }
}

#[async_trait]
impl TokenAcquirer for WebhookAuthBridge {
    /// The external workflow owns the credentials; the argument only keys the caller.
    async fn acquire(&self, _credentials: &Credentials) -> Result<TokenInfo, SessionAuthError> {
        self.get_valid_token().await
    }
}

fn first_bool(object: &Map<String, Value>, fields: &[&str]) -> Option<bool> {
    fields
        .iter()
        .filter_map(|field| object.get(*field))
        .find_map(Value::as_bool)
}

/// RFC 3339 string, or epoch seconds / milliseconds.
fn first_timestamp(object: &Map<String, Value>, fields: &[&str]) -> Option<DateTime<Utc>> {
    fields
        .iter()
        .filter_map(|field| object.get(*field))
        .find_map(|value| match value {
            Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
                .ok()
                .map(|t| t.with_timezone(&Utc))
                .or_else(|| s.trim().parse::<i64>().ok().and_then(from_epoch)),
            Value::Number(n) => n.as_i64().and_then(from_epoch),
            _ => None,
        })
}

fn from_epoch(value: i64) -> Option<DateTime<Utc>> {
    if value > EPOCH_MILLIS_THRESHOLD {
        Utc.timestamp_millis_opt(value).single()
    } else {
        Utc.timestamp_opt(value, 0).single()
    }
}
