//! Token Types
//!
//! Credential material, client identities and the token validity window.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use std::time::Duration;

/// Login credentials for one upstream identity.
#[derive(Clone)]
pub struct Credentials {
    /// Account name sent to the login endpoint.
    pub username: String,
    /// Account password (secret).
    pub password: SecretString,
    /// Upstream base URL the credentials belong to.
    pub base_url: String,
}

impl Credentials {
    /// Create new credentials.
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: SecretString::new(password.into()),
            base_url: base_url.into(),
        }
    }

    /// Stable identity key for these credentials.
    pub fn identity(&self) -> ClientIdentity {
        ClientIdentity::from_credentials(self)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Stable key partitioning token state per upstream identity.
///
/// Derived as a SHA-256 digest over username, password and base URL, so the
/// same credentials always map to the same key without the key revealing them.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    /// Derive the identity for a credential set.
    pub fn from_credentials(credentials: &Credentials) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(credentials.username.as_bytes());
        hasher.update([0u8]);
        hasher.update(credentials.password.expose_secret().as_bytes());
        hasher.update([0u8]);
        hasher.update(credentials.base_url.trim_end_matches('/').as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Use an explicit key, e.g. for the webhook bridge's single external identity.
    pub fn named(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened form for logs.
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(12) {
            Some((end, _)) => &self.0[..end],
            None => &self.0,
        }
    }
}

impl std::fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.short())
    }
}

/// Current credential material and its validity window.
///
/// Replaced wholesale on every refresh; never partially mutated.
/// Invariant: `issued_at < refresh_at < expires_at`.
#[derive(Clone)]
pub struct TokenInfo {
    access_credential: SecretString,
    secondary_credential: SecretString,
    /// When the credential was obtained.
    pub issued_at: DateTime<Utc>,
    /// When the upstream stops accepting the credential.
    pub expires_at: DateTime<Utc>,
    /// When the credential should be replaced.
    pub refresh_at: DateTime<Utc>,
}

impl TokenInfo {
    /// Create a token valid for `lifetime` from `issued_at`.
    ///
    /// Lifetimes above [`MAX_TOKEN_LIFETIME`] are clamped. `refresh_at` is `expires_at - refresh_buffer`; when the buffer would not
    /// leave room after `issued_at` it is clamped to the lifetime midpoint.
    pub fn new(
        access_credential: impl Into<String>,
        secondary_credential: impl Into<String>,
        issued_at: DateTime<Utc>,
        lifetime: Duration,
        refresh_buffer: Duration,
    ) -> Self {
        let lifetime = to_chrono(lifetime).max(ChronoDuration::milliseconds(2));
        let buffer = to_chrono(refresh_buffer);
        let expires_at = issued_at
            .checked_add_signed(lifetime)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let refresh_at = if buffer > ChronoDuration::zero() && buffer < lifetime {
            expires_at - buffer
        } else if buffer.is_zero() {
            expires_at - ChronoDuration::milliseconds(1)
        } else {
            issued_at
                .checked_add_signed(lifetime / 2)
                .unwrap_or(expires_at)
        };

        Self {
            access_credential: SecretString::new(access_credential.into()),
            secondary_credential: SecretString::new(secondary_credential.into()),
            issued_at,
            expires_at,
            refresh_at,
        }
    }

    /// Create a token issued now.
    pub fn issued_now(
        access_credential: impl Into<String>,
        secondary_credential: impl Into<String>,
        lifetime: Duration,
        refresh_buffer: Duration,
    ) -> Self {
        Self::new(
            access_credential,
            secondary_credential,
            Utc::now(),
            lifetime,
            refresh_buffer,
        )
    }

    /// Primary bearer credential.
    pub fn access_credential(&self) -> &str {
        self.access_credential.expose_secret()
    }

    /// Secondary (API/security) credential.
    pub fn secondary_credential(&self) -> &str {
        self.secondary_credential.expose_secret()
    }

    /// Whether the refresh point has passed.
    pub fn needs_refresh(&self) -> bool {
        self.needs_refresh_at(Utc::now())
    }

    pub fn needs_refresh_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.refresh_at
    }

    /// Whether the credential has expired.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Time until `refresh_at`, zero once passed.
    pub fn time_until_refresh(&self) -> Duration {
        (self.refresh_at - Utc::now()).to_std().unwrap_or_default()
    }

    /// Time until `expires_at`, zero once passed.
    pub fn remaining_lifetime(&self) -> Duration {
        (self.expires_at - Utc::now()).to_std().unwrap_or_default()
    }

    /// Format the bearer Authorization header value.
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.access_credential.expose_secret())
    }
}

impl std::fmt::Debug for TokenInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenInfo")
            .field("access_credential", &"[REDACTED]")
            .field("secondary_credential", &"[REDACTED]")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("refresh_at", &self.refresh_at)
            .finish()
    }
}

/// Upper bound on any token lifetime, whatever the upstream reports.
pub const MAX_TOKEN_LIFETIME: Duration = Duration::from_secs(366 * 24 * 60 * 60);

fn to_chrono(duration: Duration) -> ChronoDuration {
    ChronoDuration::from_std(duration.min(MAX_TOKEN_LIFETIME))
        .unwrap_or_else(|_| ChronoDuration::days(366))
}
