//! Login Response Decoding
//!
//! Tolerant translation of upstream login payloads into [`LoginPayload`].
//!
//! The upstream is not contractually stable: a response may be an object, a
//! one-element array, or an object wrapped in `data`, and the credential
//! fields appear under several spellings. Everything past this boundary only
//! sees the normalized type.

use serde_json::{Map, Value};
use std::time::Duration;

use crate::error::{AuthenticationError, SessionAuthError};
use crate::types::{RefreshConfig, TokenInfo};

/// Field spellings for the primary bearer credential, in priority order.
pub const ACCESS_CREDENTIAL_FIELDS: &[&str] = &[
    "bearerToken",
    "bearer_token",
    "accessToken",
    "access_token",
    "token",
];

/// Field spellings for the secondary credential, in priority order.
pub const SECONDARY_CREDENTIAL_FIELDS: &[&str] = &[
    "apiToken",
    "api_token",
    "securityToken",
    "security_token",
    "apiKey",
];

/// Field spellings for an explicit lifetime in seconds.
pub const LIFETIME_FIELDS: &[&str] = &["expiresIn", "expires_in"];

/// Normalized login result.
#[derive(Clone)]
pub struct LoginPayload {
    pub access_credential: String,
    pub secondary_credential: String,
    /// Lifetime reported by the upstream, if any.
    pub lifetime: Option<Duration>,
}

impl LoginPayload {
    /// Build a token issued now, using the assumed lifetime when none was reported.
    pub fn into_token(self, refresh: &RefreshConfig) -> TokenInfo {
        TokenInfo::issued_now(
            self.access_credential,
            self.secondary_credential,
            self.lifetime.unwrap_or(refresh.assumed_lifetime),
            refresh.refresh_buffer,
        )
    }
}

impl std::fmt::Debug for LoginPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginPayload")
            .field("access_credential", &"[REDACTED]")
            .field("secondary_credential", &"[REDACTED]")
            .field("lifetime", &self.lifetime)
            .finish()
    }
}

/// Decode a raw login response body.
pub fn decode_login_response(body: &str) -> Result<LoginPayload, SessionAuthError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| shape_error(format!("login response is not JSON: {}", e)))?;
    decode_login_value(&value)
}

/// Decode an already-parsed login response.
pub fn decode_login_value(value: &Value) -> Result<LoginPayload, SessionAuthError> {
    let object = normalize_shape(value)
        .ok_or_else(|| shape_error("expected an object or a one-element array"))?;

    let access_credential = first_string(object, ACCESS_CREDENTIAL_FIELDS)
        .ok_or_else(|| shape_error("no access credential field"))?;
    let secondary_credential = first_string(object, SECONDARY_CREDENTIAL_FIELDS)
        .ok_or_else(|| shape_error("no secondary credential field"))?;

    Ok(LoginPayload {
        access_credential,
        secondary_credential,
        lifetime: first_seconds(object, LIFETIME_FIELDS),
    })
}

/// Select the object carrying credential fields.
pub(crate) fn normalize_shape(value: &Value) -> Option<&Map<String, Value>> {
    let object = match value {
        Value::Object(object) => object,
        Value::Array(items) => items.first()?.as_object()?,
        _ => return None,
    };

    match object.get("data") {
        Some(Value::Object(inner)) if !has_any(object, ACCESS_CREDENTIAL_FIELDS) => Some(inner),
        Some(Value::Array(items)) if !has_any(object, ACCESS_CREDENTIAL_FIELDS) => {
            items.first()?.as_object()
        }
        _ => Some(object),
    }
}

fn has_any(object: &Map<String, Value>, fields: &[&str]) -> bool {
    fields.iter().any(|field| object.contains_key(*field))
}

pub(crate) fn first_string(object: &Map<String, Value>, fields: &[&str]) -> Option<String> {
    fields
        .iter()
        .filter_map(|field| object.get(*field))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

fn first_seconds(object: &Map<String, Value>, fields: &[&str]) -> Option<Duration> {
    fields
        .iter()
        .filter_map(|field| object.get(*field))
        .find_map(|value| match value {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse::<u64>().ok(),
            _ => None,
        })
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}

fn shape_error(message: impl Into<String>) -> SessionAuthError {
    SessionAuthError::Authentication(AuthenticationError::InvalidResponseShape {
        message: message.into(),
    })
}
