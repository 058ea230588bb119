//! Request Types
//!
//! Per-request options and normalized responses for the resilient client.

use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::Duration;

use crate::core::HttpMethod;
use crate::error::{ProtocolError, SessionAuthError};

/// Options for a single `ResilientClient::request` call.
#[derive(Clone, Debug)]
pub struct RequestOptions {
    /// HTTP method.
    pub method: HttpMethod,
    /// JSON request body.
    pub body: Option<serde_json::Value>,
    /// Extra request headers.
    pub headers: HashMap<String, String>,
    /// Whether the response may be served from / written to the cache.
    pub use_cache: bool,
    /// Cache TTL override.
    pub cache_ttl: Option<Duration>,
    /// Marks a POST as a pure read so it may be cached.
    pub read_only: bool,
    /// Timeout override for this call.
    pub timeout: Option<Duration>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: HttpMethod::Get,
            body: None,
            headers: HashMap::new(),
            use_cache: true,
            cache_ttl: None,
            read_only: false,
            timeout: None,
        }
    }
}

impl RequestOptions {
    /// GET with default options.
    pub fn get() -> Self {
        Self::default()
    }

    /// POST with a JSON body.
    pub fn post_json(body: serde_json::Value) -> Self {
        Self {
            method: HttpMethod::Post,
            body: Some(body),
            ..Default::default()
        }
    }

    /// Disable caching for this call.
    pub fn no_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    /// Set the cache TTL for this call.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Mark this call as a pure read.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Add a request header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Set the timeout for this call.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Whether this call may touch the cache.
    pub fn is_cacheable(&self) -> bool {
        self.use_cache && (!self.method.is_mutating() || self.read_only)
    }

    /// Serialized body, empty when absent.
    pub fn body_string(&self) -> String {
        self.body
            .as_ref()
            .map(|b| b.to_string())
            .unwrap_or_default()
    }
}

/// Normalized upstream response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers (lowercase names).
    pub headers: HashMap<String, String>,
    /// Response body.
    pub body: String,
    /// Whether this response was served from the cache.
    pub from_cache: bool,
}

impl ApiResponse {
    /// Deserialize the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, SessionAuthError> {
        serde_json::from_str(&self.body).map_err(|e| {
            SessionAuthError::Protocol(ProtocolError::InvalidJson {
                message: e.to_string(),
            })
        })
    }
}
