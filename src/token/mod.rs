//! Token Management
//!
//! Token acquisition, storage and refresh.
//!
//! This module provides:
//!
//! - **Token Store**: Process-lifetime token state per client identity
//! - **Token Acquirer**: Direct login with tolerant response decoding
//! - **Single-Flight Refresher**: At most one acquisition per identity at a time
//! - **Refresh Scheduler**: Jittered proactive refresh and health checks
//! - **Webhook Bridge**: Acquisition through an external workflow

pub mod acquirer;
pub mod decode;
pub mod refresher;
pub mod scheduler;
pub mod store;
pub mod webhook;

// Token Store
pub use store::{create_in_memory_token_store, InMemoryTokenStore, TokenStore};

// Token Acquirer
pub use acquirer::{
    create_login_acquirer, create_mock_acquirer, LoginTokenAcquirer, MockTokenAcquirer,
    TokenAcquirer,
};
pub use decode::{decode_login_response, decode_login_value, LoginPayload};

// Single-Flight Refresher
pub use refresher::SingleFlightRefresher;

// Refresh Scheduler
pub use scheduler::{
    compute_refresh_delay, EndpointHealthProbe, ExpiryHealthProbe, HealthProbe, JitterSource,
    NullJitter, ProactiveRefreshScheduler, RandomJitter,
};

// Webhook Bridge
pub use webhook::WebhookAuthBridge;
