//! Builders
//!
//! Fluent builder for the access-layer configuration.

pub mod config;

pub use config::{session_auth_config, SessionAuthConfigBuilder};
