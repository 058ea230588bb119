//! Session Auth Types
//!
//! Core type definitions shared across the access layer.

pub mod config;
pub mod request;
pub mod token;

pub use config::*;
pub use request::*;
pub use token::*;
