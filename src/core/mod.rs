//! Core Infrastructure
//!
//! Transport and response classification shared by every component.

pub mod invalidation;
pub mod transport;

pub use invalidation::*;
pub use transport::*;
