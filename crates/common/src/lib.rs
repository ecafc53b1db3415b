//! Duocast Common Utilities
//!
//! Shared infrastructure for all Duocast crates:
//! - Error taxonomy and result aliases
//! - Recording clock, elapsed-time accounting, and drift measurement
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
