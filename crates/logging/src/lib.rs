//! Logging for image serving
//!
//! This crate installs the process-wide `tracing` subscriber: an `EnvFilter`
//! (`RUST_LOG` wins over the configured level), a stdout layer in pretty or
//! JSON form, and an optional daily-rotated JSON file layer.

pub mod subscriber;

// Re-export commonly used types
pub use subscriber::{build_filter, init, LogGuard};
