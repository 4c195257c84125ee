//! Common utilities and types for image serving
//!
//! This crate provides shared functionality used across the serving workspace,
//! including the error taxonomy, the serving data model, and utility functions.

pub mod error;
pub mod models;
pub mod utils;

// Re-export commonly used types
pub use error::{ErrorCode, ErrorKind, Result, ServingError};
pub use models::*;
