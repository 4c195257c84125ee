//! Configuration management for image serving
//!
//! This crate provides the typed configuration surface of the server, layered
//! from built-in defaults, an optional TOML file and `IMGSERVE_*` environment
//! variables.

pub mod schema;
pub mod sources;
pub mod validation;

// Re-export commonly used types
pub use schema::{
    LogFormat, LoggingConfig, ModelSection, PolicyConfig, ServerConfig, ServingConfig,
    StoreConfig, StoreKind, TimeoutConfig,
};
pub use sources::{load, load_from_str, ENV_PREFIX};
