//! Preprocessing and inference for image serving
//!
//! This crate validates uploads, turns them into model input tensors using the
//! transform versioned with the artifact, and applies the confidence threshold
//! policy to the model's output distribution.

pub mod preprocessing;
pub mod engine;

// Re-export commonly used types
pub use preprocessing::{normalize_media_type, DecodedImage, Preprocessor};
pub use engine::DecisionEngine;
