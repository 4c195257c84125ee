//! Model lifecycle management for image serving
//!
//! This crate resolves a versioned artifact from the object store into a
//! verified local copy, deserializes it through a pluggable backend, and owns
//! the readiness state machine that gates access to the loaded model.

pub mod resolver;
pub mod metadata;
pub mod backend;
pub mod loader;
pub mod lifecycle;

#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;

// Re-export commonly used types
pub use resolver::{ArtifactResolver, ResolvedArtifact};
pub use backend::{softmax, BackendError, BackendFactory, BackendRegistry, Classifier, LinearClassifier};
pub use loader::{LoadedModel, ModelLoader};
pub use lifecycle::{LifecycleManager, ServingSnapshot};
