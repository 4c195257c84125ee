//! Inference backends
//!
//! A backend turns artifact bytes into a [`Classifier`]. Backends are looked up
//! by the `architecture` field of the metadata sidecar, so new model families
//! are added by registering a [`BackendFactory`] without touching the loader.

use std::collections::HashMap;
use std::sync::Arc;
use ndarray::{Array1, Array2, ArrayView3};
use serde::Deserialize;
use thiserror::Error;

use common::{ArtifactMetadata, Result, ServingError};

/// Faults raised during a forward pass
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("Input shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch { expected: Vec<usize>, actual: Vec<usize> },

    #[error("Backend fault: {0}")]
    Fault(String),
}

impl From<BackendError> for ServingError {
    fn from(err: BackendError) -> Self {
        ServingError::Inference(err.to_string())
    }
}

/// A loaded classifier
pub trait Classifier: Send + Sync {
    /// Backend name, for logs and the model endpoint
    fn name(&self) -> &str;

    /// Number of output classes
    fn num_classes(&self) -> usize;

    /// Computes raw class scores for one `[3, H, W]` input
    fn forward(&self, input: ArrayView3<'_, f32>) -> std::result::Result<Vec<f32>, BackendError>;

    /// Maps raw scores to a probability distribution
    fn normalize(&self, logits: &[f32]) -> Vec<f32> {
        softmax(logits)
    }
}

/// Numerically stable softmax
///
/// Non-finite inputs propagate into the output so that callers can detect them.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Builds classifiers of one architecture
pub trait BackendFactory: Send + Sync {
    /// Architecture name matched against the metadata sidecar
    fn architecture(&self) -> &str;

    /// Deserializes an artifact
    fn deserialize(&self, bytes: &[u8], metadata: &ArtifactMetadata) -> Result<Arc<dyn Classifier>>;
}

/// Backends keyed by architecture
pub struct BackendRegistry {
    factories: HashMap<String, Arc<dyn BackendFactory>>,
}

impl BackendRegistry {
    /// Creates an empty registry
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Creates a registry with the built-in backends
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(LinearBackend));
        registry
    }

    /// Registers a backend, replacing any with the same architecture
    pub fn register(&mut self, factory: Arc<dyn BackendFactory>) {
        self.factories.insert(factory.architecture().to_string(), factory);
    }

    /// Looks up the backend for `architecture`
    pub fn get(&self, architecture: &str) -> Result<Arc<dyn BackendFactory>> {
        self.factories.get(architecture).cloned().ok_or_else(|| {
            ServingError::ModelLoad(format!(
                "No backend for architecture '{}' (known: {})",
                architecture,
                self.architectures().join(", ")
            ))
        })
    }

    /// Registered architecture names, sorted
    pub fn architectures(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Serialized form of a linear artifact
#[derive(Debug, Deserialize)]
struct LinearArtifact {
    weights: Vec<Vec<f32>>,
    bias: Vec<f32>,
}

struct LinearBackend;

impl BackendFactory for LinearBackend {
    fn architecture(&self) -> &str {
        "linear"
    }

    fn deserialize(&self, bytes: &[u8], metadata: &ArtifactMetadata) -> Result<Arc<dyn Classifier>> {
        let artifact: LinearArtifact = serde_json::from_slice(bytes)
            .map_err(|e| ServingError::ModelLoad(format!("Invalid linear artifact: {}", e)))?;
        let classifier = LinearClassifier::new(
            artifact.weights,
            artifact.bias,
            metadata.transform.input_shape(),
        )?;

        if classifier.num_classes() != metadata.num_classes {
            return Err(ServingError::ModelLoad(format!(
                "Artifact has {} outputs but metadata declares {} classes",
                classifier.num_classes(),
                metadata.num_classes
            )));
        }
        Ok(Arc::new(classifier))
    }
}

/// Dense layer over the flattened input tensor
#[derive(Debug, Clone)]
pub struct LinearClassifier {
    /// `[classes, 3 * H * W]`
    weights: Array2<f32>,
    bias: Array1<f32>,
    input_shape: [usize; 3],
}

impl LinearClassifier {
    /// Builds a classifier, checking every weight row against `input_shape`
    pub fn new(weights: Vec<Vec<f32>>, bias: Vec<f32>, input_shape: [usize; 3]) -> Result<Self> {
        let features: usize = input_shape.iter().product();
        let classes = weights.len();

        if classes == 0 || bias.len() != classes {
            return Err(ServingError::ModelLoad(format!(
                "Linear artifact has {} weight rows and {} biases",
                classes,
                bias.len()
            )));
        }
        if let Some((row, w)) = weights.iter().enumerate().find(|(_, w)| w.len() != features) {
            return Err(ServingError::ModelLoad(format!(
                "Weight row {} has {} values, input {:?} needs {}",
                row,
                w.len(),
                input_shape,
                features
            )));
        }

        let flat: Vec<f32> = weights.into_iter().flatten().collect();
        let weights = Array2::from_shape_vec((classes, features), flat)
            .map_err(|e| ServingError::ModelLoad(format!("Invalid weight matrix: {}", e)))?;

        Ok(Self {
            weights,
            bias: Array1::from(bias),
            input_shape,
        })
    }
}

impl Classifier for LinearClassifier {
    fn name(&self) -> &str {
        "linear"
    }

    fn num_classes(&self) -> usize {
        self.bias.len()
    }

    fn forward(&self, input: ArrayView3<'_, f32>) -> std::result::Result<Vec<f32>, BackendError> {
        if input.shape() != &self.input_shape[..] {
            return Err(BackendError::ShapeMismatch {
                expected: self.input_shape.to_vec(),
                actual: input.shape().to_vec(),
            });
        }

        let x: Array1<f32> = input.iter().copied().collect();
        let logits = self.weights.dot(&x) + &self.bias;
        Ok(logits.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_softmax_is_stable() {
        let probs = softmax(&[1000.0, 1000.0]);
        assert!((probs[0] - 0.5).abs() < 1e-6);
        assert!((probs.iter().sum::<f32>() - 1.0).abs() < 1e-6);

        let probs = softmax(&[0.0, (3.0f32).ln()]);
        assert!((probs[1] - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_softmax_propagates_nan() {
        assert!(softmax(&[f32::NAN, 1.0]).iter().any(|p| p.is_nan()));
    }

    #[test]
    fn test_linear_forward() {
        // Class 0 reads channel 0, class 1 reads channel 2.
        let mut w0 = vec![0.0; 12];
        let mut w1 = vec![0.0; 12];
        w0[..4].iter_mut().for_each(|w| *w = 1.0);
        w1[8..].iter_mut().for_each(|w| *w = 1.0);
        let classifier = LinearClassifier::new(vec![w0, w1], vec![0.5, 0.0], [3, 2, 2]).unwrap();

        let mut input = Array3::<f32>::zeros((3, 2, 2));
        input.slice_mut(ndarray::s![2, .., ..]).fill(1.0);

        let logits = classifier.forward(input.view()).unwrap();
        assert_eq!(logits, vec![0.5, 4.0]);
    }

    #[test]
    fn test_linear_rejects_wrong_input_shape() {
        let classifier = LinearClassifier::new(vec![vec![0.0; 12]; 2], vec![0.0; 2], [3, 2, 2]).unwrap();
        let input = Array3::<f32>::zeros((3, 4, 4));
        let err = classifier.forward(input.view()).unwrap_err();
        assert!(matches!(err, BackendError::ShapeMismatch { .. }));
        assert!(matches!(ServingError::from(err), ServingError::Inference(_)));
    }

    #[test]
    fn test_linear_rejects_inconsistent_artifact() {
        assert!(LinearClassifier::new(vec![vec![0.0; 12]; 2], vec![0.0; 3], [3, 2, 2]).is_err());
        assert!(LinearClassifier::new(vec![vec![0.0; 11], vec![0.0; 12]], vec![0.0; 2], [3, 2, 2]).is_err());
        assert!(LinearClassifier::new(vec![], vec![], [3, 2, 2]).is_err());
    }

    #[test]
    fn test_registry_lookup() {
        let registry = BackendRegistry::default();
        assert_eq!(registry.architectures(), vec!["linear"]);
        assert!(registry.get("linear").is_ok());
        assert!(matches!(registry.get("resnet50"), Err(ServingError::ModelLoad(_))));
    }
}
