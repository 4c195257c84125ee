//! Small models and seeded stores for tests
//!
//! Enabled for this crate's own tests and, through the `fixtures` feature, for
//! dependent crates' dev builds.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use serde_json::json;

use common::{ArtifactMetadata, ModelReference, ResizeFilter, TransformSpec};
use storage_adapter::{MemoryStore, ObjectStore, StorageError, StoredObject};

use crate::backend::LinearClassifier;
use crate::loader::LoadedModel;

/// EuroSAT land-use classes, Forest first
pub const EUROSAT_LABELS: [&str; 10] = [
    "Forest",
    "River",
    "AnnualCrop",
    "HerbaceousVegetation",
    "Highway",
    "Industrial",
    "Pasture",
    "PermanentCrop",
    "Residential",
    "SeaLake",
];

/// Labels of the channel-mean model, one per RGB channel
pub const CHANNEL_LABELS: [&str; 3] = ["Red", "Green", "Blue"];

/// Transform mapping [0, 1] pixel values onto [-1, 1]
pub fn transform(height: u32, width: u32) -> TransformSpec {
    TransformSpec {
        height,
        width,
        mean: [0.5, 0.5, 0.5],
        std: [0.5, 0.5, 0.5],
        resize_filter: ResizeFilter::Bilinear,
    }
}

pub fn metadata_for(reference: &ModelReference, labels: &[&str], height: u32, width: u32) -> ArtifactMetadata {
    ArtifactMetadata {
        architecture: "linear".to_string(),
        num_classes: labels.len(),
        trained_at: None,
        val_accuracy: Some(0.94),
        artifact_key: reference.artifact_key(),
        labels: labels.iter().map(|l| l.to_string()).collect(),
        transform: transform(height, width),
    }
}

/// First `n` EuroSAT labels
pub fn labels(n: usize) -> Vec<&'static str> {
    EUROSAT_LABELS.iter().copied().take(n).collect()
}

fn linear_parts_with_probabilities(probabilities: &[f32], height: u32, width: u32) -> (Vec<Vec<f32>>, Vec<f32>) {
    let features = 3 * height as usize * width as usize;
    let weights = vec![vec![0.0; features]; probabilities.len()];
    let bias = probabilities.iter().map(|p| p.max(1e-9).ln()).collect();
    (weights, bias)
}

fn channel_parts(gain: f32, height: u32, width: u32) -> (Vec<Vec<f32>>, Vec<f32>) {
    let plane = height as usize * width as usize;
    let weights = (0..3)
        .map(|c| {
            let mut row = vec![0.0; 3 * plane];
            row[c * plane..(c + 1) * plane].fill(gain / plane as f32);
            row
        })
        .collect();
    (weights, vec![0.0; 3])
}

/// Linear artifact whose softmax output is `probabilities` for every input
pub fn linear_artifact_with_probabilities(probabilities: &[f32], height: u32, width: u32) -> Vec<u8> {
    let (weights, bias) = linear_parts_with_probabilities(probabilities, height, width);
    serde_json::to_vec(&json!({ "weights": weights, "bias": bias })).unwrap()
}

/// Linear artifact scoring each RGB class by the mean of its channel
pub fn channel_artifact(gain: f32, height: u32, width: u32) -> Vec<u8> {
    let (weights, bias) = channel_parts(gain, height, width);
    serde_json::to_vec(&json!({ "weights": weights, "bias": bias })).unwrap()
}

/// Stores a sidecar and artifact for `reference`
pub fn seed_store_with(store: &MemoryStore, reference: &ModelReference, metadata: &ArtifactMetadata, artifact: &[u8]) {
    store.put(
        &reference.bucket,
        &reference.metadata_key(),
        serde_json::to_vec(metadata).unwrap(),
    );
    store.put(&reference.bucket, &reference.artifact_key(), artifact.to_vec());
}

/// Seeds a constant-output model and returns its artifact bytes
pub fn seed_store(
    store: &MemoryStore,
    reference: &ModelReference,
    probabilities: &[f32],
    height: u32,
    width: u32,
) -> Vec<u8> {
    let metadata = metadata_for(reference, &labels(probabilities.len()), height, width);
    let artifact = linear_artifact_with_probabilities(probabilities, height, width);
    seed_store_with(store, reference, &metadata, &artifact);
    artifact
}

/// Seeds the channel-mean model and returns its artifact bytes
pub fn seed_channel_store(store: &MemoryStore, reference: &ModelReference, gain: f32, height: u32, width: u32) -> Vec<u8> {
    let metadata = metadata_for(reference, &CHANNEL_LABELS, height, width);
    let artifact = channel_artifact(gain, height, width);
    seed_store_with(store, reference, &metadata, &artifact);
    artifact
}

/// In-memory model whose softmax output is `probabilities` for every input
pub fn loaded_model(probabilities: &[f32], height: u32, width: u32) -> Arc<LoadedModel> {
    let reference = ModelReference::new("eurosat", "v1", "model.json");
    let metadata = metadata_for(&reference, &labels(probabilities.len()), height, width);
    let (weights, bias) = linear_parts_with_probabilities(probabilities, height, width);
    let classifier = LinearClassifier::new(weights, bias, metadata.transform.input_shape()).unwrap();
    Arc::new(LoadedModel::from_parts(reference, metadata, "0".repeat(64), Arc::new(classifier)).unwrap())
}

/// In-memory channel-mean model over [`CHANNEL_LABELS`]
pub fn channel_model(gain: f32, height: u32, width: u32) -> Arc<LoadedModel> {
    let reference = ModelReference::new("rgb", "v1", "model.json");
    let metadata = metadata_for(&reference, &CHANNEL_LABELS, height, width);
    let (weights, bias) = channel_parts(gain, height, width);
    let classifier = LinearClassifier::new(weights, bias, metadata.transform.input_shape()).unwrap();
    Arc::new(LoadedModel::from_parts(reference, metadata, "0".repeat(64), Arc::new(classifier)).unwrap())
}

/// Store that answers from a [`MemoryStore`] after an adjustable delay
pub struct DelayedStore {
    inner: Arc<MemoryStore>,
    delay_ms: AtomicU64,
}

impl DelayedStore {
    pub fn new(inner: Arc<MemoryStore>, delay: Duration) -> Self {
        Self {
            inner,
            delay_ms: AtomicU64::new(delay.as_millis() as u64),
        }
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for DelayedStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<StoredObject, StorageError> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.inner.get(bucket, key).await
    }

    fn describe(&self) -> String {
        format!("delayed {}", self.inner.describe())
    }
}
