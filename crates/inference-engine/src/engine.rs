//! Inference and decision engine
//!
//! Runs the forward pass, checks that the backend produced a probability
//! distribution, and applies the confidence threshold: the argmax label is
//! returned when its probability is at least the threshold, otherwise the
//! abstain sentinel is returned with the same confidence.

use tracing::{debug, error};

use common::{Label, PredictionResult, Result, ServingError};
use model_manager::LoadedModel;

use crate::preprocessing::DecodedImage;

/// Allowed deviation of the score sum from 1
const DISTRIBUTION_TOLERANCE: f32 = 1e-3;

/// Applies the confidence threshold policy to model output
#[derive(Debug, Clone, Copy)]
pub struct DecisionEngine {
    threshold: f32,
}

impl DecisionEngine {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Runs `model` on `image` and decides a label
    pub fn predict(&self, model: &LoadedModel, image: &DecodedImage) -> Result<PredictionResult> {
        let expected = model.input_shape();
        if image.shape() != expected {
            return Err(ServingError::Inference(format!(
                "Input tensor has shape {:?}, model {} expects {:?}",
                image.shape(),
                model.version(),
                expected
            )));
        }

        let classifier = model.classifier();
        let logits = classifier.forward(image.tensor.view()).map_err(|e| {
            error!(version = %model.version(), backend = classifier.name(), "Forward pass failed: {}", e);
            ServingError::from(e)
        })?;
        if logits.len() != model.num_classes() {
            return Err(ServingError::Inference(format!(
                "Backend returned {} scores for {} classes",
                logits.len(),
                model.num_classes()
            )));
        }

        let scores = classifier.normalize(&logits);
        self.decide(model.labels(), scores)
    }

    /// Decides a label from a normalized score vector in label order
    pub fn decide(&self, labels: &[String], scores: Vec<f32>) -> Result<PredictionResult> {
        check_distribution(&scores, labels.len())?;

        // Strict comparison keeps the lowest index on ties.
        let mut best = 0;
        for (i, score) in scores.iter().enumerate().skip(1) {
            if *score > scores[best] {
                best = i;
            }
        }
        let confidence = scores[best];

        let label = if confidence >= self.threshold {
            Label::Class(labels[best].clone())
        } else {
            Label::Abstain
        };

        debug!(
            candidate = %labels[best],
            confidence,
            threshold = self.threshold,
            abstained = label.is_abstain(),
            "Prediction decided"
        );

        Ok(PredictionResult {
            label,
            confidence,
            raw_scores: scores,
        })
    }
}

fn check_distribution(scores: &[f32], num_classes: usize) -> Result<()> {
    if scores.len() != num_classes || scores.is_empty() {
        return Err(ServingError::Inference(format!(
            "Expected {} normalized scores, got {}",
            num_classes,
            scores.len()
        )));
    }
    if scores.iter().any(|s| !s.is_finite() || *s < 0.0) {
        return Err(ServingError::Inference(
            "Normalized scores contain negative or non-finite values".to_string(),
        ));
    }
    let sum: f32 = scores.iter().sum();
    if (sum - 1.0).abs() > DISTRIBUTION_TOLERANCE {
        return Err(ServingError::Inference(format!(
            "Normalized scores sum to {}, not 1",
            sum
        )));
    }
    Ok(())
}
