//! Metadata sidecar handling
//!
//! The sidecar at `models/<version>/metadata.json` carries the label order and
//! the training-time transform. It is parsed here and checked against the
//! reference it was fetched for; content validation happens at load time.

use tracing::debug;

use common::{ArtifactMetadata, ModelReference, Result, ServingError};

/// Parses a sidecar and checks that it describes `reference`'s artifact
pub fn parse_metadata(bytes: &[u8], reference: &ModelReference) -> Result<ArtifactMetadata> {
    let metadata: ArtifactMetadata = serde_json::from_slice(bytes).map_err(|e| {
        ServingError::ModelLoad(format!(
            "Invalid metadata sidecar {}: {}",
            reference.metadata_key(),
            e
        ))
    })?;

    let expected_key = reference.artifact_key();
    if !metadata.artifact_key.is_empty() && metadata.artifact_key != expected_key {
        return Err(ServingError::ArtifactCorrupt(format!(
            "Metadata sidecar describes {} but {} was requested",
            metadata.artifact_key, expected_key
        )));
    }

    debug!(
        architecture = %metadata.architecture,
        num_classes = metadata.num_classes,
        val_accuracy = ?metadata.val_accuracy,
        "Parsed metadata sidecar for {}",
        reference
    );

    Ok(metadata)
}
