//! Configuration validation

use common::{Result, ServingError};

use crate::schema::{ServingConfig, StoreKind};

impl ServingConfig {
    /// Rejects configurations the server cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.model.bucket.trim().is_empty() {
            return Err(ServingError::Config("model.bucket must not be empty".to_string()));
        }
        if self.model.version.trim().is_empty() {
            return Err(ServingError::Config("model.version must not be empty".to_string()));
        }
        if self.model.artifact_name.trim().is_empty() || self.model.artifact_name.contains('/') {
            return Err(ServingError::Config(format!(
                "model.artifact_name must be a plain file name, got '{}'",
                self.model.artifact_name
            )));
        }
        if let Some(checksum) = self.model.checksum.as_deref().filter(|c| !c.is_empty()) {
            if checksum.len() != 64 || !checksum.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(ServingError::Config(format!(
                    "model.checksum must be a 64-character sha256 hex digest, got '{}'",
                    checksum
                )));
            }
        }

        if self.store.kind == StoreKind::Http && self.store.endpoint.as_deref().map_or(true, str::is_empty) {
            return Err(ServingError::Config("store.endpoint is required for the http store".to_string()));
        }

        let threshold = self.policy.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ServingError::Config(format!(
                "policy.confidence_threshold must be within [0, 1], got {}",
                threshold
            )));
        }
        if self.policy.max_upload_bytes == 0 {
            return Err(ServingError::Config("policy.max_upload_bytes must be positive".to_string()));
        }
        if self.policy.max_image_pixels == 0 {
            return Err(ServingError::Config("policy.max_image_pixels must be positive".to_string()));
        }
        if self.policy.allowed_media_types.is_empty() {
            return Err(ServingError::Config("policy.allowed_media_types must not be empty".to_string()));
        }
        if let Some(bad) = self.policy.allowed_media_types.iter().find(|t| !t.contains('/')) {
            return Err(ServingError::Config(format!(
                "policy.allowed_media_types entries must be full media types, got '{}'",
                bad
            )));
        }

        if self.timeouts.artifact_fetch_secs == 0 || self.timeouts.inference_secs == 0 {
            return Err(ServingError::Config("timeouts must be positive".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        ServingConfig::default().validate().unwrap();
    }

    #[test]
    fn test_rejects_bad_checksum() {
        let mut config = ServingConfig::default();
        config.model.checksum = Some("not-a-digest".to_string());
        assert!(config.validate().is_err());

        config.model.checksum = Some("0f".repeat(32));
        config.validate().unwrap();
    }

    #[test]
    fn test_rejects_http_store_without_endpoint() {
        let mut config = ServingConfig::default();
        config.store.kind = StoreKind::Http;
        assert!(config.validate().is_err());

        config.store.endpoint = Some("http://localhost:9000".to_string());
        config.validate().unwrap();
    }

    #[test]
    fn test_rejects_policy_values() {
        let mut config = ServingConfig::default();
        config.policy.allowed_media_types.clear();
        assert!(config.validate().is_err());

        let mut config = ServingConfig::default();
        config.policy.allowed_media_types = vec!["jpeg".to_string()];
        assert!(config.validate().is_err());

        let mut config = ServingConfig::default();
        config.policy.max_upload_bytes = 0;
        assert!(config.validate().is_err());

        let mut config = ServingConfig::default();
        config.policy.confidence_threshold = -0.1;
        assert!(config.validate().is_err());
    }
}
