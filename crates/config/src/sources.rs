//! Configuration sources
//!
//! Layering order, lowest precedence first: built-in defaults, the TOML file,
//! `IMGSERVE_*` environment variables (`__` separates nesting levels, e.g.
//! `IMGSERVE_POLICY__CONFIDENCE_THRESHOLD=0.7`).

use std::collections::HashMap;
use std::path::Path;
use config::{Config, Environment, File, FileFormat};
use tracing::debug;

use common::{Result, ServingError};

use crate::schema::ServingConfig;

/// Prefix of recognized environment variables
pub const ENV_PREFIX: &str = "IMGSERVE";

/// Loads the configuration from an optional file plus the process environment
pub fn load(path: Option<&Path>) -> Result<ServingConfig> {
    load_with_env(path, None)
}

/// Loads the configuration from TOML text, without consulting the environment
pub fn load_from_str(toml: &str) -> Result<ServingConfig> {
    let settings = Config::builder()
        .add_source(File::from_str(toml, FileFormat::Toml))
        .build()
        .map_err(|e| ServingError::Config(e.to_string()))?;

    finish(settings)
}

/// Loads the configuration, reading environment overrides from `env` instead
/// of the process environment when it is given
pub fn load_with_env(path: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<ServingConfig> {
    let mut builder = Config::builder();

    if let Some(path) = path {
        if !path.exists() {
            return Err(ServingError::Config(format!("Config file not found: {}", path.display())));
        }
        debug!("Reading configuration file {}", path.display());
        builder = builder.add_source(File::from(path).format(FileFormat::Toml));
    }

    // `IMGSERVE_MODEL__VERSION`: one underscore after the prefix, two between levels.
    let environment = Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("policy.allowed_media_types")
        .source(env);

    let settings = builder
        .add_source(environment)
        .build()
        .map_err(|e| ServingError::Config(e.to_string()))?;

    finish(settings)
}

fn finish(settings: Config) -> Result<ServingConfig> {
    let config: ServingConfig = settings
        .try_deserialize()
        .map_err(|e| ServingError::Config(e.to_string()))?;

    config.validate()?;
    debug!(?config, "Configuration loaded");

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use crate::schema::{LogFormat, StoreKind};

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = load_from_str(
            r#"
            [model]
            bucket = "eurosat"
            version = "v2"

            [policy]
            confidence_threshold = 0.75
            "#,
        )
        .unwrap();

        assert_eq!(config.model.bucket, "eurosat");
        assert_eq!(config.model.artifact_name, "model.json");
        assert_eq!(config.policy.confidence_threshold, 0.75);
        assert_eq!(config.policy.max_upload_bytes, 5 * 1024 * 1024);
        assert_eq!(config.store.kind, StoreKind::Filesystem);
    }

    #[test]
    fn test_env_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[model]\nbucket = \"eurosat\"\nversion = \"v1\"\n\n[logging]\nformat = \"json\""
        )
        .unwrap();

        let env = HashMap::from([
            ("IMGSERVE_MODEL__VERSION".to_string(), "v9".to_string()),
            ("IMGSERVE_SERVER__PORT".to_string(), "9100".to_string()),
            (
                "IMGSERVE_POLICY__ALLOWED_MEDIA_TYPES".to_string(),
                "image/png,image/jpeg".to_string(),
            ),
        ]);

        let config = load_with_env(Some(file.path()), Some(env)).unwrap();
        assert_eq!(config.model.bucket, "eurosat");
        assert_eq!(config.model.version, "v9");
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.policy.allowed_media_types, vec!["image/png", "image/jpeg"]);
    }

    #[test]
    fn test_env_alone_sets_policy_and_model() {
        let env = HashMap::from([
            ("IMGSERVE_MODEL__VERSION".to_string(), "v9".to_string()),
            ("IMGSERVE_POLICY__CONFIDENCE_THRESHOLD".to_string(), "0.7".to_string()),
            ("IMGSERVE_POLICY__MAX_UPLOAD_BYTES".to_string(), "1024".to_string()),
        ]);

        let config = load_with_env(None, Some(env)).unwrap();
        assert_eq!(config.model.version, "v9");
        assert_eq!(config.policy.confidence_threshold, 0.7);
        assert_eq!(config.policy.max_upload_bytes, 1024);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = load_with_env(Some(Path::new("/definitely/not/here.toml")), Some(HashMap::new()));
        assert!(matches!(result, Err(ServingError::Config(_))));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let result = load_from_str("[policy]\nconfidence_threshold = 1.5\n");
        assert!(matches!(result, Err(ServingError::Config(_))));
    }

    #[test]
    fn test_example_file_loads() {
        let config = load_from_str(include_str!("../../../serving.example.toml")).unwrap();
        assert_eq!(config.model.version, "v3");
        assert_eq!(config.store.kind, StoreKind::Filesystem);
        assert_eq!(config.policy.allowed_media_types.len(), 3);
    }
}
