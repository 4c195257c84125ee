//! Subscriber construction

use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use common::{Result, ServingError};
use serving_config::{LogFormat, LoggingConfig};

/// File name prefix of rotated log files
const LOG_FILE_PREFIX: &str = "image-serving.log";

/// Keeps the background file writer alive; drop it only at shutdown
#[must_use = "dropping the guard stops file logging"]
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Builds the level filter, preferring `RUST_LOG` when it is set
pub fn build_filter(level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level)
            .map_err(|e| ServingError::Config(format!("Invalid log level '{}': {}", level, e))),
    }
}

/// Installs the global subscriber
pub fn init(config: &LoggingConfig) -> Result<LogGuard> {
    let filter = build_filter(&config.level)?;

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    let stdout_layer = match config.format {
        LogFormat::Pretty => fmt::layer().with_target(true).boxed(),
        LogFormat::Json => fmt::layer().json().with_current_span(true).boxed(),
    };
    layers.push(stdout_layer);

    let mut file_guard = None;
    if let Some(directory) = &config.directory {
        std::fs::create_dir_all(directory)?;
        let appender = tracing_appender::rolling::daily(directory, LOG_FILE_PREFIX);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        layers.push(fmt::layer().json().with_ansi(false).with_writer(writer).boxed());
        file_guard = Some(guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| ServingError::Internal(format!("Failed to install tracing subscriber: {}", e)))?;

    info!(
        level = %config.level,
        format = ?config.format,
        directory = ?config.directory,
        "Logging initialized"
    );

    Ok(LogGuard { _file_guard: file_guard })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_filter_rejects_garbage() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        assert!(build_filter("info,image_serving=debug").is_ok());
        assert!(matches!(build_filter("image_serving=loud"), Err(ServingError::Config(_))));
    }

    #[test]
    fn test_init_with_file_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            level: "debug".to_string(),
            format: LogFormat::Json,
            directory: Some(dir.path().join("logs")),
        };

        // A second install in the same test binary fails; either way the
        // directory must have been prepared.
        let _ = init(&config);
        assert!(dir.path().join("logs").is_dir());
    }
}
