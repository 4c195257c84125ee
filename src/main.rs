use std::path::PathBuf;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use image_serving::ServingApp;
use serving_config::ServingConfig;

/// Configuration file used when `--config` is not given and the file exists
const DEFAULT_CONFIG_FILE: &str = "serving.toml";

/// Image serving - confidence-gated image classification over HTTP
#[derive(Parser)]
#[command(name = "image-serving")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (TOML); `IMGSERVE_*` variables override it
    #[arg(long, short, global = true, env = "IMGSERVE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server; the model loads in the background
    Serve {
        /// Listen address, overrides `server.host`
        #[arg(long)]
        host: Option<String>,

        /// Listen port, overrides `server.port`
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Resolve and load the configured model, then exit
    Check,

    /// Classify one local image and print the result as JSON
    Predict {
        /// Image file
        file: PathBuf,

        /// Media type to declare; inferred from the extension by default
        #[arg(long)]
        content_type: Option<String>,
    },
}

/// Picks the configuration file: the explicit path, else `serving.toml` if present
fn config_path(explicit: Option<PathBuf>) -> Option<PathBuf> {
    explicit.or_else(|| {
        let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
        default_path.exists().then_some(default_path)
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = config_path(cli.config);
    let mut config = serving_config::load(config_path.as_deref()).context("Failed to load configuration")?;

    if let Commands::Predict { .. } = cli.command {
        // Keep stdout for the result.
        config.logging.level = "warn".to_string();
    }
    let _log_guard = logging::init(&config.logging)?;

    match &config_path {
        Some(path) => info!("Loaded configuration from {}", path.display()),
        None => info!("No configuration file, using defaults and {} variables", serving_config::ENV_PREFIX),
    }

    match cli.command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }

            info!(
                model = %config.model_reference(),
                threshold = config.policy.confidence_threshold,
                "Starting image serving"
            );

            let app = ServingApp::new(config)?;
            app.run(async {
                let _ = tokio::signal::ctrl_c().await;
                info!("Shutdown requested");
            })
            .await?;
        }
        Commands::Check => {
            let app = ServingApp::new(config)?;
            let snapshot = app.check().await?;

            if let Some(model) = snapshot.model {
                println!("{}", serde_json::to_string_pretty(&model.metadata)?);
                println!("sha256: {}", model.sha256);
            }
        }
        Commands::Predict { file, content_type } => {
            let app = ServingApp::new(config)?;
            let result = app.predict_file(&file, content_type.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_config_path_wins() {
        let explicit = PathBuf::from("/etc/image-serving/prod.toml");
        assert_eq!(config_path(Some(explicit.clone())), Some(explicit));
    }

    #[test]
    fn test_cli_parses_predict() {
        let cli = Cli::try_parse_from(["image-serving", "-c", "a.toml", "predict", "tile.png"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("a.toml")));
        assert!(matches!(cli.command, Commands::Predict { ref file, .. } if file == &PathBuf::from("tile.png")));
    }
}
