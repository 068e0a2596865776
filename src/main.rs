//! AVS client - Main Entry Point
//!
//! Opens a persistent connection, synchronizes state on every (re)open, and
//! logs the directives the service pushes until interrupted.

use avs_client::config::AvsConfig;
use avs_client::connection::ConnectionManager;
use avs_client::observability::init_default_logging;
use avs_client::protocol::{ContextEntry, Directive, EventHeader};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::process;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Persistent Alexa Voice Service client
#[derive(Parser)]
#[command(name = "avs-client")]
#[command(about = "Persistent Alexa Voice Service client")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "AVS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the connection and log incoming directives
    Run,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting avs-client v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_client(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(config_path: &Option<PathBuf>) -> Result<AvsConfig, Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(AvsConfig::load_from_file(path)?)
        }
        None => {
            for path_str in ["avs.toml", "config/avs.toml"] {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(AvsConfig::load_from_file(&path)?);
                }
            }

            warn!("No configuration file found, using defaults");
            Ok(AvsConfig::default())
        }
    }
}

/// State reported with SynchronizeState
fn device_context() -> Vec<ContextEntry> {
    vec![
        ContextEntry::new(
            "AudioPlayer",
            "PlaybackState",
            json!({"token": "", "offsetInMilliseconds": 0, "playerActivity": "IDLE"}),
        ),
        ContextEntry::new(
            "Speaker",
            "VolumeState",
            json!({"volume": 50, "muted": false}),
        ),
        ContextEntry::new(
            "SpeechSynthesizer",
            "SpeechState",
            json!({"token": "", "offsetInMilliseconds": 0, "playerActivity": "FINISHED"}),
        ),
        ContextEntry::new(
            "Alerts",
            "AlertsState",
            json!({"allAlerts": [], "activeAlerts": []}),
        ),
    ]
}

async fn run_client(config: AvsConfig) -> Result<(), Box<dyn std::error::Error>> {
    let manager = ConnectionManager::from_config(&config)?.with_context_provider(device_context);
    info!(
        connection_id = %manager.connection_id(),
        endpoint = %config.avs.endpoint,
        "Client starting"
    );

    let (opened_tx, mut opened_rx) = mpsc::unbounded_channel();
    manager.on_opened(move || {
        let _ = opened_tx.send(());
    });
    manager.on_closed(|| info!("Connection closed"));
    manager.subscribe_directives(|directive: &Directive| {
        let (namespace, name) = directive.kind();
        let message_id = directive.meta().map(|meta| meta.message_id.as_str());
        info!(namespace, name, message_id, "Directive received");
    });

    manager.open().await?;

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    info!("Connected, waiting for directives...");

    loop {
        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down gracefully...");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down gracefully...");
                break;
            }
            Some(()) = opened_rx.recv() => {
                let header = EventHeader::new("System", "SynchronizeState");
                match manager.send_event(header, true, None, None).await {
                    Ok(receipt) => info!(
                        message_id = %receipt.message_id,
                        status = receipt.status,
                        "State synchronized"
                    ),
                    Err(e) => error!("SynchronizeState failed: {}", e.sanitized_message()),
                }
            }
        }
    }

    manager.close().await;
    Ok(())
}

fn handle_config_command(config: &AvsConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;

    if show {
        println!("{}", toml::to_string_pretty(config)?);
    } else {
        println!("Configuration is valid");
    }

    for (name, env_var) in [
        ("client id", &config.auth.client_id_env),
        ("client secret", &config.auth.client_secret_env),
        ("refresh token", &config.auth.refresh_token_env),
    ] {
        if std::env::var(env_var).is_err() {
            warn!("Environment variable {} for the {} is not set", env_var, name);
        }
    }

    Ok(())
}
