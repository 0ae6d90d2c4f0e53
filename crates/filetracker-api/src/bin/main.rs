//! Filetracker entry point
//!
//! `serve` runs the tracker service; `submit`, `logs` and `health` talk to a
//! running one.

use clap::{Parser, Subcommand, ValueEnum};
use filetracker_api::{TrackerApp, TrackerClient};
use filetracker_core::config::DEFAULT_CONFIG_PATH;
use filetracker_core::TrackerConfig;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "filetracker")]
#[command(about = "File change tracker with a whitelisted command executor")]
#[command(version)]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value = "json", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the tracker and its HTTP server
    Serve {
        /// Path to the YAML config file
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, env = "FILETRACKER_CONFIG")]
        config: PathBuf,

        /// Port to listen on, overriding the config file
        #[arg(short, long, env = "PORT")]
        port: Option<u16>,

        /// Host to bind to, overriding the config file
        #[arg(long)]
        host: Option<String>,
    },

    /// Queue commands on a running tracker
    Submit {
        #[arg(long, default_value = "http://localhost:9000", env = "FILETRACKER_URL")]
        url: String,

        /// Commands, one per argument (quote each one)
        #[arg(required = true)]
        commands: Vec<String>,
    },

    /// Print recorded file changes, most recent first
    Logs {
        #[arg(long, default_value = "http://localhost:9000", env = "FILETRACKER_URL")]
        url: String,

        #[arg(short, long, default_value = "10")]
        limit: usize,

        #[arg(short, long, default_value = "0")]
        offset: usize,
    },

    /// Report engine liveness; exits non-zero unless both are alive
    Health {
        #[arg(long, default_value = "http://localhost:9000", env = "FILETRACKER_URL")]
        url: String,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
    );
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer().pretty()).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Commands::Serve { config, port, host } => {
            let mut config = TrackerConfig::load(&config)?;
            if let Some(port) = port {
                config.http_port = port;
            }
            if let Some(host) = host {
                config.http_host = host;
            }
            let app = TrackerApp::build(config)?;

            let cancel = CancellationToken::new();
            tokio::spawn({
                let cancel = cancel.clone();
                async move {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        tracing::error!(error = %e, "failed to listen for interrupt");
                        return;
                    }
                    tracing::info!("interrupt received, shutting down");
                    cancel.cancel();
                }
            });

            app.run(cancel).await?;
        }

        Commands::Submit { url, commands } => {
            let message = TrackerClient::new(url).submit_commands(commands).await?;
            println!("{}", serde_json::json!({ "message": message }));
        }

        Commands::Logs { url, limit, offset } => {
            let entries = TrackerClient::new(url).logs(limit, offset).await?;
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }

        Commands::Health { url } => {
            let health = TrackerClient::new(url).health().await?;
            println!("{}", serde_json::to_string_pretty(&health)?);

            if !health.is_healthy() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
