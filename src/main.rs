//! # parley
//!
//! Chat server binary: loads configuration, opens the database and serves
//! the REST and push endpoints until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use parley_server::ParleyConfig;
use parley_store::Database;

#[derive(Parser, Debug)]
#[command(name = "parley", about = "One-to-one realtime chat server")]
struct Cli {
    /// JSON config file (falls back to `PARLEY_CONFIG`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the server (default).
    Serve {
        #[arg(long)]
        host: Option<String>,

        /// Port to bind (0 for auto-assign).
        #[arg(long)]
        port: Option<u16>,

        /// Path to the SQLite database.
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Print the effective configuration with secrets redacted.
    Config,
}

fn ensure_parent_dir(path: &std::path::Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = ParleyConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    let command = cli.command.unwrap_or(Command::Serve {
        host: None,
        port: None,
        db: None,
    });

    match command {
        Command::Config => {
            println!("{config:#?}");
            Ok(())
        }
        Command::Serve { host, port, db } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(db) = db {
                config.database.path = db;
            }
            serve(config).await
        }
    }
}

async fn serve(config: ParleyConfig) -> Result<()> {
    parley_telemetry::init_telemetry(&config.telemetry).context("failed to initialise logging")?;

    ensure_parent_dir(&config.database.path)?;
    let db = Database::open(&config.database.path)
        .with_context(|| format!("failed to open database at {}", config.database.path.display()))?;
    tracing::info!(path = %config.database.path.display(), "database ready");

    let server = parley_server::start(config, db)
        .await
        .context("failed to start server")?;
    tracing::info!(port = server.port(), "listening");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    tracing::info!("shutdown requested");
    server.shutdown().await;
    Ok(())
}
