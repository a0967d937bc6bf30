//! Label relay server
//!
//! A self-hostable label service for encrypted wallet label sync. It
//! stores only ciphertexts keyed by wallet id and never holds a key.
//! Serve it behind a TLS-terminating proxy; clients only speak HTTPS.

mod config;
mod error;
mod handlers;
mod server;
mod storage;

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "labelsync-relay", about = "Encrypted wallet label relay")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "relay.toml")]
    config: PathBuf,

    /// Listen address override
    #[arg(short, long)]
    listen: Option<String>,

    /// Database path override
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Per-wallet label limit override
    #[arg(long)]
    max_labels: Option<usize>,
}

fn load_config(cli: &Cli) -> anyhow::Result<config::RelayConfig> {
    let mut cfg = if cli.config.exists() {
        config::RelayConfig::load(&cli.config)
            .with_context(|| format!("cannot load {}", cli.config.display()))?
    } else {
        tracing::info!("No config file found, using defaults");
        config::RelayConfig::default()
    };

    if let Some(listen) = &cli.listen {
        cfg.listen_addr = listen.clone();
    }
    if let Some(database) = &cli.database {
        cfg.storage_path = database.clone();
    }
    if let Some(max_labels) = cli.max_labels {
        cfg.max_labels_per_wallet = max_labels;
    }

    cfg.validate()?;
    Ok(cfg)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Cannot listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli)?;

    tracing::info!(
        "Starting label relay on {} (store {}, {} labels per wallet, {} byte bodies)",
        cfg.listen_addr,
        cfg.storage_path.display(),
        cfg.max_labels_per_wallet,
        cfg.max_payload_size
    );

    let state = storage::RelayStorage::open(&cfg.storage_path)
        .with_context(|| format!("cannot open {}", cfg.storage_path.display()))?;
    let app = server::build_router(state, &cfg);

    let listener = tokio::net::TcpListener::bind(&cfg.listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
