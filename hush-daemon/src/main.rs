//! hushd binary entry point.
//!
//! Usage:
//! ```bash
//! hushd --config hush.toml
//! hushd --bind 127.0.0.1:9000
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use hush_daemon::clock::SystemClock;
use hush_daemon::keystore::MemoryKeystore;
use hush_daemon::relay::WsConnector;
use hush_daemon::remote::HttpRemote;
use hush_daemon::storage::SqliteStore;
use hush_daemon::trust::NullTrustEngine;
use hush_daemon::{http, telemetry, Config, Service, ServiceDeps};
use std::path::PathBuf;
use std::sync::Arc;

const DEFAULT_CONFIG: &str = "hush.toml";

/// Session and live-sync daemon for hush.
#[derive(Parser, Debug)]
#[command(name = "hushd")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults apply if hush.toml is absent)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Override the RPC bind address
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;
    if let Some(bind) = cli.bind {
        config.http.bind_address = bind;
    }

    telemetry::init(&config.log);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting hushd");

    let remote = HttpRemote::new(config.remote.base_url.clone(), config.remote.timeout())
        .context("Failed to build remote client")?;
    let service = Arc::new(Service::new(
        &config,
        ServiceDeps {
            keystore: Arc::new(MemoryKeystore::default()),
            store: Arc::new(SqliteStore::new(&config.storage.path)),
            trust: Arc::new(NullTrustEngine),
            remote: Arc::new(remote),
            connector: Arc::new(WsConnector),
            clock: Arc::new(SystemClock),
        },
    ));

    let listener = tokio::net::TcpListener::bind(&config.http.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.http.bind_address))?;
    tracing::info!(address = %config.http.bind_address, "Listening");

    axum::serve(listener, http::build_router(Arc::clone(&service)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("RPC server failed")?;

    if let Err(e) = service.lock().await {
        tracing::warn!("Lock on shutdown failed: {}", e);
    }
    tracing::info!("Stopped");
    Ok(())
}

/// An explicit path must exist; the default path is optional.
fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    match path {
        Some(path) => Ok(Config::from_file(path)?),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG);
            if default.exists() {
                Ok(Config::from_file(&default)?)
            } else {
                Ok(Config::default())
            }
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
