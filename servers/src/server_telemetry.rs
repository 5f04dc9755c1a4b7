//! # Telemetry Server
//!
//! Watches the shared sample store for newly written telemetry and pushes each
//! new sample to every connected WebSocket viewer as a `new_data` event. The
//! same process answers the pull endpoints (active producers, per-producer
//! history, aggregate counts).
//!
//! Configuration is layered: built-in defaults, then `server_telemetry.conf`
//! (JSON), then environment variables and command-line arguments.

use anyhow::{Context, Result};
use lib_telemetry::connections::{MemoryStore, PgSampleStore, SampleStore};
use lib_telemetry::loggers::setup_logging;
use servers::telemetry_logic::config::{self, Settings, StoreKind};
use servers::telemetry_logic::service;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let settings = config::load_config()?.resolve()?;
    let _log_guard = setup_logging(
        &settings.log_dir,
        &settings.log_level,
        settings.log_json,
        settings.log_keep,
    )?;
    info!(
        "Configuration loaded: store {:?}, port {}, poll interval {:?}",
        settings.store, settings.port, settings.detector.poll_interval
    );

    match settings.store {
        StoreKind::Postgres => {
            let db_url = settings
                .db_url
                .clone()
                .context("postgres store selected without a database URL")?;
            let store = PgSampleStore::connect(&db_url, settings.db_pool_size)?;
            if settings.ensure_schema {
                // The store may still be starting; the detector retries on its own.
                if let Err(e) = store.ensure_schema().await {
                    warn!("Could not ensure the samples schema: {}", e);
                }
            }
            run(Arc::new(store), &settings).await
        }
        StoreKind::Memory => {
            warn!("Using the in-memory store; samples are lost on exit.");
            run(Arc::new(MemoryStore::new()), &settings).await
        }
    }
}

async fn run<S: SampleStore>(store: Arc<S>, settings: &Settings) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    let shutdown = CancellationToken::new();
    let running = service::start(store, settings, listener, shutdown).await?;

    wait_for_signal().await?;
    running.stop().await;
    Ok(())
}

async fn wait_for_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut term_signal = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                info!("Ctrl-C received, initiating shutdown.");
            }
            _ = term_signal.recv() => {
                info!("SIGTERM received, initiating shutdown.");
            }
        }
    }
    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("Ctrl-C received, initiating shutdown.");
    }
    Ok(())
}
