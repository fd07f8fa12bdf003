//! # bagwatch-server
//!
//! HTTP server for the bagwatch luggage proximity tracker.
//!
//! This binary provides:
//! - REST API for registering luggage, linking beacons and monitoring them
//! - OpenAPI documentation via Swagger UI
//! - Structured logging to file and stdout
//!
//! ## Running
//!
//! ```bash
//! # Development, without a Bluetooth adapter
//! cargo run --package bagwatch-server --features mock-bluetooth
//!
//! # Production
//! BAGWATCH__LOGGING__PRODUCTION=true ./bagwatch-server
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use bagwatch_core::Config;
use bagwatch_server::{api, logging, state::AppState};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = config_path();
    let config = Config::load(config_path.as_deref()).context("failed to load configuration")?;

    let _log_guard = logging::init(&config.logging)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting bagwatch-server");
    if let Some(path) = &config_path {
        info!(path = %path.display(), "configuration file");
    }

    let addr: SocketAddr = config
        .server
        .bind_address
        .parse()
        .with_context(|| format!("invalid bind address {}", config.server.bind_address))?;

    let state = Arc::new(AppState::new(config, config_path).await?);
    let app = api::create_router(Arc::clone(&state));

    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    state.coordinator().stop_all_monitoring().await;

    Ok(())
}

/// `BAGWATCH_CONFIG` if set, else the platform default. Logging is not up
/// yet, so a missing config directory is only reported on stderr.
fn config_path() -> Option<PathBuf> {
    match Config::default_path() {
        Ok(path) => Some(path),
        Err(err) => {
            eprintln!("no config directory ({err}), using defaults");
            None
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(%err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
