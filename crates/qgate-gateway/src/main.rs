//! qgate gateway binary.
//!
//! - Generic data/call endpoint (default `/rSvc`)
//! - Redis (or process-local) data and permission stores
//! - Self-learning permission tables refreshed from the store
//! - In-process worker loops for registered services
//! - Graceful shutdown on Ctrl-C / SIGTERM

use std::net::SocketAddr;

use tracing_subscriber::{fmt, EnvFilter};

use qgate_core::error::{QgateError, Result};
use qgate_gateway::store;
use qgate_gateway::{app_state::AppState, config, router};

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "qgate-gateway failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let path = config::config_path();
    let cfg = config::load_from_file(&path)?;
    let listen: SocketAddr = cfg.gateway.listen.parse().map_err(|e| {
        QgateError::BadRequest(format!("gateway.listen must be a valid SocketAddr: {e}"))
    })?;

    let stores = store::open(&cfg.store).await?;
    let state = AppState::with_stores(cfg, stores)?;
    let tasks = state.start_background()?;
    let app = router::build_router(state.clone());

    tracing::info!(%listen, config = %path, "qgate-gateway starting");
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .map_err(|e| QgateError::Internal(format!("bind {listen} failed: {e}")))?;

    let draining = state.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            draining.set_draining();
        })
        .await;

    tasks.stop().await;
    served.map_err(|e| QgateError::Internal(format!("server failed: {e}")))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("signal received, draining");
}
