//! HTTP server: read API over the index plus the background rescan task

pub mod error;
pub mod routes;

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use axum::Router;
use tracing::info;

use crate::config::Config;
use crate::probe::ProbeRegistry;
use crate::query::QueryService;
use crate::rescan::{self, Rescanner};
use crate::store::IndexStore;

pub use error::{ApiError, ErrorResponse};

/// Shared by every handler
pub struct AppState {
    pub query: QueryService,
    pub rescanner: Arc<Rescanner>,
}

impl AppState {
    pub fn new(rescanner: Arc<Rescanner>) -> Self {
        Self {
            query: QueryService::new(Arc::clone(rescanner.store())),
            rescanner,
        }
    }
}

pub fn app(state: Arc<AppState>) -> Router {
    routes::api_routes().with_state(state)
}

/// Open the index, start periodic rescans and serve until Ctrl-C.
/// `bind` overrides the configured `host:port`.
pub async fn serve(config: &Config, bind: Option<String>) -> Result<()> {
    let db_path = config.database_path();
    let store = IndexStore::open(&db_path)
        .with_context(|| format!("opening index at {}", db_path.display()))?;
    let rescanner = Arc::new(Rescanner::new(
        Arc::new(Mutex::new(store)),
        ProbeRegistry::new(config),
    ));
    let state = Arc::new(AppState::new(Arc::clone(&rescanner)));
    let rescan_task = rescan::spawn(rescanner, config.rescan_interval());

    let addr = bind.unwrap_or_else(|| config.bind_address());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, interval_secs = config.rescan_interval().as_secs(), "serving");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    rescan_task.abort();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
