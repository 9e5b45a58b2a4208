//! Thin transport layer over `notepipe-core`.
//!
//! The HTTP/WebSocket surface is explicitly out of scope for the pipeline
//! runtime itself (spec.md §1); this crate is deliberately small — a
//! health check, a status WebSocket feed bridging
//! `notepipe_core::status::StatusBroadcaster`, and a metrics snapshot
//! endpoint. Grounded on the teacher's `foia-server` `AppState`/`routes`
//! split, trimmed to the handlers this system actually needs.

pub mod handlers;
pub mod routes;

use std::sync::Arc;

use notepipe_core::metrics::MetricsCollector;
use notepipe_core::status::StatusBroadcaster;

/// Shared server state, constructed once at startup and cloned into every
/// handler via axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub status_broadcaster: Arc<dyn StatusBroadcaster>,
    pub metrics: Arc<MetricsCollector>,
}

impl AppState {
    pub fn new(status_broadcaster: Arc<dyn StatusBroadcaster>, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            status_broadcaster,
            metrics,
        }
    }
}

/// Binds and serves the router on `addr` until the process is signaled to
/// stop.
pub async fn serve(addr: std::net::SocketAddr, state: AppState) -> anyhow::Result<()> {
    let router = routes::create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "notepipe-server listening");
    axum::serve(listener, router).await?;
    Ok(())
}
