// src/server/admin_server.rs

//! A small read-only HTTP surface for diagnostics: cache stats, monitor
//! state per backend, and a rolling buffer of recent monitor events,
//! plus a `/metrics` Prometheus endpoint.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, http::StatusCode, response::IntoResponse, routing::get};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info};

use crate::core::metrics::gather_metrics;
use crate::server::state::AppState;

#[derive(Serialize)]
struct CacheStatsView {
    hits: u64,
    misses: u64,
    inserts: u64,
    evictions: u64,
    size_bytes: i64,
}

#[derive(Serialize)]
struct ServerStatusView {
    name: String,
    address: SocketAddr,
    status_bits: u32,
}

#[derive(Serialize)]
struct MonitorView {
    name: String,
    servers: Vec<ServerStatusView>,
}

#[derive(Serialize)]
struct DiagnosticsResponse {
    cache: CacheStatsView,
    monitors: Vec<MonitorView>,
    recent_events: Vec<crate::server::state::EventRecord>,
}

async fn diagnostics_handler(state: Arc<AppState>) -> impl IntoResponse {
    let cache = crate::core::parsing_cache::with_thread_cache(|cache| {
        let stats = cache.stats();
        CacheStatsView {
            hits: stats.hits,
            misses: stats.misses,
            inserts: stats.inserts,
            evictions: stats.evictions,
            size_bytes: stats.size,
        }
    });

    let mut monitors = Vec::with_capacity(state.monitors.len());
    for (name, group) in &state.monitors {
        let servers = group
            .servers
            .iter()
            .map(|s| ServerStatusView {
                name: s.name.clone(),
                address: s.address,
                status_bits: s.status().bits(),
            })
            .collect();
        monitors.push(MonitorView {
            name: name.clone(),
            servers,
        });
    }

    let recent_events = state.recent_events();

    let body = DiagnosticsResponse {
        cache,
        monitors,
        recent_events,
    };
    axum::Json(body)
}

async fn metrics_handler() -> impl IntoResponse {
    let body = gather_metrics();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        body,
    )
}

/// Runs the admin HTTP surface until `shutdown` fires.
pub async fn run_admin_server(state: Arc<AppState>, addr: SocketAddr, mut shutdown: watch::Receiver<bool>) {
    let diag_state = state.clone();
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route(
            "/diagnostics",
            get(move || diagnostics_handler(diag_state.clone())),
        );

    info!("admin interface listening on http://{}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("failed to bind admin interface on {}: {}", addr, e);
            return;
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
            info!("admin interface shutting down");
        })
        .await
        .unwrap();
}
