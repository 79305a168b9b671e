// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Health and metrics HTTP surface of a worker.
//!
//! - `/health` - liveness check, always `OK`
//! - `/metrics` - JSON [`MetricsSnapshot`]
//! - `/metrics/prometheus` - text exposition of the `metrics` facade

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::metrics::{MetricsSnapshot, PipelineMetrics};

#[derive(Clone)]
pub struct ServerState {
    pub metrics: Arc<PipelineMetrics>,
    /// Present when the binary installed the Prometheus recorder
    pub prometheus: Option<PrometheusHandle>,
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_json))
        .route("/metrics/prometheus", get(metrics_prometheus))
        .with_state(state)
}

/// Serve until `shutdown` turns true or its sender is dropped.
pub async fn serve(addr: SocketAddr, state: ServerState, mut shutdown: watch::Receiver<bool>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "HTTP surface listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
}

async fn health() -> &'static str {
    "OK"
}

async fn metrics_json(State(state): State<ServerState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

async fn metrics_prometheus(State(state): State<ServerState>) -> Response {
    match &state.prometheus {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "Prometheus exporter not installed").into_response(),
    }
}
