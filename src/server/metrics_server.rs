// src/server/metrics_server.rs

//! Serves the `/metrics` endpoint (§10.5), grounded on the teacher's
//! `server/metrics_server.rs` (an axum route gathering `prometheus`
//! text-format output behind a graceful shutdown).

use crate::config::MetricsConfig;
use crate::core::metrics::gather_metrics;
use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use std::net::SocketAddr;
use tokio::sync::broadcast;
use tracing::{error, info};

async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        gather_metrics(),
    )
}

/// Runs the Prometheus exporter until `shutdown` fires.
pub async fn run_metrics_server(config: MetricsConfig, mut shutdown: broadcast::Receiver<()>) {
    let addr: SocketAddr = match format!("{}:{}", config.host, config.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!(host = %config.host, port = config.port, error = %e, "invalid metrics bind address");
            return;
        }
    };

    let app = Router::new().route("/metrics", get(metrics_handler));

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(%addr, error = %e, "failed to bind metrics server");
            return;
        }
    };

    info!(%addr, "prometheus metrics server listening on /metrics");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.recv().await.ok();
            info!("metrics server shutting down");
        })
        .await
        .ok();
}
