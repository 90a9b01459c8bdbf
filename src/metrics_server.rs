//! (ambient) The thin, optional `/metrics` HTTP exposition step.
//!
//! spec.md §1 places the Prometheus HTTP endpoint out of scope as an
//! "external collaborator" (§6: "the Prometheus HTTP endpoint is an
//! external collaborator that owns the /metrics route and shutdown
//! timing"). This module is the smallest possible bridge to that
//! collaborator: an `axum` router with one route that gathers
//! `metrics::Metrics`'s registry into the Prometheus text exposition
//! format. It owns nothing about scrape-server lifecycle beyond binding
//! and serving; `main.rs` only starts it when `--metrics-addr` is passed.
//!
//! Enrichment from the retrieved pack's `grove-pg-stream`/`pgtrickle-relay`
//! dependency stack, which pairs `axum` with `prometheus` for exactly this
//! purpose (see DESIGN.md).

use crate::metrics::Metrics;
use axum::{routing::get, Router};
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

async fn serve_metrics(metrics: axum::extract::State<Arc<Metrics>>) -> String {
    let encoder = TextEncoder::new();
    let families = metrics.registry().gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buffer) {
        warn!(error = %e, "failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Bind `addr` and serve `/metrics` until the process exits. Spawned as a
/// background task by `main.rs`; failures are logged, not fatal to the
/// pipeline itself (the scrape endpoint is a diagnostic surface, not part
/// of the CDC data path).
pub async fn run(addr: SocketAddr, metrics: Arc<Metrics>) {
    let app = Router::new()
        .route("/metrics", get(serve_metrics))
        .with_state(metrics);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            warn!(addr = %addr, error = %e, "failed to bind metrics listener");
            return;
        }
    };
    info!(addr = %addr, "metrics endpoint listening");
    if let Err(e) = axum::serve(listener, app).await {
        warn!(error = %e, "metrics server exited with error");
    }
}
