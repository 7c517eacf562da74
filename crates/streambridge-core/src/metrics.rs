//! Prometheus metrics bootstrap.
//!
//! Components record through the `metrics` facade; this module installs the
//! recorder and serves `/metrics` when telemetry is enabled. Metric names
//! follow `<component>_<thing>_<unit>`.

use std::net::SocketAddr;

use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and register metric descriptions.
///
/// Returns `None` when a recorder is already installed (tests, repeated
/// init) instead of panicking.
pub fn init_metrics() -> Option<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder().ok()?;
    register_metrics();
    Some(handle)
}

/// Serve the `/metrics` endpoint on its own port as a background task.
pub async fn start_metrics_server(
    port: u16,
    handle: PrometheusHandle,
) -> Result<(), std::io::Error> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "metrics server listening");

    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            tracing::error!(error = %err, "metrics server exited");
        }
    });

    Ok(())
}

fn register_metrics() {
    describe_counter!(
        "ingress_requests_total",
        "EventSub ingress requests by outcome"
    );
    describe_counter!(
        "events_processed_total",
        "Stream events accepted for dispatch"
    );
    describe_counter!(
        "events_duplicate_total",
        "Stream events dropped by the dedup cache"
    );
    describe_counter!("dispatch_attempts_total", "Webhook dispatch attempts by result");
    describe_counter!(
        "retry_items_dropped_total",
        "Retry items dropped after exhausting attempts"
    );
    describe_gauge!("retry_queue_depth", "Items currently in the retry queue");
    describe_gauge!("dedup_cache_entries", "Live entries in the dedup cache");
    describe_counter!("config_reloads_total", "Configuration reloads by outcome");
}
