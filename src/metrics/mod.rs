//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Chain connection status
//! - Dispatch outcomes and failures
//! - Inclusion and delivery latency

use crate::coordination::ChainId;

use anyhow::Result;
use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Chain metrics
    pub static ref CHAIN_CONNECTED: GaugeVec = register_gauge_vec!(
        "dispatcher_chain_connected",
        "Chain connection status (1=connected, 0=disconnected)",
        &["chain"]
    ).unwrap();

    // Dispatch metrics
    pub static ref DISPATCHES_STARTED: CounterVec = register_counter_vec!(
        "dispatcher_dispatches_started_total",
        "Total dispatches that passed validation",
        &["source", "destination"]
    ).unwrap();

    pub static ref DISPATCH_OUTCOMES: CounterVec = register_counter_vec!(
        "dispatcher_dispatch_outcomes_total",
        "Dispatch results (delivered, timed_out, unobservable, cancelled)",
        &["destination", "outcome"]
    ).unwrap();

    pub static ref DISPATCH_FAILURES: CounterVec = register_counter_vec!(
        "dispatcher_dispatch_failures_total",
        "Dispatches that ended in an error",
        &["source", "kind"]
    ).unwrap();

    pub static ref INCLUSION_LATENCY: HistogramVec = register_histogram_vec!(
        "dispatcher_inclusion_latency_seconds",
        "Time from submission to inclusion on the source chain",
        &["source"],
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
    ).unwrap();

    pub static ref DELIVERY_LATENCY: HistogramVec = register_histogram_vec!(
        "dispatcher_delivery_latency_seconds",
        "Time from inclusion to the observed delivery event",
        &["destination"],
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 15.0, 20.0, 30.0, 60.0]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> Result<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    render().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Text exposition of every registered metric
pub fn render() -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

// Helper functions to record metrics

pub fn record_chain_health(chain: &ChainId, healthy: bool) {
    CHAIN_CONNECTED
        .with_label_values(&[chain.as_str()])
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_dispatch_started(source: &ChainId, destination: &ChainId) {
    DISPATCHES_STARTED
        .with_label_values(&[source.as_str(), destination.as_str()])
        .inc();
}

pub fn record_dispatch_outcome(destination: &ChainId, outcome: &str) {
    DISPATCH_OUTCOMES
        .with_label_values(&[destination.as_str(), outcome])
        .inc();
}

pub fn record_dispatch_failure(source: &ChainId, kind: &str) {
    DISPATCH_FAILURES
        .with_label_values(&[source.as_str(), kind])
        .inc();
}

pub fn record_inclusion_latency(source: &ChainId, latency_secs: f64) {
    INCLUSION_LATENCY
        .with_label_values(&[source.as_str()])
        .observe(latency_secs);
}

pub fn record_delivery_latency(destination: &ChainId, latency_secs: f64) {
    DELIVERY_LATENCY
        .with_label_values(&[destination.as_str()])
        .observe(latency_secs);
}
