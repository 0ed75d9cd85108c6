// SPDX-License-Identifier: GPL-3.0-or-later

//! Prometheus metrics the service exports.
//!
//! The whole set lives behind one explicitly-passed [`Metrics`] handle with
//! its own registry, namespaced by `PROMETHEUS_METRICS_PREFIX`. The scrape
//! endpoint is a single-route axum app bound to `PROMETHEUS_METRICS_PORT`.

use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus::{
    Encoder, GaugeVec, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};
use std::net::SocketAddr;
use std::sync::Arc;

pub struct Metrics {
    registry: Registry,

    pub active_era_id: IntGauge,
    pub era_update_delayed: IntGauge,
    pub is_recovery_mode_active: IntGauge,
    pub last_era_reported: IntGauge,
    pub last_failed_era: IntGauge,
    pub oracle_balance: GaugeVec,
    pub previous_era_change_block_number: IntGauge,
    pub para_exceptions_count: IntCounter,
    pub relay_exceptions_count: IntCounter,
    pub tx_revert: Histogram,
    pub tx_success: Histogram,
}

impl Metrics {
    pub fn new(prefix: &str) -> Result<Self, prometheus::Error> {
        let registry = if prefix.is_empty() {
            Registry::new()
        } else {
            Registry::new_custom(Some(prefix.to_string()), None)?
        };

        let active_era_id = IntGauge::new("active_era_id", "active era index")?;
        let era_update_delayed = IntGauge::new(
            "era_update_delayed",
            "1 if the era has not been updated for a long time",
        )?;
        let is_recovery_mode_active = IntGauge::new(
            "is_recovery_mode_active",
            "1, if the recovery mode, otherwise - the default mode",
        )?;
        let last_era_reported =
            IntGauge::new("last_era_reported", "the last era that the Oracle has reported")?;
        let last_failed_era = IntGauge::new(
            "last_failed_era",
            "the last era for which sending the report ended with a revert",
        )?;
        let oracle_balance = GaugeVec::new(
            Opts::new("oracle_balance", "the balance of the Oracle in wei"),
            &["address"],
        )?;
        let previous_era_change_block_number = IntGauge::new(
            "previous_era_change_block_number",
            "the number of the block of the previous era change",
        )?;
        let para_exceptions_count =
            IntCounter::new("para_exceptions_count", "parachain exceptions count")?;
        let relay_exceptions_count =
            IntCounter::new("relay_exceptions_count", "relay chain exceptions count")?;
        let tx_revert = Histogram::with_opts(HistogramOpts::new("tx_revert", "reverted transactions"))?;
        let tx_success =
            Histogram::with_opts(HistogramOpts::new("tx_success", "successful transactions"))?;

        registry.register(Box::new(active_era_id.clone()))?;
        registry.register(Box::new(era_update_delayed.clone()))?;
        registry.register(Box::new(is_recovery_mode_active.clone()))?;
        registry.register(Box::new(last_era_reported.clone()))?;
        registry.register(Box::new(last_failed_era.clone()))?;
        registry.register(Box::new(oracle_balance.clone()))?;
        registry.register(Box::new(previous_era_change_block_number.clone()))?;
        registry.register(Box::new(para_exceptions_count.clone()))?;
        registry.register(Box::new(relay_exceptions_count.clone()))?;
        registry.register(Box::new(tx_revert.clone()))?;
        registry.register(Box::new(tx_success.clone()))?;

        Ok(Metrics {
            registry,
            active_era_id,
            era_update_delayed,
            is_recovery_mode_active,
            last_era_reported,
            last_failed_era,
            oracle_balance,
            previous_era_change_block_number,
            para_exceptions_count,
            relay_exceptions_count,
            tx_revert,
            tx_success,
        })
    }

    /// Gather all metrics in the Prometheus text exposition format.
    pub fn gather(&self) -> Result<String, Box<dyn std::error::Error>> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Serve `GET /metrics` until the process exits.
pub async fn serve(metrics: Arc<Metrics>, port: u16) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/metrics", get(scrape))
        .with_state(metrics);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Serving Prometheus metrics on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn scrape(State(metrics): State<Arc<Metrics>>) -> Response {
    match metrics.gather() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
