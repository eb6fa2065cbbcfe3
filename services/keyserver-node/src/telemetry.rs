//! Outcome gauge export and the metrics HTTP endpoint

use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use chrono::Utc;
use keyserver_core::{LastOutcome, Outcome, OutcomeSink};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde_json::{json, Value};
use std::sync::Arc;

pub const RESULT_GAUGE: &str = "keyserver_result";

/// Install the global Prometheus recorder and describe the outcome gauge.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus recorder: {e}"))?;
    metrics::describe_gauge!(
        RESULT_GAUGE,
        "Keyserver run result (0 = error, 0.5 = warning, 1 = noop or success)"
    );
    Ok(handle)
}

/// Sets the `keyserver_result` gauge and keeps the value for `/health`.
#[derive(Debug, Default)]
pub struct PrometheusOutcomeSink {
    last: LastOutcome,
}

impl PrometheusOutcomeSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<f64> {
        self.last.get()
    }
}

impl OutcomeSink for PrometheusOutcomeSink {
    fn record_outcome(&self, outcome: Outcome) {
        metrics::gauge!(RESULT_GAUGE, outcome.gauge_value());
        self.last.record_outcome(outcome);
    }
}

#[derive(Clone)]
pub struct MetricsState {
    pub handle: PrometheusHandle,
    pub sink: Arc<PrometheusOutcomeSink>,
}

pub fn router(state: MetricsState) -> Router {
    Router::new()
        .route("/metrics", get(render_metrics))
        .route("/health", get(health_check))
        .with_state(state)
}

async fn render_metrics(State(state): State<MetricsState>) -> String {
    state.handle.render()
}

async fn health_check(State(state): State<MetricsState>) -> Result<Json<Value>, StatusCode> {
    Ok(Json(health_body(state.sink.last())))
}

fn health_body(last_result: Option<f64>) -> Value {
    json!({
        "status": "healthy",
        "service": "keyserver",
        "last_result": last_result,
        "timestamp": Utc::now().to_rfc3339()
    })
}
