//! Metrics collection for identity-service.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Later calls are no-ops.
pub fn init_metrics() {
    if METRICS_HANDLE.get().is_some() {
        return;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            let _ = METRICS_HANDLE.set(handle);
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Prometheus recorder");
        }
    }
}

/// Get metrics output in Prometheus text format.
pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string())
}

pub fn record_request_created(purpose: &'static str, mode: u8) {
    metrics::counter!(
        "requests_created_total",
        "purpose" => purpose,
        "mode" => mode.to_string()
    )
    .increment(1);
}

pub fn record_idp_response(status: &'static str) {
    metrics::counter!("idp_responses_total", "status" => status).increment(1);
}

pub fn record_as_data(service_id: &str) {
    metrics::counter!("as_data_total", "service_id" => service_id.to_string()).increment(1);
}

pub fn record_request_closed(reason: &'static str) {
    metrics::counter!("requests_closed_total", "reason" => reason).increment(1);
}

pub fn record_identity_change(purpose: &'static str, needs_consent: bool) {
    metrics::counter!(
        "identity_changes_total",
        "purpose" => purpose,
        "consent" => needs_consent.to_string()
    )
    .increment(1);
}
