use metrics::counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

use super::tiers::TierKind;

pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Safe to call more than once.
pub fn init_metrics() -> Option<PrometheusHandle> {
    if let Some(handle) = METRICS_HANDLE.get() {
        return Some(handle.clone());
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            let _ = METRICS_HANDLE.set(handle.clone());
            Some(handle)
        }
        Err(e) => {
            tracing::error!("Failed to install Prometheus recorder: {}", e);
            None
        }
    }
}

pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string())
}

/// Record which tier answered a role lookup (`none` when all missed).
pub fn record_role_resolution(tier: Option<TierKind>) {
    let source = tier.map(|t| t.as_str()).unwrap_or("none");
    counter!("role_resolutions_total", "source" => source).increment(1);
}

pub fn record_auth_event(kind: &'static str, outcome: &'static str) {
    counter!("auth_events_total", "event" => kind, "outcome" => outcome).increment(1);
}

pub fn record_load(outcome: &'static str) {
    counter!("session_loads_total", "outcome" => outcome).increment(1);
}
