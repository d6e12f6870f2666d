//! Prometheus metrics

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;

/// Setup Prometheus metrics exporter
/// Returns a handle that can be used to retrieve metrics
pub fn setup_metrics() -> Result<metrics_exporter_prometheus::PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    tracing::info!("Prometheus metrics exporter installed");

    Ok(handle)
}

/// Record a download run starting
pub fn record_download_started(model_id: &str) {
    metrics::counter!("model_manager_downloads_started_total",
        "model" => model_id.to_string()
    )
    .increment(1);
}

pub fn record_download_completed(model_id: &str) {
    metrics::counter!("model_manager_downloads_completed_total",
        "model" => model_id.to_string()
    )
    .increment(1);
}

pub fn record_download_failed(model_id: &str) {
    metrics::counter!("model_manager_downloads_failed_total",
        "model" => model_id.to_string()
    )
    .increment(1);
}

/// Record a single file that could not be fetched
pub fn record_file_fetch_failure(model_id: &str) {
    metrics::counter!("model_manager_file_fetch_failures_total",
        "model" => model_id.to_string()
    )
    .increment(1);
}

/// Record a validation outcome ("valid" or "invalid")
pub fn record_validation(model_id: &str, outcome: &'static str) {
    metrics::counter!("model_manager_validations_total",
        "model" => model_id.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_model_loaded(model_id: &str, device: &str) {
    metrics::counter!("model_manager_loads_total",
        "model" => model_id.to_string(),
        "device" => device.to_string()
    )
    .increment(1);
}

pub fn record_model_unloaded(model_id: &str) {
    metrics::counter!("model_manager_unloads_total",
        "model" => model_id.to_string()
    )
    .increment(1);
}

/// Record an idle eviction
pub fn record_eviction(model_id: &str) {
    metrics::counter!("model_manager_evictions_total",
        "model" => model_id.to_string()
    )
    .increment(1);
}

pub fn record_benchmark(model_id: &str) {
    metrics::counter!("model_manager_benchmarks_total",
        "model" => model_id.to_string()
    )
    .increment(1);
}

/// Update loaded model count gauge
pub fn update_loaded_count(count: usize) {
    metrics::gauge!("model_manager_loaded_models").set(count as f64);
}

/// Update in-flight download gauge
pub fn update_downloads_in_flight(count: usize) {
    metrics::gauge!("model_manager_downloads_in_flight").set(count as f64);
}
