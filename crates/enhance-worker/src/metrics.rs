//! Prometheus metrics for the worker.

use std::net::SocketAddr;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{WorkerError, WorkerResult};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_COMPLETED_TOTAL: &str = "enhance_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "enhance_jobs_failed_total";
    pub const JOBS_REDELIVERED_TOTAL: &str = "enhance_jobs_redelivered_total";
    pub const JOB_DURATION_SECONDS: &str = "enhance_job_duration_seconds";
    pub const RESULT_WRITE_FAILURES_TOTAL: &str = "enhance_result_write_failures_total";
}

/// Install the Prometheus recorder with an HTTP listener on `port`.
pub fn init_metrics(port: u16) -> WorkerResult<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("Failed to install Prometheus exporter: {}", e)))
}

pub fn record_job_completed(model: &str, duration_secs: f64) {
    counter!(names::JOBS_COMPLETED_TOTAL, "model" => model.to_string()).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, "model" => model.to_string()).record(duration_secs);
}

pub fn record_job_failed(model: &str, reason: &str, duration_secs: f64) {
    counter!(
        names::JOBS_FAILED_TOTAL,
        "model" => model.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
    histogram!(names::JOB_DURATION_SECONDS, "model" => model.to_string()).record(duration_secs);
}

pub fn record_redelivery(model: &str) {
    counter!(names::JOBS_REDELIVERED_TOTAL, "model" => model.to_string()).increment(1);
}

pub fn record_result_write_failure() {
    counter!(names::RESULT_WRITE_FAILURES_TOTAL).increment(1);
}
