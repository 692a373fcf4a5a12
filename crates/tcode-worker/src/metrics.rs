//! Worker metrics.

use std::net::SocketAddr;

use metrics::counter;
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{WorkerError, WorkerResult};

pub mod names {
    pub const JOBS_COMPLETED_TOTAL: &str = "tcode_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "tcode_jobs_failed_total";
    pub const JOBS_SKIPPED_TOTAL: &str = "tcode_jobs_skipped_total";
    pub const JOBS_DEAD_LETTERED_TOTAL: &str = "tcode_jobs_dead_lettered_total";
}

/// Install the Prometheus recorder and serve `/metrics` on `addr`.
pub fn init_metrics(addr: SocketAddr) -> WorkerResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("metrics exporter: {}", e)))
}

pub fn record_job_completed() {
    counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
}

pub fn record_job_failed() {
    counter!(names::JOBS_FAILED_TOTAL).increment(1);
}

pub fn record_job_skipped() {
    counter!(names::JOBS_SKIPPED_TOTAL).increment(1);
}

pub fn record_job_dead_lettered() {
    counter!(names::JOBS_DEAD_LETTERED_TOTAL).increment(1);
}
