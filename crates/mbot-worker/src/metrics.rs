//! Worker metrics.

use std::net::{Ipv4Addr, SocketAddr};

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Metric names as constants for consistency.
pub mod names {
    /// 1 while a job is running.
    pub const WORKER_BUSY: &str = "mbot_worker_busy";

    /// Admission attempts by result.
    pub const JOBS_ADMITTED_TOTAL: &str = "mbot_jobs_admitted_total";

    /// Finished jobs by outcome.
    pub const JOBS_COMPLETED_TOTAL: &str = "mbot_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "mbot_jobs_failed_total";

    /// Attempts retried after a failure.
    pub const JOB_RETRIES_TOTAL: &str = "mbot_job_retries_total";

    /// Queue messages that could not be parsed.
    pub const MALFORMED_MESSAGES_TOTAL: &str = "mbot_queue_malformed_messages_total";
}

/// Serve Prometheus metrics on `0.0.0.0:port`.
pub fn init_exporter(port: u16) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
        .install()
}

pub fn set_busy(busy: bool) {
    gauge!(names::WORKER_BUSY).set(if busy { 1.0 } else { 0.0 });
}

pub fn record_admission(accepted: bool) {
    let result = if accepted { "accepted" } else { "rejected" };
    counter!(names::JOBS_ADMITTED_TOTAL, "result" => result).increment(1);
}

pub fn record_job_completed() {
    counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
}

pub fn record_job_failed(reason: &'static str) {
    counter!(names::JOBS_FAILED_TOTAL, "reason" => reason).increment(1);
}

pub fn record_job_retry() {
    counter!(names::JOB_RETRIES_TOTAL).increment(1);
}

pub fn record_malformed_message() {
    counter!(names::MALFORMED_MESSAGES_TOTAL).increment(1);
}
