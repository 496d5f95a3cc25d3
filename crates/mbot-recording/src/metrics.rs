//! Recording pipeline metrics.

use metrics::counter;

/// Metric name constants for consistency.
pub mod names {
    /// Chunks that exhausted their write retries.
    pub const CHUNK_WRITE_FAILURES_TOTAL: &str = "mbot_chunk_write_failures_total";

    /// Writers abandoned at the failure ceiling.
    pub const WRITERS_ABANDONED_TOTAL: &str = "mbot_chunk_writers_abandoned_total";

    /// Parts uploaded successfully.
    pub const PARTS_UPLOADED_TOTAL: &str = "mbot_upload_parts_total";

    /// Whole-file restarts after a lost multipart session.
    pub const SESSION_RESTARTS_TOTAL: &str = "mbot_upload_session_restarts_total";

    /// Recording uploads by outcome.
    pub const UPLOADS_TOTAL: &str = "mbot_uploads_total";
}

pub fn record_chunk_write_failure() {
    counter!(names::CHUNK_WRITE_FAILURES_TOTAL).increment(1);
}

pub fn record_writer_abandoned() {
    counter!(names::WRITERS_ABANDONED_TOTAL).increment(1);
}

pub fn record_part_uploaded() {
    counter!(names::PARTS_UPLOADED_TOTAL).increment(1);
}

pub fn record_session_restart() {
    counter!(names::SESSION_RESTARTS_TOTAL).increment(1);
}

pub fn record_upload(success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(names::UPLOADS_TOTAL, "status" => status).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        assert!(names::PARTS_UPLOADED_TOTAL.starts_with("mbot_"));
        assert!(names::SESSION_RESTARTS_TOTAL.contains("restarts"));
    }
}
