//! Structured job logging utilities.
//!
//! Every line logged for a job carries the same correlation id, provider,
//! user and team so a single meeting can be followed across retries.

use mbot_models::{CorrelationId, JoinRequest};
use tracing::{error, info, warn, Span};

/// Job logger for structured logging with consistent formatting.
#[derive(Debug, Clone)]
pub struct JobLogger {
    correlation_id: String,
    provider: String,
    user_id: String,
    team_id: String,
}

impl JobLogger {
    /// Create a logger for a join request under a fresh correlation id.
    pub fn for_request(request: &JoinRequest) -> Self {
        Self::new(
            &CorrelationId::new(),
            &request.provider.to_string(),
            &request.user_id,
            &request.team_id,
        )
    }

    pub fn new(correlation_id: &CorrelationId, provider: &str, user_id: &str, team_id: &str) -> Self {
        Self {
            correlation_id: correlation_id.to_string(),
            provider: provider.to_string(),
            user_id: user_id.to_string(),
            team_id: team_id.to_string(),
        }
    }

    /// Log the start of a job attempt.
    pub fn log_start(&self, message: &str) {
        info!(
            correlation_id = %self.correlation_id,
            provider = %self.provider,
            user_id = %self.user_id,
            team_id = %self.team_id,
            "Job started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            correlation_id = %self.correlation_id,
            provider = %self.provider,
            user_id = %self.user_id,
            team_id = %self.team_id,
            "Job progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            correlation_id = %self.correlation_id,
            provider = %self.provider,
            user_id = %self.user_id,
            team_id = %self.team_id,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            correlation_id = %self.correlation_id,
            provider = %self.provider,
            user_id = %self.user_id,
            team_id = %self.team_id,
            "Job error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            correlation_id = %self.correlation_id,
            provider = %self.provider,
            user_id = %self.user_id,
            team_id = %self.team_id,
            "Job completed: {}", message
        );
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Span for instrumenting the job future.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            correlation_id = %self.correlation_id,
            provider = %self.provider,
            user_id = %self.user_id,
            team_id = %self.team_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_logger_creation() {
        let id = CorrelationId::from_string("corr-1");
        let logger = JobLogger::new(&id, "zoom", "user-1", "team-1");

        assert_eq!(logger.correlation_id(), "corr-1");
        assert_eq!(logger.user_id(), "user-1");
    }
}
