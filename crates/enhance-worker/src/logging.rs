//! Structured job logging and subscriber setup.

use enhance_models::{JobId, JobState, ModelName};
use tracing::{error, info, warn, Span};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize tracing with colored output for dev, JSON when `LOG_FORMAT=json`.
pub fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("enhance=info,ort=warn"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

/// Lifecycle logging for one job.
///
/// Every line carries the job id and model, and state changes are logged
/// with the state name.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    model: ModelName,
}

impl JobLogger {
    pub fn new(job_id: &JobId, model: ModelName) -> Self {
        Self {
            job_id: job_id.to_string(),
            model,
        }
    }

    /// Log a transition of the job state machine.
    pub fn log_state(&self, state: JobState) {
        info!(
            job_id = %self.job_id,
            model = %self.model,
            state = state.as_str(),
            "Job {}", state
        );
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            model = %self.model,
            "Job started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            model = %self.model,
            "Job progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            model = %self.model,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            model = %self.model,
            "Job error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            model = %self.model,
            "Job completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn model(&self) -> ModelName {
        self.model
    }

    /// Span attached to everything done on behalf of this job.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            model = %self.model
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_logger_creation() {
        let job_id = JobId::new();
        let logger = JobLogger::new(&job_id, ModelName::Scunet);

        assert_eq!(logger.job_id(), job_id.to_string());
        assert_eq!(logger.model(), ModelName::Scunet);
    }
}
