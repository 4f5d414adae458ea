//! Client error types.

use enhance_models::{JobId, ModelError};
use enhance_queue::QueueError;
use thiserror::Error;

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Input is not a decodable image: {0}")]
    Decode(String),

    #[error("Invalid operation selector: {0}")]
    InvalidSelector(#[from] ModelError),

    #[error("Job queue unavailable: {0}")]
    QueueUnavailable(QueueError),

    #[error("Result store unavailable: {0}")]
    StoreUnavailable(QueueError),

    #[error("No result for job {job_id} after {attempts} polls")]
    ResultTimeout { job_id: JobId, attempts: u32 },

    #[error("Processing failed for job {job_id}")]
    ProcessingFailed { job_id: JobId },
}

impl ClientError {
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Whether the caller may retry later.
    ///
    /// A timeout means "not ready yet", not a processing error.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::ResultTimeout { .. } => true,
            ClientError::QueueUnavailable(e) | ClientError::StoreUnavailable(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Rejected before a job id was issued.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ClientError::Decode(_) | ClientError::InvalidSelector(_) | ClientError::QueueUnavailable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_distinct_from_failure() {
        let id = JobId::from_string("job-1");
        let timeout = ClientError::ResultTimeout {
            job_id: id.clone(),
            attempts: 60,
        };
        let failed = ClientError::ProcessingFailed { job_id: id };

        assert!(timeout.is_retryable());
        assert!(!failed.is_retryable());
        assert!(!timeout.is_rejection());
        assert!(!failed.is_rejection());
    }

    #[test]
    fn test_submission_errors_are_rejections() {
        assert!(ClientError::decode("bad header").is_rejection());
        assert!(ClientError::from(ModelError::UnsupportedScale(3)).is_rejection());
    }
}
