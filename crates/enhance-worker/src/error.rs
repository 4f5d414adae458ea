//! Worker error types.

use enhance_media::MediaError;
use enhance_models::ModelError;
use enhance_queue::QueueError;
use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Failed to load model {model}: {message}")]
    ModelLoad { model: String, message: String },

    #[error("Job cancelled")]
    Cancelled,

    #[error("Processing failed: {0}")]
    ProcessingFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Queue operation failed: {0}")]
    QueueFailed(String),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Media error: {0}")]
    Media(MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<MediaError> for WorkerError {
    fn from(e: MediaError) -> Self {
        match e {
            MediaError::ModelLoad { model, message } => WorkerError::ModelLoad { model, message },
            MediaError::Cancelled => WorkerError::Cancelled,
            other => WorkerError::Media(other),
        }
    }
}

impl WorkerError {
    pub fn processing_failed(msg: impl Into<String>) -> Self {
        Self::ProcessingFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn queue_failed(msg: impl Into<String>) -> Self {
        Self::QueueFailed(msg.into())
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Queue(e) => e.is_retryable(),
            WorkerError::QueueFailed(_) => true,
            _ => false,
        }
    }

    pub fn is_model_load(&self) -> bool {
        matches!(self, WorkerError::ModelLoad { .. })
    }

    /// Short label for the failure metric.
    pub fn reason(&self) -> &'static str {
        match self {
            WorkerError::ModelLoad { .. } => "model_load",
            WorkerError::Cancelled => "cancelled",
            WorkerError::Media(e) => e.kind(),
            WorkerError::Model(_) => "model",
            WorkerError::ProcessingFailed(_) => "processing",
            WorkerError::ConfigError(_) => "config",
            WorkerError::QueueFailed(_) | WorkerError::Queue(_) => "queue",
            WorkerError::Io(_) => "io",
        }
    }
}
