//! Error types for media operations.

use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while enhancing an image.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Failed to load model {model}: {message}")]
    ModelLoad { model: String, message: String },

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Tile {index}/{total} failed: {message}")]
    TileFailed {
        index: usize,
        total: usize,
        message: String,
    },

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Tensor shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MediaError {
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    pub fn invalid_image(message: impl Into<String>) -> Self {
        Self::InvalidImage(message.into())
    }

    /// Create a model load error.
    pub fn model_load(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ModelLoad {
            model: model.into(),
            message: message.into(),
        }
    }

    pub fn inference(message: impl Into<String>) -> Self {
        Self::Inference(message.into())
    }

    /// Create a tile failure error. `index` is 1-based.
    pub fn tile_failed(index: usize, total: usize, message: impl Into<String>) -> Self {
        Self::TileFailed {
            index,
            total,
            message: message.into(),
        }
    }

    pub fn shape_mismatch(message: impl Into<String>) -> Self {
        Self::ShapeMismatch(message.into())
    }

    /// Short label used for metrics and failure logs.
    pub fn kind(&self) -> &'static str {
        match self {
            MediaError::Decode(_) => "decode",
            MediaError::Image(_) => "encode",
            MediaError::InvalidImage(_) => "invalid_image",
            MediaError::ModelLoad { .. } => "model_load",
            MediaError::Inference(_) => "inference",
            MediaError::TileFailed { .. } => "tile_failed",
            MediaError::ShapeMismatch(_) | MediaError::Shape(_) => "shape",
            MediaError::Cancelled => "cancelled",
            MediaError::Io(_) => "io",
        }
    }
}
