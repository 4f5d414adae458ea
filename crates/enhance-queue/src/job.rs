//! Job definitions carried on the stream.

use chrono::{DateTime, Utc};
use enhance_models::{JobId, ModelName};
use serde::{Deserialize, Serialize};

/// Stream field holding the JSON metadata.
pub const META_FIELD: &str = "meta";
/// Stream field holding the raw encoded image.
pub const PAYLOAD_FIELD: &str = "payload";

/// Routing metadata of a job. Serialized next to the binary payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMetadata {
    pub job_id: JobId,
    pub model: ModelName,
    pub submitted_at: DateTime<Utc>,
}

/// One enhancement request: metadata plus the encoded input image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnhanceJob {
    pub metadata: JobMetadata,
    pub payload: Vec<u8>,
}

impl EnhanceJob {
    /// Create a job with a fresh id.
    pub fn new(model: ModelName, payload: Vec<u8>) -> Self {
        Self::with_id(JobId::new(), model, payload)
    }

    pub fn with_id(job_id: JobId, model: ModelName, payload: Vec<u8>) -> Self {
        Self {
            metadata: JobMetadata {
                job_id,
                model,
                submitted_at: Utc::now(),
            },
            payload,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.metadata.job_id
    }

    pub fn model(&self) -> ModelName {
        self.metadata.model
    }
}

/// A job handed to a consumer, pending until acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Broker message id, used to acknowledge.
    pub message_id: String,
    pub job: EnhanceJob,
    /// 1 on first delivery, higher after a crash recovery claim.
    pub delivery_count: u64,
}

impl Delivery {
    pub fn is_redelivery(&self) -> bool {
        self.delivery_count > 1
    }
}
