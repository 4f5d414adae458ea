//! Result records keyed by job id.
//!
//! A record is written once by the worker that processed the job and read
//! and deleted once by the first successful fetch. Records expire after the
//! configured retention window.

use std::time::Duration;

use async_trait::async_trait;
use enhance_models::{JobId, ResultOutcome};
use redis::AsyncCommands;
use tracing::{debug, info};

use crate::error::{QueueError, QueueResult};
use crate::queue::QueueConfig;

/// Write-once, read-once store of terminal job outcomes.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Store the outcome unless a record already exists.
    ///
    /// Returns `false` when an earlier record was kept.
    async fn put(&self, job_id: &JobId, outcome: ResultOutcome) -> QueueResult<bool>;

    async fn exists(&self, job_id: &JobId) -> QueueResult<bool>;

    async fn get(&self, job_id: &JobId) -> QueueResult<Option<ResultOutcome>>;

    async fn delete(&self, job_id: &JobId) -> QueueResult<()>;

    /// Atomically read and delete the record.
    async fn take(&self, job_id: &JobId) -> QueueResult<Option<ResultOutcome>>;

    /// Ask the worker running `job_id` to stop at its next tile boundary.
    async fn mark_cancelled(&self, job_id: &JobId) -> QueueResult<()>;

    async fn is_cancelled(&self, job_id: &JobId) -> QueueResult<bool>;
}

/// Redis backed [`ResultStore`].
pub struct RedisResultStore {
    client: redis::Client,
    key_prefix: String,
    ttl: Duration,
}

impl RedisResultStore {
    pub fn new(config: &QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self {
            client,
            key_prefix: config.result_key_prefix.clone(),
            ttl: config.result_ttl,
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(&QueueConfig::from_env())
    }

    fn result_key(&self, job_id: &JobId) -> String {
        format!("{}:{}", self.key_prefix, job_id)
    }

    fn cancel_key(&self, job_id: &JobId) -> String {
        format!("{}:cancel:{}", self.key_prefix, job_id)
    }

    fn ttl_secs(&self) -> u64 {
        self.ttl.as_secs().max(1)
    }

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }
}

#[async_trait]
impl ResultStore for RedisResultStore {
    async fn put(&self, job_id: &JobId, outcome: ResultOutcome) -> QueueResult<bool> {
        let mut conn = self.connection().await?;
        let success = outcome.is_success();

        // SET NX replies nil when the key already exists.
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.result_key(job_id))
            .arg(outcome.into_bytes())
            .arg("NX")
            .arg("EX")
            .arg(self.ttl_secs())
            .query_async(&mut conn)
            .await?;

        let written = reply.is_some();
        if written {
            info!(job_id = %job_id, success, "Stored job result");
        } else {
            info!(job_id = %job_id, "Result already stored, keeping existing record");
        }
        Ok(written)
    }

    async fn exists(&self, job_id: &JobId) -> QueueResult<bool> {
        let mut conn = self.connection().await?;
        let exists: bool = conn.exists(self.result_key(job_id)).await?;
        Ok(exists)
    }

    async fn get(&self, job_id: &JobId) -> QueueResult<Option<ResultOutcome>> {
        let mut conn = self.connection().await?;
        let bytes: Option<Vec<u8>> = conn.get(self.result_key(job_id)).await?;
        Ok(bytes.map(ResultOutcome::from_bytes))
    }

    async fn delete(&self, job_id: &JobId) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(self.result_key(job_id)).await?;
        debug!(job_id = %job_id, "Deleted job result");
        Ok(())
    }

    async fn take(&self, job_id: &JobId) -> QueueResult<Option<ResultOutcome>> {
        let mut conn = self.connection().await?;
        let bytes: Option<Vec<u8>> = redis::cmd("GETDEL")
            .arg(self.result_key(job_id))
            .query_async(&mut conn)
            .await?;

        if bytes.is_some() {
            debug!(job_id = %job_id, "Took job result");
        }
        Ok(bytes.map(ResultOutcome::from_bytes))
    }

    async fn mark_cancelled(&self, job_id: &JobId) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        conn.set_ex::<_, _, ()>(self.cancel_key(job_id), "1", self.ttl_secs())
            .await?;
        info!(job_id = %job_id, "Cancellation requested");
        Ok(())
    }

    async fn is_cancelled(&self, job_id: &JobId) -> QueueResult<bool> {
        let mut conn = self.connection().await?;
        let exists: bool = conn.exists(self.cancel_key(job_id)).await?;
        Ok(exists)
    }
}
