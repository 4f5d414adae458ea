//! Job queue using Redis Streams.
//!
//! Workers share one consumer group, so each message is delivered to exactly
//! one consumer. A message stays pending until acknowledged; messages left
//! pending by a crashed consumer are claimed by a live one.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadReply};
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::job::{Delivery, EnhanceJob, JobMetadata, META_FIELD, PAYLOAD_FIELD};

/// Queue and result store configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for jobs
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Prefix for result and cancellation keys
    pub result_key_prefix: String,
    /// Retention window of result records
    pub result_ttl: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "enhance:jobs".to_string(),
            consumer_group: "enhance:workers".to_string(),
            result_key_prefix: "enhance:result".to_string(),
            result_ttl: Duration::from_secs(3600),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("QUEUE_STREAM").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            result_key_prefix: std::env::var("RESULT_KEY_PREFIX")
                .unwrap_or(defaults.result_key_prefix),
            result_ttl: std::env::var("RESULT_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.result_ttl),
        }
    }
}

/// Competing-consumer job queue with at-least-once delivery.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Prepare the broker (idempotent).
    async fn init(&self) -> QueueResult<()>;

    /// Publish a job. Returns the broker message id.
    async fn enqueue(&self, job: &EnhanceJob) -> QueueResult<String>;

    /// Wait up to `block` for the next new job for `consumer`.
    ///
    /// At most one message is taken per call.
    async fn consume(&self, consumer: &str, block: Duration) -> QueueResult<Option<Delivery>>;

    /// Acknowledge a delivery so it is never redelivered.
    async fn ack(&self, message_id: &str) -> QueueResult<()>;

    /// Take over up to `count` messages pending longer than `min_idle` on any consumer.
    async fn claim_stale(
        &self,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> QueueResult<Vec<Delivery>>;

    /// Number of messages in the stream.
    async fn len(&self) -> QueueResult<u64>;
}

/// Redis Streams backed [`JobQueue`].
pub struct RedisJobQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl RedisJobQueue {
    /// Create a new job queue.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    /// Turn stream entries into deliveries, acknowledging malformed ones.
    async fn collect(
        &self,
        entries: Vec<StreamId>,
        delivery_counts: &HashMap<String, u64>,
    ) -> Vec<Delivery> {
        let mut deliveries = Vec::with_capacity(entries.len());

        for entry in entries {
            let delivery_count = delivery_counts.get(&entry.id).copied().unwrap_or(1);
            match parse_entry(&entry, delivery_count) {
                Ok(delivery) => deliveries.push(delivery),
                Err(e) => {
                    warn!("Dropping malformed message: {}", e);
                    // Ack the malformed message to prevent reprocessing
                    self.ack(&entry.id).await.ok();
                }
            }
        }

        deliveries
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn init(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        // Create consumer group (ignore error if already exists)
        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    async fn enqueue(&self, job: &EnhanceJob) -> QueueResult<String> {
        let mut conn = self.connection().await?;
        let meta = serde_json::to_string(&job.metadata)?;

        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg(META_FIELD)
            .arg(&meta)
            .arg(PAYLOAD_FIELD)
            .arg(job.payload.as_slice())
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::enqueue_failed(e.to_string()))?;

        info!(
            job_id = %job.job_id(),
            model = %job.model(),
            bytes = job.payload.len(),
            "Enqueued job with message ID {}",
            message_id
        );

        Ok(message_id)
    }

    async fn consume(&self, consumer: &str, block: Duration) -> QueueResult<Option<Delivery>> {
        let mut conn = self.connection().await?;

        let reply: StreamReadReply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer)
            .arg("COUNT")
            .arg(1)
            .arg("BLOCK")
            .arg(block.as_millis() as u64)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">") // Only new messages
            .query_async(&mut conn)
            .await?;

        let entries: Vec<StreamId> = reply.keys.into_iter().flat_map(|key| key.ids).collect();
        let mut deliveries = self.collect(entries, &HashMap::new()).await;

        let delivery = deliveries.pop();
        if let Some(delivery) = &delivery {
            debug!(job_id = %delivery.job.job_id(), "Consumed job {} from stream", delivery.message_id);
        }
        Ok(delivery)
    }

    async fn ack(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        // Delete the message from the stream
        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Acknowledged job: {}", message_id);
        Ok(())
    }

    async fn claim_stale(
        &self,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.connection().await?;
        let min_idle_ms = min_idle.as_millis() as u64;

        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        if pending.ids.is_empty() {
            return Ok(Vec::new());
        }

        // XCLAIM bumps the delivery counter by one.
        let delivery_counts: HashMap<String, u64> = pending
            .ids
            .iter()
            .map(|p| (p.id.clone(), p.times_delivered as u64 + 1))
            .collect();

        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer)
            .arg(min_idle_ms);
        for p in &pending.ids {
            cmd.arg(&p.id);
        }

        let claimed: StreamClaimReply = cmd.query_async(&mut conn).await?;
        let deliveries = self.collect(claimed.ids, &delivery_counts).await;

        for delivery in &deliveries {
            info!(
                job_id = %delivery.job.job_id(),
                delivery_count = delivery.delivery_count,
                "Claimed pending job {} from stream",
                delivery.message_id
            );
        }

        Ok(deliveries)
    }

    async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }
}

/// Decode the metadata and binary payload of a stream entry.
fn parse_entry(entry: &StreamId, delivery_count: u64) -> QueueResult<Delivery> {
    let metadata = match entry.map.get(META_FIELD) {
        Some(redis::Value::BulkString(bytes)) => serde_json::from_slice::<JobMetadata>(bytes)
            .map_err(|e| QueueError::malformed(&entry.id, e.to_string()))?,
        _ => return Err(QueueError::malformed(&entry.id, "missing meta field")),
    };

    let payload = match entry.map.get(PAYLOAD_FIELD) {
        Some(redis::Value::BulkString(bytes)) => bytes.clone(),
        _ => return Err(QueueError::malformed(&entry.id, "missing payload field")),
    };

    Ok(Delivery {
        message_id: entry.id.clone(),
        job: EnhanceJob { metadata, payload },
        delivery_count,
    })
}

#[cfg(test)]
mod tests {
    use enhance_models::ModelName;

    use super::*;

    fn entry(fields: Vec<(&str, redis::Value)>) -> StreamId {
        StreamId {
            id: "1700000000000-0".to_string(),
            map: fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        }
    }

    #[test]
    fn test_parse_entry() {
        let job = EnhanceJob::new(ModelName::RealEsrganX4, vec![0x89, b'P', b'N', b'G']);
        let meta = serde_json::to_vec(&job.metadata).unwrap();

        let delivery = parse_entry(
            &entry(vec![
                (META_FIELD, redis::Value::BulkString(meta)),
                (PAYLOAD_FIELD, redis::Value::BulkString(job.payload.clone())),
            ]),
            1,
        )
        .unwrap();

        assert_eq!(delivery.message_id, "1700000000000-0");
        assert_eq!(delivery.job, job);
        assert!(!delivery.is_redelivery());
    }

    #[test]
    fn test_parse_entry_rejects_missing_fields() {
        let err = parse_entry(&entry(vec![]), 1).unwrap_err();
        assert!(matches!(err, QueueError::MalformedMessage { .. }));

        let err = parse_entry(
            &entry(vec![(META_FIELD, redis::Value::BulkString(b"{}".to_vec()))]),
            1,
        )
        .unwrap_err();
        assert!(matches!(err, QueueError::MalformedMessage { .. }));
    }

    #[test]
    fn test_config_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.stream_name, "enhance:jobs");
        assert_eq!(config.consumer_group, "enhance:workers");
        assert_eq!(config.result_key_prefix, "enhance:result");
        assert_eq!(config.result_ttl, Duration::from_secs(3600));
    }
}
