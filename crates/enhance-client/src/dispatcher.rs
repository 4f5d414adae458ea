//! Job submission and result polling.

use std::sync::Arc;

use enhance_models::{JobId, ModelName, ResultOutcome, Selector};
use enhance_queue::{EnhanceJob, JobQueue, ResultStore};
use image::GenericImageView;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

/// Submits jobs and collects their results.
///
/// Holds explicit handles to the queue and result store; nothing is
/// connected implicitly.
pub struct Dispatcher {
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn ResultStore>,
    config: ClientConfig,
}

impl Dispatcher {
    pub fn new(queue: Arc<dyn JobQueue>, store: Arc<dyn ResultStore>, config: ClientConfig) -> Self {
        Self {
            queue,
            store,
            config,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Validate and enqueue an image for the model `selector` resolves to.
    ///
    /// Invalid selectors and undecodable images are rejected before the
    /// queue or the result store is touched.
    pub async fn submit(&self, image: &[u8], selector: Selector) -> ClientResult<JobId> {
        let model = selector.resolve()?;
        validate_image(image)?;
        self.enqueue(model, image.to_vec()).await
    }

    async fn enqueue(&self, model: ModelName, payload: Vec<u8>) -> ClientResult<JobId> {
        let job = EnhanceJob::new(model, payload);
        let job_id = job.job_id().clone();

        let message_id = self
            .queue
            .enqueue(&job)
            .await
            .map_err(ClientError::QueueUnavailable)?;

        info!(
            job_id = %job_id,
            model = %model,
            message_id = %message_id,
            "Job submitted"
        );
        Ok(job_id)
    }

    /// Poll once. Consumes the record if one exists.
    pub async fn try_fetch(&self, job_id: &JobId) -> ClientResult<Option<Vec<u8>>> {
        match self
            .store
            .take(job_id)
            .await
            .map_err(ClientError::StoreUnavailable)?
        {
            Some(ResultOutcome::Success(bytes)) => Ok(Some(bytes)),
            Some(ResultOutcome::Failure) => {
                warn!(job_id = %job_id, "Job finished with failure outcome");
                Err(ClientError::ProcessingFailed {
                    job_id: job_id.clone(),
                })
            }
            None => Ok(None),
        }
    }

    /// Poll until a result arrives or the polling budget is spent.
    pub async fn fetch_result(&self, job_id: &JobId) -> ClientResult<Vec<u8>> {
        let attempts = self.config.poll_attempts;

        for attempt in 1..=attempts {
            if let Some(bytes) = self.try_fetch(job_id).await? {
                info!(job_id = %job_id, attempt, bytes = bytes.len(), "Result received");
                return Ok(bytes);
            }

            debug!(job_id = %job_id, attempt, attempts, "Result not ready");
            if attempt < attempts {
                tokio::time::sleep(self.config.poll_interval).await;
            }
        }

        warn!(job_id = %job_id, attempts, "Gave up waiting for result");
        Err(ClientError::ResultTimeout {
            job_id: job_id.clone(),
            attempts,
        })
    }

    /// Submit and wait for the enhanced image.
    pub async fn enhance(&self, image: &[u8], selector: Selector) -> ClientResult<Vec<u8>> {
        let job_id = self.submit(image, selector).await?;
        self.fetch_result(&job_id).await
    }

    /// Ask the worker processing `job_id` to stop at its next tile boundary.
    ///
    /// A cancelled job still produces a failure record.
    pub async fn cancel(&self, job_id: &JobId) -> ClientResult<()> {
        self.store
            .mark_cancelled(job_id)
            .await
            .map_err(ClientError::StoreUnavailable)?;
        info!(job_id = %job_id, "Cancellation requested");
        Ok(())
    }
}

/// Reject payloads that do not decode to a non-empty image.
fn validate_image(bytes: &[u8]) -> ClientResult<()> {
    if bytes.is_empty() {
        return Err(ClientError::decode("empty payload"));
    }

    let decoded = image::load_from_memory(bytes).map_err(|e| ClientError::decode(e.to_string()))?;
    let (width, height) = decoded.dimensions();
    if width == 0 || height == 0 {
        return Err(ClientError::decode("image has zero width or height"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::io::Cursor;
    use std::time::Duration;

    use async_trait::async_trait;
    use enhance_queue::{Delivery, InMemoryQueue, InMemoryResultStore, QueueError, QueueResult};
    use image::{DynamicImage, ImageOutputFormat, RgbImage};

    use super::*;

    struct Harness {
        queue: Arc<InMemoryQueue>,
        store: Arc<InMemoryResultStore>,
        dispatcher: Dispatcher,
    }

    fn harness(poll_attempts: u32) -> Harness {
        let queue = Arc::new(InMemoryQueue::new());
        let store = Arc::new(InMemoryResultStore::new());
        let dispatcher = Dispatcher::new(
            queue.clone(),
            store.clone(),
            ClientConfig {
                poll_attempts,
                poll_interval: Duration::from_millis(5),
            },
        );
        Harness {
            queue,
            store,
            dispatcher,
        }
    }

    fn png() -> Vec<u8> {
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::new(4, 3))
            .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)
            .unwrap();
        buf
    }

    struct UnreachableQueue;

    #[async_trait]
    impl JobQueue for UnreachableQueue {
        async fn init(&self) -> QueueResult<()> {
            Err(QueueError::connection_failed("refused"))
        }

        async fn enqueue(&self, _job: &EnhanceJob) -> QueueResult<String> {
            Err(QueueError::connection_failed("refused"))
        }

        async fn consume(&self, _consumer: &str, _block: Duration) -> QueueResult<Option<Delivery>> {
            Err(QueueError::connection_failed("refused"))
        }

        async fn ack(&self, _message_id: &str) -> QueueResult<()> {
            Err(QueueError::connection_failed("refused"))
        }

        async fn claim_stale(
            &self,
            _consumer: &str,
            _min_idle: Duration,
            _count: usize,
        ) -> QueueResult<Vec<Delivery>> {
            Err(QueueError::connection_failed("refused"))
        }

        async fn len(&self) -> QueueResult<u64> {
            Err(QueueError::connection_failed("refused"))
        }
    }

    #[tokio::test]
    async fn test_submit_enqueues_resolved_model() {
        let h = harness(1);
        let image = png();

        let job_id = h
            .dispatcher
            .submit(&image, Selector::Upscale { scale: 4 })
            .await
            .unwrap();

        let delivery = h.queue.consume("worker", Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(delivery.job.job_id(), &job_id);
        assert_eq!(delivery.job.model(), ModelName::RealEsrganX4);
        assert_eq!(delivery.job.payload, image);
    }

    #[tokio::test]
    async fn test_invalid_selector_rejected_without_side_effects() {
        let h = harness(1);

        let err = h
            .dispatcher
            .submit(&png(), Selector::Upscale { scale: 3 })
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::InvalidSelector(_)));
        assert_eq!(h.queue.len().await.unwrap(), 0);
        assert_eq!(h.store.operation_count(), 0);
    }

    #[tokio::test]
    async fn test_undecodable_image_rejected() {
        let h = harness(1);

        let err = h.dispatcher.submit(b"GIF89a-truncated", Selector::Deblur).await.unwrap_err();
        assert!(matches!(err, ClientError::Decode(_)));
        assert!(err.is_rejection());
        assert_eq!(h.queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_queue_unavailable_issues_no_job() {
        let store = Arc::new(InMemoryResultStore::new());
        let dispatcher = Dispatcher::new(Arc::new(UnreachableQueue), store.clone(), ClientConfig::default());

        let err = dispatcher.submit(&png(), Selector::Denoise).await.unwrap_err();
        assert!(matches!(err, ClientError::QueueUnavailable(_)));
        assert!(err.is_retryable());
        assert_eq!(store.operation_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_submissions_get_distinct_ids() {
        let h = Arc::new(harness(1));
        let image = Arc::new(png());

        let handles: Vec<_> = (0..64)
            .map(|_| {
                let h = Arc::clone(&h);
                let image = Arc::clone(&image);
                tokio::spawn(async move { h.dispatcher.submit(&image, Selector::Denoise).await })
            })
            .collect();

        let mut ids = HashSet::new();
        for handle in handles {
            ids.insert(handle.await.unwrap().unwrap());
        }
        assert_eq!(ids.len(), 64);
        assert_eq!(h.queue.len().await.unwrap(), 64);
    }

    #[tokio::test]
    async fn test_fetch_is_read_once() {
        let h = harness(3);
        let job_id = JobId::new();
        h.store
            .put(&job_id, ResultOutcome::Success(vec![1, 2, 3]))
            .await
            .unwrap();

        assert_eq!(h.dispatcher.fetch_result(&job_id).await.unwrap(), vec![1, 2, 3]);
        assert_eq!(h.dispatcher.try_fetch(&job_id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fetch_waits_for_late_result() {
        let h = Arc::new(harness(50));
        let job_id = JobId::new();

        let writer = {
            let h = Arc::clone(&h);
            let job_id = job_id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                h.store.put(&job_id, ResultOutcome::Success(vec![9])).await.unwrap();
            })
        };

        assert_eq!(h.dispatcher.fetch_result(&job_id).await.unwrap(), vec![9]);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_failure_outcome() {
        let h = harness(3);
        let job_id = JobId::new();
        h.store.put(&job_id, ResultOutcome::Failure).await.unwrap();

        let err = h.dispatcher.fetch_result(&job_id).await.unwrap_err();
        assert!(matches!(err, ClientError::ProcessingFailed { .. }));
    }

    #[tokio::test]
    async fn test_missing_result_times_out() {
        let h = harness(3);
        let job_id = JobId::new();

        let err = h.dispatcher.fetch_result(&job_id).await.unwrap_err();
        match err {
            ClientError::ResultTimeout { job_id: id, attempts } => {
                assert_eq!(id, job_id);
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_cancel_marks_job() {
        let h = harness(1);
        let job_id = JobId::new();

        tokio_test::assert_ok!(h.dispatcher.cancel(&job_id).await);
        assert!(h.store.is_cancelled(&job_id).await.unwrap());
    }
}
