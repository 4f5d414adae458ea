//! Job executor.
//!
//! One executor is one consumer: it holds at most one unacknowledged message
//! at a time and fully processes it (pad, tile, stitch, store) before asking
//! the queue for the next. Horizontal scaling is done by running more workers.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use enhance_media::CancelToken;
use enhance_models::{JobId, JobState, ResultOutcome};
use enhance_queue::{Delivery, JobQueue, ResultStore};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::logging::JobLogger;
use crate::metrics;
use crate::processor::JobProcessor;
use crate::retry::{FailureTracker, RetryPolicy};

/// Job executor that processes jobs from the queue.
pub struct JobExecutor {
    config: WorkerConfig,
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn ResultStore>,
    processor: Arc<JobProcessor>,
    shutdown: watch::Sender<bool>,
    consumer_name: String,
    last_claim: Mutex<Option<Instant>>,
}

impl JobExecutor {
    pub fn new(
        config: WorkerConfig,
        queue: Arc<dyn JobQueue>,
        store: Arc<dyn ResultStore>,
        processor: Arc<JobProcessor>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            queue,
            store,
            processor,
            shutdown,
            consumer_name: format!("worker-{}", Uuid::new_v4()),
            last_claim: Mutex::new(None),
        }
    }

    pub fn with_consumer_name(mut self, consumer_name: impl Into<String>) -> Self {
        self.consumer_name = consumer_name.into();
        self
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    /// Consume until [`shutdown`](Self::shutdown) is called.
    ///
    /// A job already being processed is finished before returning.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(consumer = %self.consumer_name, "Starting job executor");

        self.queue.init().await?;

        let mut shutdown_rx = self.shutdown.subscribe();
        let mut failures = FailureTracker::new(5);

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let next = tokio::select! {
                _ = shutdown_rx.changed() => {
                    info!("Shutdown signal received, stopping executor");
                    break;
                }
                next = self.next_delivery() => next,
            };

            match next {
                Ok(Some(delivery)) => {
                    failures.record_success();
                    self.handle_delivery(delivery).await;
                }
                Ok(None) => failures.record_success(),
                Err(e) => {
                    if failures.record_failure() {
                        error!("Error consuming jobs: {}", e);
                    }
                    let backoff = failures.backoff(Duration::from_millis(200), Duration::from_secs(5));
                    tokio::time::sleep(backoff).await;
                }
            }
        }

        info!("Job executor stopped");
        Ok(())
    }

    /// Process at most one job. Returns the state it ended in, if any.
    pub async fn run_once(&self) -> WorkerResult<Option<JobState>> {
        match self.next_delivery().await? {
            Some(delivery) => Ok(Some(self.handle_delivery(delivery).await)),
            None => Ok(None),
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Claim an abandoned job when a scan is due, otherwise wait for a new one.
    async fn next_delivery(&self) -> WorkerResult<Option<Delivery>> {
        if self.claim_due() {
            let claimed = self
                .queue
                .claim_stale(&self.consumer_name, self.config.claim_min_idle, 1)
                .await?;
            if let Some(delivery) = claimed.into_iter().next() {
                info!(job_id = %delivery.job.job_id(), "Recovered job from a dead consumer");
                // Scan again right away; there may be more.
                self.reset_claim_timer();
                return Ok(Some(delivery));
            }
        }

        Ok(self
            .queue
            .consume(&self.consumer_name, self.config.block_time)
            .await?)
    }

    fn claim_due(&self) -> bool {
        let Ok(mut last) = self.last_claim.lock() else {
            return false;
        };
        let due = last.map_or(true, |at| at.elapsed() >= self.config.claim_interval);
        if due {
            *last = Some(Instant::now());
        }
        due
    }

    fn reset_claim_timer(&self) {
        if let Ok(mut last) = self.last_claim.lock() {
            *last = None;
        }
    }

    /// Process one delivery, record its outcome, then acknowledge it.
    ///
    /// The outcome is written before the ack. If the write fails the message
    /// is left pending so another attempt can record it.
    pub async fn handle_delivery(&self, delivery: Delivery) -> JobState {
        let logger = JobLogger::new(delivery.job.job_id(), delivery.job.model());
        let span = logger.create_span();
        self.handle_delivery_inner(delivery, logger).instrument(span).await
    }

    async fn handle_delivery_inner(&self, delivery: Delivery, logger: JobLogger) -> JobState {
        let job = &delivery.job;
        let job_id = job.job_id().clone();
        let model = job.model();
        logger.log_state(JobState::Delivered);

        if delivery.is_redelivery() {
            metrics::record_redelivery(model.as_str());
            logger.log_warning(&format!("redelivered, attempt {}", delivery.delivery_count));

            // An earlier attempt may have stored the outcome and died before acking.
            match self.store.exists(&job_id).await {
                Ok(true) => {
                    logger.log_progress("outcome already recorded, acknowledging duplicate");
                    self.ack(&delivery, &logger).await;
                    return JobState::Completed;
                }
                Ok(false) => {}
                Err(e) => logger.log_warning(&format!("could not check for existing result: {}", e)),
            }
        }

        let cancel = CancelToken::new();
        match self.store.is_cancelled(&job_id).await {
            Ok(true) => cancel.cancel(),
            Ok(false) => {}
            Err(e) => logger.log_warning(&format!("could not check cancellation: {}", e)),
        }
        let watcher = self.spawn_cancel_watcher(job_id.clone(), cancel.clone());

        logger.log_state(JobState::Processing);
        logger.log_start(&format!("{} bytes", job.payload.len()));
        let start = Instant::now();
        let result = self.processor.process(job, cancel, &logger).await;
        watcher.abort();
        let elapsed = start.elapsed().as_secs_f64();

        let (outcome, state) = match result {
            Ok(output) => {
                logger.log_completion(&format!(
                    "{}x{} in {:.2}s",
                    output.width, output.height, elapsed
                ));
                metrics::record_job_completed(model.as_str(), elapsed);
                (ResultOutcome::Success(output.png), JobState::Completed)
            }
            Err(e) => {
                logger.log_error(&e.to_string());
                metrics::record_job_failed(model.as_str(), e.reason(), elapsed);
                (ResultOutcome::Failure, JobState::Failed)
            }
        };

        if !self.store_outcome(&job_id, outcome, &logger).await {
            return JobState::Processing;
        }

        self.ack(&delivery, &logger).await;
        logger.log_state(state);
        state
    }

    /// Returns `false` if the outcome could not be stored.
    async fn store_outcome(&self, job_id: &JobId, outcome: ResultOutcome, logger: &JobLogger) -> bool {
        let written = RetryPolicy::new("result write")
            .run(|| self.store.put(job_id, outcome.clone()))
            .await;

        match written {
            Ok(true) => true,
            Ok(false) => {
                logger.log_warning("outcome already recorded by an earlier attempt, keeping it");
                true
            }
            Err(e) => {
                metrics::record_result_write_failure();
                logger.log_error(&format!("failed to store outcome, leaving message pending: {}", e));
                false
            }
        }
    }

    async fn ack(&self, delivery: &Delivery, logger: &JobLogger) {
        let acked = RetryPolicy::new("ack")
            .run(|| self.queue.ack(&delivery.message_id))
            .await;

        if let Err(e) = acked {
            // Left pending; a later claim sees the stored outcome and acks it.
            logger.log_error(&format!("failed to ack {}: {}", delivery.message_id, e));
        }
    }

    /// Poll for a cancellation request while the job runs.
    fn spawn_cancel_watcher(&self, job_id: JobId, token: CancelToken) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let interval = self.config.cancel_poll_interval.max(Duration::from_millis(10));

        tokio::spawn(async move {
            let mut failures = FailureTracker::new(3);
            loop {
                tokio::time::sleep(interval).await;
                match store.is_cancelled(&job_id).await {
                    Ok(true) => {
                        info!(job_id = %job_id, "Cancellation requested, stopping at next tile");
                        token.cancel();
                        break;
                    }
                    Ok(false) => failures.record_success(),
                    Err(e) => {
                        if failures.record_failure() {
                            warn!(job_id = %job_id, "Failed to check cancellation: {}", e);
                        }
                    }
                }
            }
        })
    }
}
