//! In-process queue and result store.
//!
//! Same delivery semantics as the Redis implementations: one pending
//! message per consume call, redelivery only through `claim_stale`, and
//! set-if-absent result writes. Used by tests and single-process runs.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use enhance_models::{JobId, ResultOutcome};
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::error::{QueueError, QueueResult};
use crate::job::{Delivery, EnhanceJob};
use crate::queue::JobQueue;
use crate::result_store::ResultStore;

struct PendingEntry {
    job: EnhanceJob,
    consumer: String,
    delivered_at: Instant,
    delivery_count: u64,
}

#[derive(Default)]
struct QueueState {
    next_id: u64,
    ready: VecDeque<(String, EnhanceJob)>,
    pending: BTreeMap<String, PendingEntry>,
    crashed: HashSet<String>,
}

/// In-memory [`JobQueue`].
#[derive(Default)]
pub struct InMemoryQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> QueueResult<MutexGuard<'_, QueueState>> {
        self.state
            .lock()
            .map_err(|_| QueueError::dequeue_failed("queue state poisoned"))
    }

    /// Simulate a consumer crash: its pending messages become claimable
    /// immediately, regardless of idle time.
    pub fn abandon_consumer(&self, consumer: &str) -> QueueResult<usize> {
        let mut state = self.lock()?;
        state.crashed.insert(consumer.to_string());
        let orphaned = state
            .pending
            .values()
            .filter(|p| p.consumer == consumer)
            .count();
        info!(consumer, orphaned, "Consumer abandoned");
        Ok(orphaned)
    }

    /// Messages delivered but not yet acknowledged.
    pub fn pending_count(&self) -> QueueResult<usize> {
        Ok(self.lock()?.pending.len())
    }

    /// Messages waiting for a first delivery.
    pub fn ready_count(&self) -> QueueResult<usize> {
        Ok(self.lock()?.ready.len())
    }
}

#[async_trait]
impl JobQueue for InMemoryQueue {
    async fn init(&self) -> QueueResult<()> {
        Ok(())
    }

    async fn enqueue(&self, job: &EnhanceJob) -> QueueResult<String> {
        let message_id = {
            let mut state = self.lock()?;
            state.next_id += 1;
            let message_id = format!("{}-0", state.next_id);
            state.ready.push_back((message_id.clone(), job.clone()));
            message_id
        };

        self.notify.notify_one();
        debug!(job_id = %job.job_id(), "Enqueued job with message ID {}", message_id);
        Ok(message_id)
    }

    async fn consume(&self, consumer: &str, block: Duration) -> QueueResult<Option<Delivery>> {
        let deadline = tokio::time::Instant::now() + block;

        loop {
            {
                let mut state = self.lock()?;
                if let Some((message_id, job)) = state.ready.pop_front() {
                    state.pending.insert(
                        message_id.clone(),
                        PendingEntry {
                            job: job.clone(),
                            consumer: consumer.to_string(),
                            delivered_at: Instant::now(),
                            delivery_count: 1,
                        },
                    );
                    return Ok(Some(Delivery {
                        message_id,
                        job,
                        delivery_count: 1,
                    }));
                }
            }

            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, message_id: &str) -> QueueResult<()> {
        self.lock()?.pending.remove(message_id);
        debug!("Acknowledged job: {}", message_id);
        Ok(())
    }

    async fn claim_stale(
        &self,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        let mut state = self.lock()?;
        let QueueState {
            pending, crashed, ..
        } = &mut *state;

        let mut claimed = Vec::new();
        for (message_id, entry) in pending.iter_mut() {
            if claimed.len() >= count {
                break;
            }
            let stale = crashed.contains(&entry.consumer) || entry.delivered_at.elapsed() >= min_idle;
            if !stale {
                continue;
            }

            entry.consumer = consumer.to_string();
            entry.delivered_at = Instant::now();
            entry.delivery_count += 1;

            info!(
                job_id = %entry.job.job_id(),
                delivery_count = entry.delivery_count,
                "Claimed pending job {}",
                message_id
            );
            claimed.push(Delivery {
                message_id: message_id.clone(),
                job: entry.job.clone(),
                delivery_count: entry.delivery_count,
            });
        }

        Ok(claimed)
    }

    async fn len(&self) -> QueueResult<u64> {
        let state = self.lock()?;
        Ok((state.ready.len() + state.pending.len()) as u64)
    }
}

#[derive(Default)]
struct StoreState {
    records: HashMap<JobId, Vec<u8>>,
    cancelled: HashSet<JobId>,
}

/// In-memory [`ResultStore`]. Records do not expire.
#[derive(Default)]
pub struct InMemoryResultStore {
    state: Mutex<StoreState>,
    operations: AtomicUsize,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> QueueResult<MutexGuard<'_, StoreState>> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        self.state
            .lock()
            .map_err(|_| QueueError::store("result store state poisoned"))
    }

    /// Total calls made against the store.
    pub fn operation_count(&self) -> usize {
        self.operations.load(Ordering::SeqCst)
    }

    /// Records currently held.
    pub fn record_count(&self) -> usize {
        self.state.lock().map(|s| s.records.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn put(&self, job_id: &JobId, outcome: ResultOutcome) -> QueueResult<bool> {
        let mut state = self.lock()?;
        if state.records.contains_key(job_id) {
            return Ok(false);
        }
        state.records.insert(job_id.clone(), outcome.into_bytes());
        Ok(true)
    }

    async fn exists(&self, job_id: &JobId) -> QueueResult<bool> {
        Ok(self.lock()?.records.contains_key(job_id))
    }

    async fn get(&self, job_id: &JobId) -> QueueResult<Option<ResultOutcome>> {
        Ok(self
            .lock()?
            .records
            .get(job_id)
            .cloned()
            .map(ResultOutcome::from_bytes))
    }

    async fn delete(&self, job_id: &JobId) -> QueueResult<()> {
        self.lock()?.records.remove(job_id);
        Ok(())
    }

    async fn take(&self, job_id: &JobId) -> QueueResult<Option<ResultOutcome>> {
        Ok(self
            .lock()?
            .records
            .remove(job_id)
            .map(ResultOutcome::from_bytes))
    }

    async fn mark_cancelled(&self, job_id: &JobId) -> QueueResult<()> {
        self.lock()?.cancelled.insert(job_id.clone());
        Ok(())
    }

    async fn is_cancelled(&self, job_id: &JobId) -> QueueResult<bool> {
        Ok(self.lock()?.cancelled.contains(job_id))
    }
}
