//! Redis queue and result store integration tests.

use std::time::Duration;

use enhance_models::{JobId, ModelName, ResultOutcome};
use enhance_queue::{EnhanceJob, JobQueue, QueueConfig, RedisJobQueue, RedisResultStore, ResultStore};

/// Config with a stream and key prefix private to one test run.
fn isolated_config() -> QueueConfig {
    dotenvy::dotenv().ok();
    let run = JobId::new();
    QueueConfig {
        stream_name: format!("enhance:test:{}:jobs", run),
        result_key_prefix: format!("enhance:test:{}:result", run),
        result_ttl: Duration::from_secs(60),
        ..QueueConfig::from_env()
    }
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_enqueue_consume_ack() {
    let queue = RedisJobQueue::new(isolated_config()).expect("Failed to create queue");
    queue.init().await.expect("Failed to initialize queue");
    queue.init().await.expect("init must be idempotent");

    let job = EnhanceJob::new(ModelName::RealEsrganX2, vec![0, 159, 146, 150, 255]);
    queue.enqueue(&job).await.expect("Failed to enqueue");

    let delivery = queue
        .consume("test-consumer", Duration::from_millis(1000))
        .await
        .expect("Failed to consume")
        .expect("Expected a delivery");
    assert_eq!(delivery.job, job);
    assert_eq!(delivery.delivery_count, 1);

    queue.ack(&delivery.message_id).await.expect("Failed to ack");
    assert_eq!(queue.len().await.expect("Failed to get length"), 0);

    let next = queue
        .consume("test-consumer", Duration::from_millis(100))
        .await
        .expect("Failed to consume");
    assert!(next.is_none());
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_unacked_message_is_claimed_by_another_consumer() {
    let queue = RedisJobQueue::new(isolated_config()).expect("Failed to create queue");
    queue.init().await.expect("Failed to initialize queue");

    let job = EnhanceJob::new(ModelName::Mlwnet, b"image".to_vec());
    queue.enqueue(&job).await.expect("Failed to enqueue");

    // Consumer A takes the job and "crashes" without acknowledging.
    let first = queue
        .consume("consumer-a", Duration::from_millis(1000))
        .await
        .expect("Failed to consume")
        .expect("Expected a delivery");

    tokio::time::sleep(Duration::from_millis(200)).await;

    let claimed = queue
        .claim_stale("consumer-b", Duration::from_millis(100), 10)
        .await
        .expect("Failed to claim");
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].message_id, first.message_id);
    assert_eq!(claimed[0].job, job);
    assert!(claimed[0].is_redelivery());

    queue.ack(&claimed[0].message_id).await.expect("Failed to ack");
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_result_store_write_once_read_once() {
    let store = RedisResultStore::new(&isolated_config()).expect("Failed to create store");
    let job_id = JobId::new();

    assert!(store
        .put(&job_id, ResultOutcome::Success(vec![1, 2, 3]))
        .await
        .expect("Failed to put"));
    assert!(!store
        .put(&job_id, ResultOutcome::Failure)
        .await
        .expect("Failed to put"));

    assert_eq!(
        store.take(&job_id).await.expect("Failed to take"),
        Some(ResultOutcome::Success(vec![1, 2, 3]))
    );
    assert_eq!(store.take(&job_id).await.expect("Failed to take"), None);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_failure_sentinel_and_cancellation() {
    let store = RedisResultStore::new(&isolated_config()).expect("Failed to create store");
    let job_id = JobId::new();

    store.put(&job_id, ResultOutcome::Failure).await.expect("Failed to put");
    assert_eq!(
        store.get(&job_id).await.expect("Failed to get"),
        Some(ResultOutcome::Failure)
    );
    store.delete(&job_id).await.expect("Failed to delete");
    assert!(!store.exists(&job_id).await.expect("Failed to check"));

    assert!(!store.is_cancelled(&job_id).await.expect("Failed to check"));
    store.mark_cancelled(&job_id).await.expect("Failed to cancel");
    assert!(store.is_cancelled(&job_id).await.expect("Failed to check"));
}
