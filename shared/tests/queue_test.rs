use std::time::Duration;

use serde_json::json;
use shared::queue::{EnqueueOptions, QueueName};
use shared::test_support::TestEnvironment;
use shared::JobQueue;

#[tokio::test]
async fn enqueue_and_dequeue_lifecycle() {
    let env = TestEnvironment::new().await.unwrap();
    let queue = JobQueue::new(env.pool().clone());

    let result = queue
        .enqueue(QueueName::Default, "file:sync", json!({"account_id": "a1"}), EnqueueOptions::default())
        .await
        .unwrap();

    let batch = queue.dequeue_batch(QueueName::Default, 10).await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].job_id, result.job_id);
    assert_eq!(batch[0].retry_count, 0);

    // A second dequeue sees nothing: the row is already `started`.
    let second = queue.dequeue_batch(QueueName::Default, 10).await.unwrap();
    assert!(second.is_empty());
}

#[tokio::test]
async fn unique_window_dedups_within_window() {
    let env = TestEnvironment::new().await.unwrap();
    let queue = JobQueue::new(env.pool().clone());

    let opts = EnqueueOptions {
        unique_window: Some(Duration::from_secs(300)),
        ..Default::default()
    };
    let payload = json!({"account_id": "a1"});

    let first = queue
        .enqueue(QueueName::Default, "file:sync", payload.clone(), opts.clone())
        .await
        .unwrap();
    let second = queue
        .enqueue(QueueName::Default, "file:sync", payload, opts)
        .await
        .unwrap();

    assert_eq!(first.job_id, second.job_id);

    let pending = queue.pending_count(QueueName::Default).await.unwrap();
    assert_eq!(pending, 1);
}

#[tokio::test]
async fn mark_failed_retries_then_dead_letters() {
    let env = TestEnvironment::new().await.unwrap();
    let queue = JobQueue::new(env.pool().clone());

    let opts = EnqueueOptions {
        max_retries: Some(2),
        ..Default::default()
    };
    let enqueued = queue
        .enqueue(QueueName::Critical, "file:sync", json!({}), opts)
        .await
        .unwrap();

    let batch = queue.dequeue_batch(QueueName::Critical, 1).await.unwrap();
    assert_eq!(batch.len(), 1);

    let first_status = queue
        .mark_failed(&enqueued.job_id, Duration::from_secs(0))
        .await
        .unwrap();
    assert_eq!(first_status, shared::JobStatus::Retried);

    // Requeued by the zero backoff; claim it again and fail a second time.
    let retried_batch = queue.dequeue_batch(QueueName::Critical, 1).await.unwrap();
    assert_eq!(retried_batch.len(), 1);
    assert_eq!(retried_batch[0].retry_count, 1);

    let second_status = queue
        .mark_failed(&enqueued.job_id, Duration::from_secs(0))
        .await
        .unwrap();
    assert_eq!(second_status, shared::JobStatus::Failed);

    let pending = queue.pending_count(QueueName::Critical).await.unwrap();
    assert_eq!(pending, 0);
}

#[tokio::test]
async fn mark_dead_letter_bypasses_retry_count() {
    let env = TestEnvironment::new().await.unwrap();
    let queue = JobQueue::new(env.pool().clone());

    let enqueued = queue
        .enqueue(QueueName::Default, "file:sync", json!({}), EnqueueOptions::default())
        .await
        .unwrap();
    queue.dequeue_batch(QueueName::Default, 1).await.unwrap();

    queue.mark_dead_letter(&enqueued.job_id).await.unwrap();

    let pending = queue.pending_count(QueueName::Default).await.unwrap();
    assert_eq!(pending, 0);

    // Recovering stale-started jobs must not resurrect a dead-lettered one.
    let recovered = queue.recover_stale_started(Duration::from_secs(0)).await.unwrap();
    assert_eq!(recovered, 0);
}

#[tokio::test]
async fn recover_stale_started_requeues_abandoned_jobs() {
    let env = TestEnvironment::new().await.unwrap();
    let queue = JobQueue::new(env.pool().clone());

    queue
        .enqueue(QueueName::Low, "file:sync", json!({}), EnqueueOptions::default())
        .await
        .unwrap();
    let claimed = queue.dequeue_batch(QueueName::Low, 1).await.unwrap();
    assert_eq!(claimed.len(), 1);

    let recovered = queue.recover_stale_started(Duration::from_secs(0)).await.unwrap();
    assert_eq!(recovered, 1);

    let pending = queue.pending_count(QueueName::Low).await.unwrap();
    assert_eq!(pending, 1);
}
