//! Redis Streams queue tests. Run with `--ignored` against a live Redis.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use recipe_models::UserId;
use recipe_queue::{
    JobQueue, QueueConfig, QueueJob, SendDailyEmailJob, SendWelcomeEmailJob, TaskQueue,
};

/// Queue on throwaway stream names so runs never see each other's jobs.
async fn scratch_queue() -> JobQueue {
    dotenvy::dotenv().ok();
    let run = uuid::Uuid::new_v4().simple().to_string();
    let config = QueueConfig {
        stream_name: format!("test:{run}:jobs"),
        consumer_group: format!("test:{run}:workers"),
        dlq_stream_name: format!("test:{run}:dlq"),
        key_prefix: format!("test:{run}"),
        max_retries: 2,
        ..QueueConfig::from_env()
    };
    let queue = JobQueue::new(config).expect("queue config");
    queue.init().await.expect("queue init");
    queue
}

fn welcome() -> QueueJob {
    QueueJob::SendWelcomeEmail(SendWelcomeEmailJob::new(UserId::new()))
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn enqueue_consume_ack() {
    let queue = scratch_queue().await;
    queue.ping().await.expect("ping");

    let job = welcome();
    queue.enqueue(job.clone()).await.expect("enqueue");

    let jobs = queue.consume("it-consumer", 1000, 1).await.expect("consume");
    assert_eq!(jobs.len(), 1);
    let (message_id, consumed) = &jobs[0];
    assert_eq!(consumed.job_id(), job.job_id());

    queue.ack(message_id).await.expect("ack");
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn duplicate_jobs_are_rejected_until_cleared() {
    let queue = scratch_queue().await;
    let job = welcome();

    queue.enqueue(job.clone()).await.expect("first enqueue");
    let err = queue.enqueue(job.clone()).await.unwrap_err();
    assert!(err.is_duplicate());

    queue.clear_dedup(&job.idempotency_key()).await.expect("clear");
    queue.enqueue(job).await.expect("enqueue after clear");
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn retries_count_up_and_dlq_collects() {
    let queue = scratch_queue().await;
    let job = welcome();
    queue.enqueue(job.clone()).await.expect("enqueue");
    let (message_id, _) = queue
        .consume("it-consumer", 1000, 1)
        .await
        .expect("consume")
        .remove(0);

    assert_eq!(queue.increment_retry(&message_id).await.unwrap(), 1);
    assert_eq!(queue.increment_retry(&message_id).await.unwrap(), 2);

    queue.dlq(&message_id, &job, "boom").await.expect("dlq");
    assert_eq!(queue.dlq_len().await.unwrap(), 1);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn concurrent_enqueues_of_one_slot_add_a_single_entry() {
    let queue = Arc::new(scratch_queue().await);
    let slot = Utc.with_ymd_and_hms(2024, 3, 4, 6, 0, 0).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                queue
                    .enqueue(QueueJob::SendDailyEmail(SendDailyEmailJob::new(slot)))
                    .await
            })
        })
        .collect();

    let mut accepted = 0;
    for handle in handles {
        match handle.await.expect("task") {
            Ok(_) => accepted += 1,
            Err(e) => assert!(e.is_duplicate(), "unexpected error: {e}"),
        }
    }
    assert_eq!(accepted, 1);
    assert_eq!(queue.len().await.unwrap(), 1);
}
