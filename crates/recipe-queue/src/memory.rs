//! In-process queue with the same delivery semantics as the Redis queue.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::counter;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::job::QueueJob;
use crate::queue::TaskQueue;

const DEDUP_TTL: Duration = Duration::from_secs(3600);

struct Pending {
    job: QueueJob,
    consumer: String,
    delivered_at: Instant,
}

#[derive(Default)]
struct State {
    next_id: u64,
    ready: VecDeque<(String, QueueJob)>,
    pending: HashMap<String, Pending>,
    dedup: HashMap<String, Instant>,
    retries: HashMap<String, u32>,
    dead: Vec<(QueueJob, String)>,
}

/// Queue kept in process memory.
///
/// Used by tests and single-process deployments; jobs do not survive a restart.
pub struct InMemoryQueue {
    state: Mutex<State>,
    notify: Notify,
    max_retries: u32,
}

impl InMemoryQueue {
    pub fn new(max_retries: u32) -> Self {
        Self {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            max_retries,
        }
    }

    /// Jobs waiting to be consumed, oldest first.
    pub async fn queued_jobs(&self) -> Vec<QueueJob> {
        let state = self.state.lock().await;
        state.ready.iter().map(|(_, job)| job.clone()).collect()
    }

    /// Jobs moved to the dead letter queue with their errors.
    pub async fn dead_letters(&self) -> Vec<(QueueJob, String)> {
        self.state.lock().await.dead.clone()
    }

    async fn take_ready(&self, consumer_name: &str, count: usize) -> Vec<(String, QueueJob)> {
        let mut state = self.state.lock().await;
        let mut taken = Vec::new();
        while taken.len() < count {
            let Some((message_id, job)) = state.ready.pop_front() else {
                break;
            };
            state.pending.insert(
                message_id.clone(),
                Pending {
                    job: job.clone(),
                    consumer: consumer_name.to_string(),
                    delivered_at: Instant::now(),
                },
            );
            taken.push((message_id, job));
        }
        taken
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new(3)
    }
}

#[async_trait]
impl TaskQueue for InMemoryQueue {
    async fn enqueue(&self, job: QueueJob) -> QueueResult<String> {
        let idempotency_key = job.idempotency_key();
        let message_id = {
            let mut state = self.state.lock().await;
            let now = Instant::now();
            state.dedup.retain(|_, expires| *expires > now);
            if state.dedup.contains_key(&idempotency_key) {
                warn!("Duplicate job rejected: {}", idempotency_key);
                return Err(QueueError::duplicate(idempotency_key));
            }

            state.next_id += 1;
            let message_id = format!("{}-0", state.next_id);
            state.dedup.insert(idempotency_key, now + DEDUP_TTL);
            state.ready.push_back((message_id.clone(), job.clone()));
            message_id
        };

        self.notify.notify_one();
        counter!("recipe_jobs_enqueued_total", "kind" => job.kind()).increment(1);
        info!(
            "Enqueued {} job {} with message ID {}",
            job.kind(),
            job.job_id(),
            message_id
        );
        Ok(message_id)
    }

    async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<(String, QueueJob)>> {
        let jobs = self.take_ready(consumer_name, count).await;
        if !jobs.is_empty() || block_ms == 0 {
            return Ok(jobs);
        }

        let _ = tokio::time::timeout(Duration::from_millis(block_ms), self.notify.notified()).await;
        Ok(self.take_ready(consumer_name, count).await)
    }

    async fn claim_pending(
        &self,
        consumer_name: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<(String, QueueJob)>> {
        let min_idle = Duration::from_millis(min_idle_ms);
        let mut state = self.state.lock().await;

        let mut idle: Vec<String> = state
            .pending
            .iter()
            .filter(|(_, p)| p.delivered_at.elapsed() >= min_idle)
            .map(|(id, _)| id.clone())
            .collect();
        idle.sort();
        idle.truncate(count);

        let mut claimed = Vec::new();
        for message_id in idle {
            if let Some(pending) = state.pending.get_mut(&message_id) {
                debug!(
                    "Claiming {} from {} for {}",
                    message_id, pending.consumer, consumer_name
                );
                pending.consumer = consumer_name.to_string();
                pending.delivered_at = Instant::now();
                claimed.push((message_id, pending.job.clone()));
            }
        }
        Ok(claimed)
    }

    async fn ack(&self, message_id: &str) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        state.pending.remove(message_id);
        state.retries.remove(message_id);
        debug!("Acknowledged job: {}", message_id);
        Ok(())
    }

    async fn dlq(&self, message_id: &str, job: &QueueJob, error: &str) -> QueueResult<()> {
        {
            let mut state = self.state.lock().await;
            state.dead.push((job.clone(), error.to_string()));
        }
        self.ack(message_id).await?;
        warn!("Moved job {} to DLQ: {}", job.job_id(), error);
        Ok(())
    }

    async fn increment_retry(&self, message_id: &str) -> QueueResult<u32> {
        let mut state = self.state.lock().await;
        let count = state.retries.entry(message_id.to_string()).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn clear_dedup(&self, idempotency_key: &str) -> QueueResult<()> {
        self.state.lock().await.dedup.remove(idempotency_key);
        Ok(())
    }

    async fn len(&self) -> QueueResult<u64> {
        let state = self.state.lock().await;
        Ok((state.ready.len() + state.pending.len()) as u64)
    }

    async fn dlq_len(&self) -> QueueResult<u64> {
        Ok(self.state.lock().await.dead.len() as u64)
    }

    async fn ping(&self) -> QueueResult<()> {
        Ok(())
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }
}
