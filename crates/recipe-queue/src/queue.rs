//! Job queue using Redis Streams.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::job::QueueJob;
use crate::memory::InMemoryQueue;

/// Seconds a job's idempotency key blocks duplicates.
const DEDUP_TTL_SECS: u64 = 3600;

/// Seconds a per-message retry counter is kept.
const RETRY_TTL_SECS: i64 = 86_400;

/// Which queue implementation to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueBackend {
    #[default]
    Redis,
    Memory,
}

impl FromStr for QueueBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(QueueBackend::Redis),
            "memory" => Ok(QueueBackend::Memory),
            other => Err(format!("unknown queue backend: {other}")),
        }
    }
}

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub backend: QueueBackend,
    /// Redis URL
    pub redis_url: String,
    /// Stream name for jobs
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Dead letter queue stream name
    pub dlq_stream_name: String,
    /// Max retries before DLQ
    pub max_retries: u32,
    /// Prefix for dedup and retry keys
    pub key_prefix: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Redis,
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "recipes:jobs".to_string(),
            consumer_group: "recipes:workers".to_string(),
            dlq_stream_name: "recipes:dlq".to_string(),
            max_retries: 3,
            key_prefix: "recipes".to_string(),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            backend: std::env::var("QUEUE_BACKEND")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.backend),
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("QUEUE_STREAM").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            dlq_stream_name: std::env::var("QUEUE_DLQ_STREAM").unwrap_or(defaults.dlq_stream_name),
            max_retries: std::env::var("QUEUE_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
            key_prefix: defaults.key_prefix,
        }
    }
}

/// Operations shared by the Redis and in-memory queues.
///
/// Delivery is at-least-once: a consumed job stays pending until it is
/// acked or moved to the dead letter queue.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Add a job. Fails with `QueueError::Duplicate` while an identical job
    /// (same idempotency key) is still within its dedup window.
    async fn enqueue(&self, job: QueueJob) -> QueueResult<String>;

    /// Read up to `count` new jobs, waiting at most `block_ms` when empty.
    async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<(String, QueueJob)>>;

    /// Take over jobs another consumer left pending for at least `min_idle_ms`.
    async fn claim_pending(
        &self,
        consumer_name: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<(String, QueueJob)>>;

    /// Mark a job completed.
    async fn ack(&self, message_id: &str) -> QueueResult<()>;

    /// Move a job to the dead letter queue and ack the original.
    async fn dlq(&self, message_id: &str, job: &QueueJob, error: &str) -> QueueResult<()>;

    /// Bump and return the retry counter of a message.
    async fn increment_retry(&self, message_id: &str) -> QueueResult<u32>;

    /// Release a job's idempotency key so it can be enqueued again.
    async fn clear_dedup(&self, idempotency_key: &str) -> QueueResult<()>;

    async fn len(&self) -> QueueResult<u64>;

    async fn dlq_len(&self) -> QueueResult<u64>;

    async fn ping(&self) -> QueueResult<()>;

    fn max_retries(&self) -> u32;
}

/// Build the queue selected by `config.backend` and make it ready for use.
pub async fn connect(config: QueueConfig) -> QueueResult<Arc<dyn TaskQueue>> {
    match config.backend {
        QueueBackend::Redis => {
            let queue = JobQueue::new(config)?;
            queue.init().await?;
            Ok(Arc::new(queue))
        }
        QueueBackend::Memory => {
            info!("Using in-memory task queue");
            Ok(Arc::new(InMemoryQueue::new(config.max_retries)))
        }
    }
}

/// Redis Streams job queue client.
pub struct JobQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl JobQueue {
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    /// Initialize the queue (create consumer group if not exists).
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;

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

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    fn dedup_key(&self, idempotency_key: &str) -> String {
        format!("{}:dedup:{}", self.config.key_prefix, idempotency_key)
    }

    fn retry_key(&self, message_id: &str) -> String {
        format!("{}:retry:{}", self.config.key_prefix, message_id)
    }

    /// Decode stream entries, acking any payload that cannot be parsed.
    async fn decode_entries(
        &self,
        entries: Vec<redis::streams::StreamId>,
    ) -> QueueResult<Vec<(String, QueueJob)>> {
        let mut jobs = Vec::new();
        for entry in entries {
            let message_id = entry.id.clone();
            if let Some(redis::Value::BulkString(payload)) = entry.map.get("job") {
                let payload_str = String::from_utf8_lossy(payload);
                match serde_json::from_str::<QueueJob>(&payload_str) {
                    Ok(job) => jobs.push((message_id, job)),
                    Err(e) => {
                        warn!("Failed to parse job payload {}: {}", message_id, e);
                        self.ack(&message_id).await.ok();
                    }
                }
            }
        }
        Ok(jobs)
    }
}

#[async_trait]
impl TaskQueue for JobQueue {
    async fn enqueue(&self, job: QueueJob) -> QueueResult<String> {
        let mut conn = self.connection().await?;

        let payload = serde_json::to_string(&job)?;
        let idempotency_key = job.idempotency_key();

        // Claim the dedup key atomically before the stream write.
        let dedup_key = self.dedup_key(&idempotency_key);
        let claimed: Option<String> = redis::cmd("SET")
            .arg(&dedup_key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(DEDUP_TTL_SECS)
            .query_async(&mut conn)
            .await?;
        if claimed.is_none() {
            warn!("Duplicate job rejected: {}", idempotency_key);
            return Err(QueueError::duplicate(idempotency_key));
        }

        let added: redis::RedisResult<String> = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .arg("key")
            .arg(&idempotency_key)
            .query_async(&mut conn)
            .await;
        let message_id = match added {
            Ok(message_id) => message_id,
            Err(e) => {
                if let Err(cleanup) = conn.del::<_, ()>(&dedup_key).await {
                    warn!("Failed to release dedup key {}: {}", dedup_key, cleanup);
                }
                return Err(e.into());
            }
        };

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
        let mut conn = self.connection().await?;

        let result: redis::streams::StreamReadReply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let entries = result.keys.into_iter().flat_map(|k| k.ids).collect();
        let jobs = self.decode_entries(entries).await?;
        for (_, job) in &jobs {
            debug!("Consumed job {} from stream", job.job_id());
        }
        Ok(jobs)
    }

    async fn claim_pending(
        &self,
        consumer_name: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<(String, QueueJob)>> {
        let mut conn = self.connection().await?;

        // Only entries idle long enough; XCLAIM re-checks the idle time
        let pending: redis::streams::StreamPendingCountReply = redis::cmd("XPENDING")
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

        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(min_idle_ms);
        for entry in &pending.ids {
            cmd.arg(&entry.id);
        }
        let claimed: redis::streams::StreamClaimReply = cmd.query_async(&mut conn).await?;

        let jobs = self.decode_entries(claimed.ids).await?;
        for (message_id, job) in &jobs {
            info!("Claimed pending job {} ({})", job.job_id(), message_id);
        }
        Ok(jobs)
    }

    async fn ack(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Acknowledged job: {}", message_id);
        Ok(())
    }

    async fn dlq(&self, message_id: &str, job: &QueueJob, error: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        let payload = serde_json::to_string(job)?;

        redis::cmd("XADD")
            .arg(&self.config.dlq_stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .arg("error")
            .arg(error)
            .arg("original_id")
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        self.ack(message_id).await?;

        warn!("Moved job {} to DLQ: {}", job.job_id(), error);
        Ok(())
    }

    async fn increment_retry(&self, message_id: &str) -> QueueResult<u32> {
        let mut conn = self.connection().await?;

        let key = self.retry_key(message_id);
        let count: u32 = conn.incr(&key, 1).await?;
        conn.expire::<_, ()>(&key, RETRY_TTL_SECS).await?;
        Ok(count)
    }

    async fn clear_dedup(&self, idempotency_key: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(self.dedup_key(idempotency_key)).await?;
        Ok(())
    }

    async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }

    async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.xlen(&self.config.dlq_stream_name).await?;
        Ok(len)
    }

    async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    fn max_retries(&self) -> u32 {
        self.config.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_parses_case_insensitively() {
        assert_eq!("Memory".parse::<QueueBackend>().unwrap(), QueueBackend::Memory);
        assert_eq!(" redis ".parse::<QueueBackend>().unwrap(), QueueBackend::Redis);
        assert!("kafka".parse::<QueueBackend>().is_err());
    }

    #[test]
    fn keys_use_prefix() {
        let queue = JobQueue::new(QueueConfig::default()).unwrap();
        assert_eq!(queue.dedup_key("welcome:1"), "recipes:dedup:welcome:1");
        assert_eq!(queue.retry_key("1-0"), "recipes:retry:1-0");
    }

    #[tokio::test]
    async fn connect_builds_memory_backend() {
        let queue = connect(QueueConfig {
            backend: QueueBackend::Memory,
            max_retries: 5,
            ..Default::default()
        })
        .await
        .unwrap();
        assert_eq!(queue.max_retries(), 5);
        queue.ping().await.unwrap();
    }
}
