//! Job executor.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use recipe_queue::{QueueJob, TaskQueue};

use crate::context::JobContext;
use crate::email_job::{send_daily_email, send_welcome_email};
use crate::error::{WorkerError, WorkerResult};
use crate::export_job::{cleanup_old_exports, export_user_data};
use crate::image_job::process_recipe_image;
use crate::logging::JobLogger;

/// Most jobs read from the queue in one call.
const CONSUME_BATCH: usize = 5;
/// How long a consume call waits for new jobs.
const CONSUME_BLOCK_MS: u64 = 1000;

/// What happened to a job after one execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// Left pending; another attempt follows once it is reclaimed
    Retrying(u32),
    DeadLettered,
}

/// Consumes jobs from the queue and runs them with bounded concurrency.
pub struct JobExecutor {
    ctx: Arc<JobContext>,
    queue: Arc<dyn TaskQueue>,
    job_semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
    consumer_name: String,
}

impl JobExecutor {
    pub fn new(ctx: JobContext, queue: Arc<dyn TaskQueue>) -> Self {
        let job_semaphore = Arc::new(Semaphore::new(ctx.config.max_concurrent_jobs));
        let (shutdown, _) = watch::channel(false);
        Self {
            ctx: Arc::new(ctx),
            queue,
            job_semaphore,
            shutdown,
            consumer_name: format!("worker-{}", Uuid::new_v4()),
        }
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    /// Receiver that flips to true when [`JobExecutor::shutdown`] is called.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Consume until shutdown, then wait for in-flight jobs.
    pub async fn run(&self) -> WorkerResult<()> {
        let config = &self.ctx.config;
        info!(
            "Starting job executor '{}' with {} max concurrent jobs",
            self.consumer_name, config.max_concurrent_jobs
        );

        let claim_task = tokio::spawn(Self::claim_loop(
            Arc::clone(&self.ctx),
            Arc::clone(&self.queue),
            Arc::clone(&self.job_semaphore),
            self.consumer_name.clone(),
            self.shutdown.subscribe(),
        ));

        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                }
                result = self.consume_jobs() => {
                    if let Err(e) = result {
                        error!("Error consuming jobs: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        claim_task.abort();

        info!("Waiting for in-flight jobs to complete...");
        if tokio::time::timeout(config.shutdown_timeout, self.wait_for_jobs())
            .await
            .is_err()
        {
            warn!(
                "Jobs still running after {:?}; they will be reclaimed by another worker",
                config.shutdown_timeout
            );
        }

        info!("Job executor stopped");
        Ok(())
    }

    /// Periodically take over jobs left pending by crashed consumers or
    /// by failed attempts waiting for a retry.
    async fn claim_loop(
        ctx: Arc<JobContext>,
        queue: Arc<dyn TaskQueue>,
        semaphore: Arc<Semaphore>,
        consumer_name: String,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let min_idle_ms = ctx.config.claim_min_idle.as_millis() as u64;
        let mut interval = tokio::time::interval(ctx.config.claim_interval);
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    let jobs = match queue.claim_pending(&consumer_name, min_idle_ms, CONSUME_BATCH).await {
                        Ok(jobs) => jobs,
                        Err(e) => {
                            warn!("Failed to claim pending jobs: {}", e);
                            continue;
                        }
                    };
                    if !jobs.is_empty() {
                        info!("Claimed {} pending jobs", jobs.len());
                    }
                    for (message_id, job) in jobs {
                        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                            return;
                        };
                        let ctx = Arc::clone(&ctx);
                        let queue = Arc::clone(&queue);
                        tokio::spawn(async move {
                            let _permit = permit;
                            Self::execute_job(&ctx, queue.as_ref(), &message_id, job).await;
                        });
                    }
                }
            }
        }
    }

    async fn consume_jobs(&self) -> WorkerResult<()> {
        let available = self.job_semaphore.available_permits();
        if available == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let jobs = self
            .queue
            .consume(&self.consumer_name, CONSUME_BLOCK_MS, available.min(CONSUME_BATCH))
            .await?;
        if jobs.is_empty() {
            return Ok(());
        }
        debug!("Consumed {} jobs from queue", jobs.len());

        for (message_id, job) in jobs {
            let permit = Arc::clone(&self.job_semaphore)
                .acquire_owned()
                .await
                .map_err(|_| WorkerError::job_failed("Semaphore closed"))?;
            let ctx = Arc::clone(&self.ctx);
            let queue = Arc::clone(&self.queue);
            tokio::spawn(async move {
                let _permit = permit;
                Self::execute_job(&ctx, queue.as_ref(), &message_id, job).await;
            });
        }
        Ok(())
    }

    /// Run one delivery of a job, then ack it, leave it for a retry, or
    /// dead-letter it.
    ///
    /// Bad input is dead-lettered at once. Transient failures stay pending
    /// until the retry counter reaches the queue's limit.
    pub async fn execute_job(
        ctx: &JobContext,
        queue: &dyn TaskQueue,
        message_id: &str,
        job: QueueJob,
    ) -> JobOutcome {
        let logger = JobLogger::new(&job);
        let kind = job.kind();
        let started = Instant::now();

        let result = Self::process_job(ctx, &job, &logger)
            .instrument(logger.span())
            .await;
        metrics::histogram!("recipe_job_duration_seconds", "kind" => kind)
            .record(started.elapsed().as_secs_f64());

        let error = match result {
            Ok(()) => {
                if let Err(e) = queue.ack(message_id).await {
                    logger.log_error(&format!("failed to ack: {e}"));
                }
                Self::release_dedup(queue, &job, &logger).await;
                metrics::counter!("recipe_jobs_completed_total", "kind" => kind).increment(1);
                return JobOutcome::Completed;
            }
            Err(e) => e,
        };

        logger.log_error(&error.to_string());
        metrics::counter!("recipe_jobs_failed_total", "kind" => kind).increment(1);

        if error.is_retryable() {
            let max_retries = queue.max_retries();
            match queue.increment_retry(message_id).await {
                Ok(attempt) if attempt < max_retries => {
                    logger.log_warning(&format!(
                        "will be retried (attempt {attempt}/{max_retries})"
                    ));
                    return JobOutcome::Retrying(attempt);
                }
                Ok(_) => {}
                Err(e) => logger.log_error(&format!("failed to bump retry counter: {e}")),
            }
        }

        if let Err(e) = queue.dlq(message_id, &job, &error.to_string()).await {
            logger.log_error(&format!("failed to move to DLQ: {e}"));
        }
        Self::release_dedup(queue, &job, &logger).await;
        metrics::counter!("recipe_jobs_dead_lettered_total", "kind" => kind).increment(1);
        JobOutcome::DeadLettered
    }

    /// Scheduled jobs keep their key for the whole dedup window so other
    /// schedulers cannot enqueue the same slot again.
    async fn release_dedup(queue: &dyn TaskQueue, job: &QueueJob, logger: &JobLogger) {
        if job.is_scheduled() {
            return;
        }
        if let Err(e) = queue.clear_dedup(&job.idempotency_key()).await {
            logger.log_warning(&format!("failed to clear dedup key: {e}"));
        }
    }

    async fn process_job(ctx: &JobContext, job: &QueueJob, logger: &JobLogger) -> WorkerResult<()> {
        let timeout = ctx.config.job_timeout;
        let work = async {
            match job {
                QueueJob::ProcessRecipeImage(j) => process_recipe_image(ctx, j, logger).await,
                QueueJob::SendWelcomeEmail(j) => send_welcome_email(ctx, j, logger).await,
                QueueJob::SendDailyEmail(j) => send_daily_email(ctx, j, logger).await.map(|_| ()),
                QueueJob::ExportUserData(j) => export_user_data(ctx, j, logger).await.map(|_| ()),
                QueueJob::CleanupOldExports(j) => {
                    cleanup_old_exports(ctx, j, logger).await.map(|_| ())
                }
            }
        };
        tokio::time::timeout(timeout, work)
            .await
            .map_err(|_| WorkerError::Timeout(timeout.as_secs()))?
    }

    async fn wait_for_jobs(&self) {
        let total = self.ctx.config.max_concurrent_jobs;
        while self.job_semaphore.available_permits() < total {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{DynamicImage, GenericImageView, ImageOutputFormat};
    use recipe_db::{Database, NewAccount, NewImage, NewRecipe, NewSellerProfile};
    use recipe_models::{Difficulty, Role, User, UserId};
    use recipe_queue::{InMemoryQueue, ProcessRecipeImageJob, SendWelcomeEmailJob};
    use recipe_storage::{MediaConfig, MediaStorage};

    use super::*;
    use crate::config::WorkerConfig;
    use crate::mailer::{LogMailer, Mailer, MockMailer};

    async fn context(mailer: Arc<dyn Mailer>) -> (tempfile::TempDir, JobContext) {
        let dir = tempfile::tempdir().unwrap();
        let storage = MediaStorage::new(MediaConfig {
            root: dir.path().to_path_buf(),
            base_url: "/media/".to_string(),
        })
        .await
        .unwrap();
        let db = Database::in_memory().await.unwrap();
        let config = WorkerConfig {
            job_timeout: Duration::from_secs(30),
            claim_interval: Duration::from_millis(50),
            ..WorkerConfig::default()
        };
        (dir, JobContext::new(config, db, storage, mailer))
    }

    async fn seller(ctx: &JobContext) -> User {
        ctx.db
            .users()
            .create(&NewAccount {
                username: "ravi".to_string(),
                email: "ravi@example.com".to_string(),
                first_name: None,
                last_name: None,
                role: Role::Seller,
                password_hash: "x".to_string(),
                seller: Some(NewSellerProfile {
                    gst_number: "27AAPFU0939F1ZV".to_string(),
                    business_name: "Ravi's".to_string(),
                }),
            })
            .await
            .unwrap()
    }

    /// Stores `bytes` as a recipe image and returns its processing job.
    async fn image_job(ctx: &JobContext, bytes: &[u8]) -> (QueueJob, String) {
        let author = seller(ctx).await;
        let recipe = ctx
            .db
            .recipes()
            .create(
                &author.id,
                &NewRecipe {
                    title: "Idli".to_string(),
                    description: "steamed".to_string(),
                    ingredients: "rice".to_string(),
                    instructions: "steam".to_string(),
                    prep_time: 5,
                    cook_time: 15,
                    servings: 4,
                    difficulty: Difficulty::Medium,
                    category_id: None,
                    is_published: true,
                    is_featured: false,
                    tags: Vec::new(),
                },
            )
            .await
            .unwrap();
        let key = "recipes/images/idli.png".to_string();
        ctx.storage.upload_bytes(bytes, &key).await.unwrap();
        let image = ctx
            .db
            .images()
            .create(&NewImage {
                recipe_id: recipe.id,
                image: key.clone(),
                caption: None,
                is_primary: true,
                order: 0,
            })
            .await
            .unwrap();
        let job = QueueJob::ProcessRecipeImage(ProcessRecipeImageJob::new(image.id, recipe.id));
        (job, key)
    }

    async fn deliver(queue: &InMemoryQueue, job: QueueJob) -> String {
        queue.enqueue(job).await.unwrap();
        let mut batch = queue.consume("test", 0, 1).await.unwrap();
        batch.remove(0).0
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        DynamicImage::new_rgb8(width, height)
            .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)
            .unwrap();
        buf
    }

    #[tokio::test]
    async fn image_is_resized_in_place_and_acked() {
        let (_dir, ctx) = context(Arc::new(LogMailer::new("noreply@example.com"))).await;
        let queue = InMemoryQueue::default();
        let (job, key) = image_job(&ctx, &png(2000, 1000)).await;
        let message_id = deliver(&queue, job.clone()).await;

        let outcome = JobExecutor::execute_job(&ctx, &queue, &message_id, job).await;
        assert_eq!(outcome, JobOutcome::Completed);
        assert_eq!(queue.len().await.unwrap(), 0);

        let stored = ctx.storage.download_bytes(&key).await.unwrap();
        let decoded = image::load_from_memory(&stored).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (800, 400));
        assert_eq!(image::guess_format(&stored).unwrap(), image::ImageFormat::Jpeg);
    }

    #[tokio::test]
    async fn corrupt_image_goes_straight_to_dlq() {
        let (_dir, ctx) = context(Arc::new(LogMailer::new("noreply@example.com"))).await;
        let queue = InMemoryQueue::default();
        let (job, _) = image_job(&ctx, b"not really a png").await;
        let message_id = deliver(&queue, job.clone()).await;

        let outcome = JobExecutor::execute_job(&ctx, &queue, &message_id, job).await;
        assert_eq!(outcome, JobOutcome::DeadLettered);
        assert_eq!(queue.dead_letters().await.len(), 1);
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn mail_failures_retry_until_the_limit() {
        let mut mailer = MockMailer::new();
        mailer
            .expect_send()
            .times(2)
            .returning(|_| Err(WorkerError::mail_failed("relay down")));
        let (_dir, ctx) = context(Arc::new(mailer)).await;
        let user = seller(&ctx).await;
        let queue = InMemoryQueue::new(2);
        let job = QueueJob::SendWelcomeEmail(SendWelcomeEmailJob::new(user.id));
        let message_id = deliver(&queue, job.clone()).await;

        let first = JobExecutor::execute_job(&ctx, &queue, &message_id, job.clone()).await;
        assert_eq!(first, JobOutcome::Retrying(1));
        assert_eq!(queue.len().await.unwrap(), 1);
        assert!(queue.dead_letters().await.is_empty());

        let second = JobExecutor::execute_job(&ctx, &queue, &message_id, job).await;
        assert_eq!(second, JobOutcome::DeadLettered);
        let dead = queue.dead_letters().await;
        assert_eq!(dead.len(), 1);
        assert!(dead[0].1.contains("relay down"));
    }

    #[tokio::test]
    async fn run_drains_queue_until_shutdown() {
        let (_dir, ctx) = context(Arc::new(LogMailer::new("noreply@example.com"))).await;
        let queue = Arc::new(InMemoryQueue::default());
        for _ in 0..3 {
            queue
                .enqueue(QueueJob::SendWelcomeEmail(SendWelcomeEmailJob::new(UserId::new())))
                .await
                .unwrap();
        }

        let executor = Arc::new(JobExecutor::new(ctx, queue.clone()));
        let runner = {
            let executor = Arc::clone(&executor);
            tokio::spawn(async move { executor.run().await })
        };

        tokio::time::timeout(Duration::from_secs(10), async {
            while queue.len().await.unwrap() > 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();

        executor.shutdown();
        tokio::time::timeout(Duration::from_secs(10), runner)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
