//! Worker configuration.

use std::time::Duration;

use recipe_queue::job::DEFAULT_EXPORT_RETENTION_DAYS;

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// Upper bound on a single job's run time
    pub job_timeout: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// How often the worker should scan for orphaned pending jobs
    pub claim_interval: Duration,
    /// Minimum idle time before a pending job can be claimed (crash recovery)
    pub claim_min_idle: Duration,
    /// Run the periodic job scheduler in this process
    pub scheduler_enabled: bool,
    /// Sender address for outgoing mail
    pub mail_from: String,
    /// HTTP mail relay; mail is only logged when unset
    pub mail_relay_url: Option<String>,
    pub export_retention_days: u32,
    /// Serve Prometheus metrics on this port when set
    pub metrics_port: Option<u16>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            job_timeout: Duration::from_secs(600),
            shutdown_timeout: Duration::from_secs(30),
            claim_interval: Duration::from_secs(30),
            claim_min_idle: Duration::from_secs(300),
            scheduler_enabled: true,
            mail_from: "noreply@recipe-platform.local".to_string(),
            mail_relay_url: None,
            export_retention_days: DEFAULT_EXPORT_RETENTION_DAYS,
            metrics_port: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_jobs: env_or("WORKER_MAX_JOBS", defaults.max_concurrent_jobs).max(1),
            job_timeout: Duration::from_secs(env_or("WORKER_JOB_TIMEOUT", 600)),
            shutdown_timeout: Duration::from_secs(env_or("WORKER_SHUTDOWN_TIMEOUT", 30)),
            claim_interval: Duration::from_secs(env_or("WORKER_CLAIM_INTERVAL_SECS", 30)),
            claim_min_idle: Duration::from_secs(env_or("WORKER_CLAIM_MIN_IDLE_SECS", 300)),
            scheduler_enabled: std::env::var("SCHEDULER_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.scheduler_enabled),
            mail_from: std::env::var("MAIL_FROM").unwrap_or(defaults.mail_from),
            mail_relay_url: std::env::var("MAIL_RELAY_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            export_retention_days: env_or("EXPORT_RETENTION_DAYS", defaults.export_retention_days),
            metrics_port: std::env::var("WORKER_METRICS_PORT")
                .ok()
                .and_then(|s| s.parse().ok()),
        }
    }
}
