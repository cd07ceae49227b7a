//! Background worker for the recipe marketplace.
//!
//! This crate provides:
//! - Job executor with bounded concurrency, retries and dead-lettering
//! - Recipe image resizing
//! - Welcome and daily digest mail
//! - Weekly user data export and export retention cleanup
//! - Periodic scheduler that enqueues the recurring jobs

pub mod config;
pub mod context;
pub mod email_job;
pub mod error;
pub mod executor;
pub mod export_job;
pub mod image_job;
pub mod logging;
pub mod mailer;
pub mod retry;
pub mod scheduler;

pub use config::WorkerConfig;
pub use context::JobContext;
pub use error::{WorkerError, WorkerResult};
pub use executor::{JobExecutor, JobOutcome};
pub use logging::JobLogger;
pub use mailer::{Email, HttpMailer, LogMailer, Mailer};
pub use scheduler::{default_schedule, ScheduleEntry, ScheduledTask, Scheduler};
