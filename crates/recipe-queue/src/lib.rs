//! Background task queue.
//!
//! This crate provides:
//! - Job definitions for image processing, mail and data exports
//! - A Redis Streams queue with consumer groups, retries and a DLQ
//! - An in-process queue with the same semantics for tests and local runs

pub mod error;
pub mod job;
pub mod memory;
pub mod queue;

pub use error::{QueueError, QueueResult};
pub use job::{
    CleanupOldExportsJob, ExportUserDataJob, JobId, ProcessRecipeImageJob, QueueJob,
    SendDailyEmailJob, SendWelcomeEmailJob,
};
pub use memory::InMemoryQueue;
pub use queue::{connect, JobQueue, QueueBackend, QueueConfig, TaskQueue};
