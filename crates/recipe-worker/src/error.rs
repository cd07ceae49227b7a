//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Processing failed: {0}")]
    ProcessingFailed(String),

    #[error("Mail delivery failed: {0}")]
    MailFailed(String),

    #[error("Job timed out after {0}s")]
    Timeout(u64),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database error: {0}")]
    Db(#[from] recipe_db::DbError),

    #[error("Storage error: {0}")]
    Storage(#[from] recipe_storage::StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] recipe_queue::QueueError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    pub fn processing_failed(msg: impl Into<String>) -> Self {
        Self::ProcessingFailed(msg.into())
    }

    pub fn mail_failed(msg: impl Into<String>) -> Self {
        Self::MailFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Check if error is retryable.
    ///
    /// Bad input (an undecodable image, a broken job) fails the same way on
    /// every attempt and goes straight to the dead letter queue.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WorkerError::MailFailed(_)
                | WorkerError::Timeout(_)
                | WorkerError::Db(_)
                | WorkerError::Storage(_)
                | WorkerError::Queue(_)
                | WorkerError::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(WorkerError::mail_failed("relay down").is_retryable());
        assert!(WorkerError::Timeout(600).is_retryable());
        assert!(WorkerError::Io(std::io::Error::other("disk")).is_retryable());
    }

    #[test]
    fn bad_input_is_not_retryable() {
        assert!(!WorkerError::processing_failed("corrupt").is_retryable());
        assert!(!WorkerError::job_failed("nope").is_retryable());
        assert!(!WorkerError::config_error("missing").is_retryable());
    }
}
