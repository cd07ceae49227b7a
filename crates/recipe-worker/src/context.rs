//! Shared handles passed to every job.

use std::sync::Arc;

use recipe_db::Database;
use recipe_storage::MediaStorage;

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::mailer::{self, Mailer};

/// Everything a job handler needs to do its work.
#[derive(Clone)]
pub struct JobContext {
    pub config: WorkerConfig,
    pub db: Database,
    pub storage: Arc<MediaStorage>,
    pub mailer: Arc<dyn Mailer>,
}

impl JobContext {
    pub fn new(
        config: WorkerConfig,
        db: Database,
        storage: MediaStorage,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            config,
            db,
            storage: Arc::new(storage),
            mailer,
        }
    }

    /// Build the context from the environment, connecting to the database
    /// and preparing the media root.
    pub async fn from_env(config: WorkerConfig) -> WorkerResult<Self> {
        let db = Database::from_env().await?;
        let storage = MediaStorage::from_env().await?;
        let mailer = mailer::from_config(&config)?;
        Ok(Self::new(config, db, storage, mailer))
    }
}
