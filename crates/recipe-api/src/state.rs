//! Application state.

use std::sync::Arc;

use recipe_db::Database;
use recipe_queue::TaskQueue;
use recipe_storage::MediaStorage;

use crate::auth::JwtKeys;
use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub db: Database,
    pub storage: Arc<MediaStorage>,
    pub queue: Arc<dyn TaskQueue>,
    pub jwt: Arc<JwtKeys>,
}

impl AppState {
    /// Create new application state from the environment.
    pub async fn new(config: ApiConfig) -> anyhow::Result<Self> {
        let db = Database::from_env().await?;
        let storage = MediaStorage::from_env().await?;
        let queue = recipe_queue::connect(recipe_queue::QueueConfig::from_env()).await?;
        Ok(Self::from_parts(config, db, storage, queue))
    }

    /// Assemble state from already-built components.
    pub fn from_parts(
        config: ApiConfig,
        db: Database,
        storage: MediaStorage,
        queue: Arc<dyn TaskQueue>,
    ) -> Self {
        let jwt = Arc::new(JwtKeys::from_config(&config));
        Self {
            config,
            db,
            storage: Arc::new(storage),
            queue,
            jwt,
        }
    }
}
