//! Favorite recipes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::recipe::RecipeSummary;

/// A recipe bookmarked by a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Favorite {
    pub id: Uuid,
    pub recipe: RecipeSummary,
    pub created_at: DateTime<Utc>,
}
