//! Recipe ratings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ids::{RecipeId, UserId};

/// Lowest accepted score.
pub const MIN_RATING: i64 = 1;

/// Highest accepted score.
pub const MAX_RATING: i64 = 5;

/// Longest accepted review, in characters.
pub const MAX_REVIEW_LEN: usize = 1000;

/// A customer's score (and optional review) for one recipe.
///
/// At most one rating exists per (recipe, user) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rating {
    pub id: Uuid,
    pub recipe_id: RecipeId,
    pub user_id: UserId,
    /// Username of the rater
    pub user: String,
    pub rating: i64,
    pub review: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
