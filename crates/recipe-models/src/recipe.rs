//! Recipe, category, tag and image models.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::UnknownVariant;
use crate::ids::{RecipeId, UserId};
use crate::rating::Rating;

/// Default display color for newly created tags.
pub const DEFAULT_TAG_COLOR: &str = "#007bff";

/// Recipe difficulty level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    #[default]
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => Err(UnknownVariant::new("difficulty", other)),
        }
    }
}

/// Recipe category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    /// Number of published recipes in this category
    #[serde(default)]
    pub recipe_count: i64,
    pub created_at: DateTime<Utc>,
}

/// Free-form label attached to recipes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: Uuid,
    pub name: String,
    pub color: String,
}

/// Image uploaded for a recipe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeImage {
    pub id: Uuid,
    pub recipe_id: RecipeId,
    /// Path relative to the media root
    pub image: String,
    /// Public URL, filled in by the HTTP layer
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub image_url: Option<String>,
    pub caption: Option<String>,
    pub is_primary: bool,
    pub order: i64,
    pub created_at: DateTime<Utc>,
}

/// Recipe row as stored in the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    pub id: RecipeId,
    pub title: String,
    pub description: String,
    pub ingredients: String,
    pub instructions: String,
    /// Minutes
    pub prep_time: i64,
    /// Minutes
    pub cook_time: i64,
    pub servings: i64,
    pub difficulty: Difficulty,
    pub author_id: UserId,
    pub category_id: Option<Uuid>,
    pub is_published: bool,
    pub is_featured: bool,
    pub view_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Recipe {
    pub fn total_time(&self) -> i64 {
        self.prep_time + self.cook_time
    }
}

/// Compact author reference embedded in recipe responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorView {
    pub id: UserId,
    pub username: String,
    pub full_name: String,
}

impl From<&crate::user::User> for AuthorView {
    fn from(user: &crate::user::User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            full_name: user.full_name(),
        }
    }
}

/// Compact category reference embedded in recipe responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryRef {
    pub id: Uuid,
    pub name: String,
}

/// Recipe as shown in listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeSummary {
    pub id: RecipeId,
    pub title: String,
    pub description: String,
    pub author: AuthorView,
    pub category: Option<CategoryRef>,
    pub prep_time: i64,
    pub cook_time: i64,
    pub total_time: i64,
    pub servings: i64,
    pub difficulty: Difficulty,
    pub primary_image: Option<RecipeImage>,
    pub average_rating: f64,
    pub rating_count: i64,
    pub view_count: i64,
    pub is_published: bool,
    pub is_featured: bool,
    pub is_favorited: bool,
    pub tags: Vec<Tag>,
    pub created_at: DateTime<Utc>,
}

/// Full recipe with images, ratings and per-caller state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeDetail {
    pub id: RecipeId,
    pub title: String,
    pub description: String,
    pub ingredients: String,
    pub instructions: String,
    pub prep_time: i64,
    pub cook_time: i64,
    pub total_time: i64,
    pub servings: i64,
    pub difficulty: Difficulty,
    pub author: AuthorView,
    pub category: Option<CategoryRef>,
    pub images: Vec<RecipeImage>,
    pub ratings: Vec<Rating>,
    pub average_rating: f64,
    pub rating_count: i64,
    pub user_rating: Option<Rating>,
    pub view_count: i64,
    pub is_published: bool,
    pub is_featured: bool,
    pub is_favorited: bool,
    pub tags: Vec<Tag>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Marketplace-wide counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeStats {
    pub total_recipes: i64,
    pub total_categories: i64,
    pub total_ratings: i64,
    pub featured_recipes: i64,
}

/// Sort order accepted by recipe listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecipeOrdering {
    CreatedAt,
    #[default]
    CreatedAtDesc,
    ViewCount,
    ViewCountDesc,
    Title,
    TitleDesc,
}

impl RecipeOrdering {
    /// SQL `ORDER BY` clause for the `r` alias of the recipes table.
    pub fn sql(&self) -> &'static str {
        match self {
            RecipeOrdering::CreatedAt => "r.created_at ASC",
            RecipeOrdering::CreatedAtDesc => "r.created_at DESC",
            RecipeOrdering::ViewCount => "r.view_count ASC, r.created_at DESC",
            RecipeOrdering::ViewCountDesc => "r.view_count DESC, r.created_at DESC",
            RecipeOrdering::Title => "r.title ASC",
            RecipeOrdering::TitleDesc => "r.title DESC",
        }
    }
}

impl FromStr for RecipeOrdering {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "created_at" => Ok(RecipeOrdering::CreatedAt),
            "-created_at" => Ok(RecipeOrdering::CreatedAtDesc),
            "view_count" => Ok(RecipeOrdering::ViewCount),
            "-view_count" => Ok(RecipeOrdering::ViewCountDesc),
            "title" => Ok(RecipeOrdering::Title),
            "-title" => Ok(RecipeOrdering::TitleDesc),
            other => Err(UnknownVariant::new("ordering", other)),
        }
    }
}

/// Filters accepted by the recipe listing endpoints.
///
/// Every field is optional; unset fields do not constrain the result.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecipeQuery {
    /// Case-insensitive match against title, description, ingredients,
    /// instructions and author username
    pub search: Option<String>,
    pub category: Option<Uuid>,
    pub difficulty: Option<Difficulty>,
    pub max_prep_time: Option<i64>,
    pub max_cook_time: Option<i64>,
    pub max_total_time: Option<i64>,
    pub servings: Option<i64>,
    pub min_servings: Option<i64>,
    pub max_servings: Option<i64>,
    /// Recipes having at least one rating at or above this value
    pub min_rating: Option<f64>,
    /// Author username substring
    pub author: Option<String>,
    pub featured: Option<bool>,
    /// Comma-separated tag names, any match
    pub tags: Option<String>,
    pub created_after: Option<NaiveDate>,
    pub created_before: Option<NaiveDate>,
    pub ordering: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl RecipeQuery {
    /// Parsed ordering, falling back to newest first.
    pub fn ordering(&self) -> RecipeOrdering {
        self.ordering
            .as_deref()
            .and_then(|o| o.parse().ok())
            .unwrap_or_default()
    }

    /// Normalized, de-duplicated tag names from the `tags` parameter.
    pub fn tag_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tags
            .as_deref()
            .unwrap_or("")
            .split(',')
            .filter_map(crate::validation::normalize_tag)
            .collect();
        names.dedup();
        names
    }

    /// Search term with surrounding whitespace removed, if non-empty.
    pub fn search_term(&self) -> Option<&str> {
        self.search.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

/// Rounds an average rating to two decimal places.
pub fn round_rating(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
