//! Shared data models for the recipe marketplace backend.
//!
//! This crate provides Serde-serializable types for:
//! - Users, roles and profiles
//! - Recipes, categories, tags and images
//! - Ratings and favorites
//! - Pagination envelopes
//! - Field validation helpers shared by the API and the database layer

pub mod error;
pub mod favorite;
pub mod ids;
pub mod pagination;
pub mod rating;
pub mod recipe;
pub mod user;
pub mod validation;

// Re-export common types
pub use error::UnknownVariant;
pub use favorite::Favorite;
pub use ids::{RecipeId, UserId};
pub use pagination::{Page, PageParams, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
pub use rating::{Rating, MAX_RATING, MAX_REVIEW_LEN, MIN_RATING};
pub use recipe::{
    round_rating, AuthorView, Category, CategoryRef, Difficulty, Recipe, RecipeDetail,
    RecipeImage, RecipeOrdering, RecipeQuery, RecipeStats, RecipeSummary, Tag,
    DEFAULT_TAG_COLOR,
};
pub use user::{display_name, ProfileView, Role, SellerProfile, User, UserProfile, UserView};
