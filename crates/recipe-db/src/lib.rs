//! SQLite persistence for the recipe marketplace.
//!
//! This crate provides:
//! - Connection pool setup and schema migration
//! - Typed repositories for users, categories, recipes, images,
//!   ratings, favorites and the token blacklist
//! - Aggregate queries for listings, statistics and data exports

pub mod categories;
pub mod database;
pub mod error;
pub mod favorites;
pub mod images;
pub mod ratings;
pub mod recipes;
mod rows;
pub mod tokens;
pub mod users;

pub use categories::CategoryRepository;
pub use database::{Database, DbConfig};
pub use error::{DbError, DbResult};
pub use favorites::FavoriteRepository;
pub use images::{ImageRepository, NewImage};
pub use ratings::{RatingRepository, RatingUpsert};
pub use recipes::{NewRecipe, RecipeChanges, RecipeRepository, ViewRecord};
pub use tokens::TokenRepository;
pub use users::{NewAccount, NewSellerProfile, ProfileUpdate, UserExportRow, UserRepository};
