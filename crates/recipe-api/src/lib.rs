//! Axum HTTP API server for the recipe marketplace.
//!
//! This crate provides:
//! - JWT authentication with customer and seller roles
//! - Recipe browsing, authoring, ratings, favorites and image upload
//! - Per-caller rate limiting and security headers
//! - Prometheus metrics

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod validation;

pub use auth::{AuthUser, JwtKeys, MaybeAuthUser};
pub use config::ApiConfig;
pub use error::{ApiError, ApiJson, ApiResult};
pub use routes::create_router;
pub use state::AppState;
