//! API routes.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::middleware;
use axum::routing::{delete, get, post, put};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::services::ServeDir;
use tower_http::timeout::TimeoutLayer;

use crate::handlers::auth::{
    change_password, login, logout, profile, refresh, register, update_profile, verify,
};
use crate::handlers::favorites::{list_favorites, toggle_favorite};
use crate::handlers::images::upload_image;
use crate::handlers::ratings::rate_recipe;
use crate::handlers::recipes::{
    create_recipe, delete_recipe, featured_recipes, list_categories, list_recipes, my_recipes,
    popular_recipes, recipe_detail, recipe_stats, update_recipe,
};
use crate::handlers::{api_info, health, ready};
use crate::metrics::metrics_middleware;
use crate::middleware::{
    cors_layer, rate_limit_middleware, request_id, request_logging, security_headers,
    RateLimitState, RateLimiterCache,
};
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let auth_routes = Router::new()
        .route("/register/", post(register))
        .route("/login/", post(login))
        .route("/logout/", post(logout))
        .route("/token/refresh/", post(refresh))
        .route("/token/verify/", post(verify))
        .route("/profile/", get(profile))
        .route("/profile/update/", put(update_profile).patch(update_profile))
        .route("/change-password/", post(change_password));

    let recipe_routes = Router::new()
        .route("/", get(list_recipes))
        .route("/create/", post(create_recipe))
        .route("/my-recipes/", get(my_recipes))
        .route("/featured/", get(featured_recipes))
        .route("/popular/", get(popular_recipes))
        .route("/stats/", get(recipe_stats))
        .route("/categories/", get(list_categories))
        .route("/favorites/", get(list_favorites))
        .route("/images/upload/", post(upload_image))
        .route("/ratings/create/", post(rate_recipe))
        .route("/:id/", get(recipe_detail))
        .route("/:id/update/", put(update_recipe).patch(update_recipe))
        .route("/:id/delete/", delete(delete_recipe))
        .route("/:id/favorite/", post(toggle_favorite));

    let limits = RateLimitState {
        cache: Arc::new(RateLimiterCache::new(&state.config)),
        jwt: Arc::clone(&state.jwt),
    };

    let api_routes = Router::new()
        .nest("/auth", auth_routes)
        .nest("/recipes", recipe_routes)
        .layer(middleware::from_fn_with_state(limits, rate_limit_middleware));

    let system_routes = Router::new()
        .route("/", get(api_info))
        .route("/api", get(api_info))
        .route("/api/", get(api_info))
        .route("/health", get(health))
        .route("/health/", get(health))
        .route("/healthz", get(health))
        .route("/ready", get(ready));

    // Metrics endpoint (if enabled)
    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    let media = ServeDir::new(state.storage.root());

    Router::new()
        .nest("/api/v1", api_routes)
        .merge(system_routes)
        .merge(metrics_routes)
        .nest_service("/media", media)
        // Multipart uploads are capped by the outer limit, not axum's 2 MB default
        .layer(DefaultBodyLimit::max(state.config.max_body_size))
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            state.config.request_timeout,
        ))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(request_logging))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}
