//! Favorite handlers.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Serialize;
use tracing::debug;

use recipe_models::{Favorite, Page, PageParams};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::handlers::recipes::{parse_recipe_id, summary_with_urls};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ToggleResponse {
    pub message: &'static str,
    pub is_favorited: bool,
}

/// Add a published recipe to the caller's favorites, or remove it.
pub async fn toggle_favorite(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<ToggleResponse>> {
    auth.require_customer()?;
    let recipe_id = parse_recipe_id(&id)?;
    if state.db.recipes().get_published(&recipe_id).await?.is_none() {
        return Err(ApiError::not_found("Recipe not found"));
    }

    let is_favorited = state.db.favorites().toggle(auth.id(), &recipe_id).await?;
    debug!(recipe_id = %recipe_id, user_id = %auth.id(), is_favorited, "Favorite toggled");

    let message = if is_favorited {
        "Recipe added to favorites"
    } else {
        "Recipe removed from favorites"
    };
    Ok(Json(ToggleResponse {
        message,
        is_favorited,
    }))
}

/// The caller's favorites, newest first.
pub async fn list_favorites(
    State(state): State<AppState>,
    auth: AuthUser,
    params: Result<Query<PageParams>, QueryRejection>,
) -> ApiResult<Json<Page<Favorite>>> {
    let Query(params) = params?;
    let page = state.db.favorites().list_for_user(auth.id(), params).await?;
    Ok(Json(page.map(|mut favorite| {
        favorite.recipe = summary_with_urls(&state.storage, favorite.recipe);
        favorite
    })))
}
