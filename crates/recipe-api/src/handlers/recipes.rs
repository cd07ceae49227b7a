//! Recipe handlers: browsing, authoring and statistics.

use std::net::SocketAddr;

use axum::extract::rejection::QueryRejection;
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use axum_extra::headers::UserAgent;
use axum_extra::TypedHeader;
use serde::{Deserialize, Deserializer};
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use recipe_db::{NewRecipe, RecipeChanges, ViewRecord};
use recipe_models::validation::validate_title;
use recipe_models::{
    Category, Difficulty, Page, RecipeDetail, RecipeId, RecipeQuery, RecipeStats, RecipeSummary,
    UserId,
};
use recipe_storage::MediaStorage;

use crate::auth::{AuthUser, MaybeAuthUser};
use crate::error::{ApiError, ApiJson, ApiResult};
use crate::metrics;
use crate::middleware::client_ip;
use crate::state::AppState;
use crate::validation::{check_text, Problems};

const FEATURED_LIMIT: i64 = 10;
const POPULAR_LIMIT: i64 = 20;
const TITLE_MAX: usize = 200;
const DESCRIPTION_MAX: usize = 2000;
const TAG_MAX: usize = 50;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateRecipeRequest {
    pub title: String,
    pub description: String,
    pub ingredients: String,
    pub instructions: String,
    #[validate(range(min = 0, message = "Preparation time cannot be negative."))]
    pub prep_time: i64,
    #[validate(range(min = 0, message = "Cooking time cannot be negative."))]
    pub cook_time: i64,
    #[validate(range(min = 1, message = "Servings must be at least 1."))]
    pub servings: i64,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default, alias = "category_id")]
    pub category: Option<Uuid>,
    #[serde(default = "default_true")]
    pub is_published: bool,
    #[serde(default)]
    pub is_featured: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_true() -> bool {
    true
}

/// Distinguishes an absent field from an explicit `null`.
fn explicit_null<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Partial update; only the fields present in the body change.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateRecipeRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub ingredients: Option<String>,
    pub instructions: Option<String>,
    #[validate(range(min = 0, message = "Preparation time cannot be negative."))]
    pub prep_time: Option<i64>,
    #[validate(range(min = 0, message = "Cooking time cannot be negative."))]
    pub cook_time: Option<i64>,
    #[validate(range(min = 1, message = "Servings must be at least 1."))]
    pub servings: Option<i64>,
    pub difficulty: Option<Difficulty>,
    #[serde(default, alias = "category_id", deserialize_with = "explicit_null")]
    pub category: Option<Option<Uuid>>,
    pub is_published: Option<bool>,
    pub is_featured: Option<bool>,
    pub tags: Option<Vec<String>>,
}

/// Fill in public URLs for stored image keys.
fn with_image_urls(storage: &MediaStorage, mut detail: RecipeDetail) -> RecipeDetail {
    for image in &mut detail.images {
        image.image_url = Some(storage.url_for(&image.image));
    }
    detail
}

pub(crate) fn summary_with_urls(
    storage: &MediaStorage,
    mut summary: RecipeSummary,
) -> RecipeSummary {
    if let Some(image) = summary.primary_image.as_mut() {
        image.image_url = Some(storage.url_for(&image.image));
    }
    summary
}

fn summaries_with_urls(
    storage: &MediaStorage,
    summaries: Vec<RecipeSummary>,
) -> Vec<RecipeSummary> {
    summaries
        .into_iter()
        .map(|s| summary_with_urls(storage, s))
        .collect()
}

/// Parse a recipe id from the path; anything malformed is simply not found.
pub(crate) fn parse_recipe_id(raw: &str) -> ApiResult<RecipeId> {
    raw.parse()
        .map_err(|_| ApiError::not_found("Recipe not found"))
}

fn check_tags(problems: &mut Problems, tags: &[String]) {
    if tags.iter().any(|t| t.trim().chars().count() > TAG_MAX) {
        problems.add(
            "tags",
            format!("Ensure this field has no more than {TAG_MAX} characters."),
        );
    }
}

fn check_title(problems: &mut Problems, title: &str) {
    check_text(problems, "title", title, TITLE_MAX);
    if !problems.has("title") {
        problems.check("title", validate_title(title));
    }
}

async fn check_category(
    state: &AppState,
    problems: &mut Problems,
    category: Option<Uuid>,
) -> ApiResult<()> {
    if let Some(id) = category {
        if state.db.categories().get(id).await?.is_none() {
            problems.add(
                "category",
                format!("Invalid pk \"{id}\" - object does not exist."),
            );
        }
    }
    Ok(())
}

async fn load_detail(
    state: &AppState,
    id: &RecipeId,
    viewer: Option<&UserId>,
) -> ApiResult<RecipeDetail> {
    let detail = state
        .db
        .recipes()
        .detail(id, viewer)
        .await?
        .ok_or_else(|| ApiError::not_found("Recipe not found"))?;
    Ok(with_image_urls(&state.storage, detail))
}

/// List published recipes with filtering, search and ordering.
pub async fn list_recipes(
    State(state): State<AppState>,
    viewer: MaybeAuthUser,
    query: Result<Query<RecipeQuery>, QueryRejection>,
) -> ApiResult<Json<Page<RecipeSummary>>> {
    let Query(query) = query?;
    let page = state.db.recipes().list(&query, viewer.user_id()).await?;
    Ok(Json(page.map(|s| summary_with_urls(&state.storage, s))))
}

/// Create a recipe owned by the calling seller.
pub async fn create_recipe(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiJson(req): ApiJson<CreateRecipeRequest>,
) -> ApiResult<(StatusCode, Json<RecipeDetail>)> {
    auth.require_seller()?;

    let mut problems = Problems::of(&req);
    check_title(&mut problems, &req.title);
    check_text(&mut problems, "description", &req.description, DESCRIPTION_MAX);
    check_text(&mut problems, "ingredients", &req.ingredients, usize::MAX);
    check_text(&mut problems, "instructions", &req.instructions, usize::MAX);
    check_tags(&mut problems, &req.tags);
    check_category(&state, &mut problems, req.category).await?;
    problems.into_result()?;

    let input = NewRecipe {
        title: req.title.trim().to_string(),
        description: req.description,
        ingredients: req.ingredients,
        instructions: req.instructions,
        prep_time: req.prep_time,
        cook_time: req.cook_time,
        servings: req.servings,
        difficulty: req.difficulty,
        category_id: req.category,
        is_published: req.is_published,
        is_featured: req.is_featured,
        tags: req.tags,
    };
    let recipe = state.db.recipes().create(auth.id(), &input).await?;

    metrics::record_recipe_created();
    info!(recipe_id = %recipe.id, author = %auth.user.email, "Recipe created: {}", recipe.title);

    let detail = load_detail(&state, &recipe.id, Some(auth.id())).await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

/// The calling seller's recipes, drafts included.
pub async fn my_recipes(
    State(state): State<AppState>,
    auth: AuthUser,
    query: Result<Query<RecipeQuery>, QueryRejection>,
) -> ApiResult<Json<Page<RecipeSummary>>> {
    auth.require_seller()?;
    let Query(query) = query?;
    let page = state.db.recipes().list_by_author(auth.id(), &query).await?;
    Ok(Json(page.map(|s| summary_with_urls(&state.storage, s))))
}

pub async fn featured_recipes(
    State(state): State<AppState>,
    viewer: MaybeAuthUser,
) -> ApiResult<Json<Vec<RecipeSummary>>> {
    let recipes = state
        .db
        .recipes()
        .featured(FEATURED_LIMIT, viewer.user_id())
        .await?;
    Ok(Json(summaries_with_urls(&state.storage, recipes)))
}

pub async fn popular_recipes(
    State(state): State<AppState>,
    viewer: MaybeAuthUser,
) -> ApiResult<Json<Vec<RecipeSummary>>> {
    let recipes = state
        .db
        .recipes()
        .popular(POPULAR_LIMIT, viewer.user_id())
        .await?;
    Ok(Json(summaries_with_urls(&state.storage, recipes)))
}

pub async fn recipe_stats(State(state): State<AppState>) -> ApiResult<Json<RecipeStats>> {
    Ok(Json(state.db.recipes().stats().await?))
}

pub async fn list_categories(State(state): State<AppState>) -> ApiResult<Json<Vec<Category>>> {
    Ok(Json(state.db.categories().list_active_with_counts().await?))
}

/// Show a published recipe and record the view.
pub async fn recipe_detail(
    State(state): State<AppState>,
    viewer: MaybeAuthUser,
    Path(id): Path<String>,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    user_agent: Option<TypedHeader<UserAgent>>,
) -> ApiResult<Json<RecipeDetail>> {
    let id = parse_recipe_id(&id)?;
    let recipes = state.db.recipes();
    if recipes.get_published(&id).await?.is_none() {
        return Err(ApiError::not_found("Recipe not found"));
    }

    let view = ViewRecord {
        user_id: viewer.user_id().copied(),
        ip_address: client_ip(&headers, connect_info.map(|c| c.0)).map(|ip| ip.to_string()),
        user_agent: user_agent.map(|TypedHeader(ua)| ua.as_str().to_string()),
    };
    // A lost view must not hide the recipe
    if let Err(e) = recipes.record_view(&id, &view).await {
        warn!(recipe_id = %id, "Failed to record recipe view: {}", e);
    }

    let detail = load_detail(&state, &id, viewer.user_id()).await?;
    Ok(Json(detail))
}

/// Partially update a recipe owned by the calling seller.
pub async fn update_recipe(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<UpdateRecipeRequest>,
) -> ApiResult<Json<RecipeDetail>> {
    auth.require_seller()?;
    let id = parse_recipe_id(&id)?;
    let recipes = state.db.recipes();
    if recipes.get_owned(&id, auth.id()).await?.is_none() {
        return Err(ApiError::not_found("Recipe not found"));
    }

    let mut problems = Problems::of(&req);
    if let Some(title) = &req.title {
        check_title(&mut problems, title);
    }
    if let Some(description) = &req.description {
        check_text(&mut problems, "description", description, DESCRIPTION_MAX);
    }
    if let Some(ingredients) = &req.ingredients {
        check_text(&mut problems, "ingredients", ingredients, usize::MAX);
    }
    if let Some(instructions) = &req.instructions {
        check_text(&mut problems, "instructions", instructions, usize::MAX);
    }
    if let Some(tags) = &req.tags {
        check_tags(&mut problems, tags);
    }
    check_category(&state, &mut problems, req.category.flatten()).await?;
    problems.into_result()?;

    let changes = RecipeChanges {
        title: req.title.map(|t| t.trim().to_string()),
        description: req.description,
        ingredients: req.ingredients,
        instructions: req.instructions,
        prep_time: req.prep_time,
        cook_time: req.cook_time,
        servings: req.servings,
        difficulty: req.difficulty,
        category_id: req.category,
        is_published: req.is_published,
        is_featured: req.is_featured,
        tags: req.tags,
    };
    let recipe = recipes.update(&id, &changes).await?;
    info!(recipe_id = %recipe.id, author = %auth.user.email, "Recipe updated: {}", recipe.title);

    let detail = load_detail(&state, &id, Some(auth.id())).await?;
    Ok(Json(detail))
}

/// Delete a recipe owned by the calling seller along with its image files.
pub async fn delete_recipe(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    auth.require_seller()?;
    let id = parse_recipe_id(&id)?;
    let recipes = state.db.recipes();
    let Some(recipe) = recipes.get_owned(&id, auth.id()).await? else {
        return Err(ApiError::not_found("Recipe not found"));
    };

    let image_keys = recipes.delete(&id).await?;
    if !image_keys.is_empty() {
        if let Err(e) = state.storage.delete_objects(&image_keys).await {
            warn!(recipe_id = %id, "Failed to delete recipe images: {}", e);
        }
    }

    info!(recipe_id = %id, author = %auth.user.email, "Recipe deleted: {}", recipe.title);
    Ok(StatusCode::NO_CONTENT)
}
