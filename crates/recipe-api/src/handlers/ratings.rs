//! Rating handler.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use tracing::info;

use recipe_db::RatingUpsert;
use recipe_models::{Rating, MAX_RATING, MAX_REVIEW_LEN, MIN_RATING};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiJson, ApiResult};
use crate::handlers::recipes::parse_recipe_id;
use crate::metrics;
use crate::state::AppState;
use crate::validation::{check_max_len, Problems};

#[derive(Debug, Deserialize)]
pub struct RatingRequest {
    pub recipe_id: Option<String>,
    pub rating: Option<i64>,
    pub review: Option<String>,
}

fn check_rating(problems: &mut Problems, rating: Option<i64>) {
    match rating {
        None => problems.add("rating", "This field is required."),
        Some(r) if r < MIN_RATING => problems.add(
            "rating",
            format!("Ensure this value is greater than or equal to {MIN_RATING}."),
        ),
        Some(r) if r > MAX_RATING => problems.add(
            "rating",
            format!("Ensure this value is less than or equal to {MAX_RATING}."),
        ),
        Some(_) => {}
    }
}

/// Rate a published recipe, replacing the caller's earlier rating if any.
///
/// Responds 201 for a new rating and 200 when an existing one changed.
pub async fn rate_recipe(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiJson(req): ApiJson<RatingRequest>,
) -> ApiResult<(StatusCode, Json<Rating>)> {
    auth.require_customer()?;

    let raw_id = req
        .recipe_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::bad_request("recipe_id is required"))?;
    let recipe_id = parse_recipe_id(raw_id)?;

    let recipe = state
        .db
        .recipes()
        .get_published(&recipe_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Recipe not found"))?;
    if recipe.author_id == *auth.id() {
        return Err(ApiError::bad_request("You cannot rate your own recipe"));
    }

    let mut problems = Problems::default();
    check_rating(&mut problems, req.rating);
    check_max_len(&mut problems, "review", req.review.as_deref(), MAX_REVIEW_LEN);
    problems.into_result()?;
    let score = req.rating.unwrap_or(MIN_RATING);

    let (rating, created) = state
        .db
        .ratings()
        .upsert(&RatingUpsert {
            recipe_id,
            user_id: *auth.id(),
            rating: score,
            review: req.review.filter(|r| !r.trim().is_empty()),
        })
        .await?;

    metrics::record_rating(created);
    let status = if created {
        info!(recipe_id = %recipe_id, user = %auth.user.email, "Rating created");
        StatusCode::CREATED
    } else {
        info!(recipe_id = %recipe_id, user = %auth.user.email, "Rating updated");
        StatusCode::OK
    };
    Ok((status, Json(rating)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rating_bounds() {
        for (value, ok) in [(None, false), (Some(0), false), (Some(1), true), (Some(5), true), (Some(6), false)] {
            let mut problems = Problems::default();
            check_rating(&mut problems, value);
            assert_eq!(problems.is_empty(), ok, "rating {value:?}");
        }
    }
}
