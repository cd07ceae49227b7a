use chrono::Utc;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use uuid::Uuid;

use recipe_models::{Rating, RecipeId, UserId, MAX_RATING, MIN_RATING};

use crate::error::{DbError, DbResult};
use crate::rows;

/// A customer's score for a recipe.
#[derive(Debug, Clone)]
pub struct RatingUpsert {
    pub recipe_id: RecipeId,
    pub user_id: UserId,
    pub rating: i64,
    pub review: Option<String>,
}

pub(crate) const RATING_SELECT: &str = r"
    SELECT rt.id, rt.recipe_id, rt.user_id, u.username, rt.rating, rt.review,
           rt.created_at, rt.updated_at
    FROM ratings rt
    JOIN users u ON u.id = rt.user_id
";

/// Repository for recipe ratings.
#[derive(Debug, Clone)]
pub struct RatingRepository {
    pool: SqlitePool,
}

impl RatingRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create or replace the caller's rating for a recipe.
    ///
    /// Returns the stored rating and whether a new row was created.
    pub async fn upsert(&self, input: &RatingUpsert) -> DbResult<(Rating, bool)> {
        if !(MIN_RATING..=MAX_RATING).contains(&input.rating) {
            return Err(DbError::invalid(format!(
                "rating must be between {MIN_RATING} and {MAX_RATING}"
            )));
        }
        let review = input
            .review
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty());
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;

        let existing: Option<String> =
            sqlx::query_scalar("SELECT id FROM ratings WHERE recipe_id = ? AND user_id = ?")
                .bind(input.recipe_id.to_string())
                .bind(input.user_id.to_string())
                .fetch_optional(&mut *tx)
                .await?;

        let created = match existing {
            Some(id) => {
                sqlx::query("UPDATE ratings SET rating = ?, review = ?, updated_at = ? WHERE id = ?")
                    .bind(input.rating)
                    .bind(review)
                    .bind(now)
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                false
            }
            None => {
                sqlx::query(
                    r"
                    INSERT INTO ratings (id, recipe_id, user_id, rating, review, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                    ",
                )
                .bind(Uuid::new_v4().to_string())
                .bind(input.recipe_id.to_string())
                .bind(input.user_id.to_string())
                .bind(input.rating)
                .bind(review)
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                true
            }
        };

        tx.commit().await?;

        let rating = self
            .get_for_user(&input.recipe_id, &input.user_id)
            .await?
            .ok_or_else(|| DbError::not_found("rating"))?;
        Ok((rating, created))
    }

    /// Ratings for a recipe, newest first.
    pub async fn list_for_recipe(&self, recipe_id: &RecipeId) -> DbResult<Vec<Rating>> {
        let sql = format!("{RATING_SELECT} WHERE rt.recipe_id = ? ORDER BY rt.created_at DESC");
        let rows = sqlx::query(&sql)
            .bind(recipe_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(rating_from_row).collect()
    }

    pub async fn get_for_user(
        &self,
        recipe_id: &RecipeId,
        user_id: &UserId,
    ) -> DbResult<Option<Rating>> {
        let sql = format!("{RATING_SELECT} WHERE rt.recipe_id = ? AND rt.user_id = ?");
        let row = sqlx::query(&sql)
            .bind(recipe_id.to_string())
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(rating_from_row).transpose()
    }

    pub async fn count(&self) -> DbResult<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM ratings")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

pub(crate) fn rating_from_row(row: &SqliteRow) -> DbResult<Rating> {
    Ok(Rating {
        id: rows::uuid(row, "id")?,
        recipe_id: rows::recipe_id(row, "recipe_id")?,
        user_id: rows::user_id(row, "user_id")?,
        user: row.try_get("username")?,
        rating: row.try_get("rating")?,
        review: row.try_get("review")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipes::tests::{published_recipe, seller_and_customer};
    use crate::Database;

    #[tokio::test]
    async fn second_rating_updates_in_place() {
        let db = Database::in_memory().await.unwrap();
        let (seller, customer) = seller_and_customer(&db).await;
        let recipe = published_recipe(&db, &seller, "Dal Tadka").await;
        let ratings = db.ratings();

        let (first, created) = ratings
            .upsert(&RatingUpsert {
                recipe_id: recipe.id,
                user_id: customer.id,
                rating: 3,
                review: Some("  fine ".to_string()),
            })
            .await
            .unwrap();
        assert!(created);
        assert_eq!(first.review.as_deref(), Some("fine"));
        assert_eq!(first.user, customer.username);

        let (second, created) = ratings
            .upsert(&RatingUpsert {
                recipe_id: recipe.id,
                user_id: customer.id,
                rating: 5,
                review: None,
            })
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(second.id, first.id);
        assert_eq!(second.rating, 5);
        assert_eq!(ratings.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn rejects_out_of_range_scores() {
        let db = Database::in_memory().await.unwrap();
        let (seller, customer) = seller_and_customer(&db).await;
        let recipe = published_recipe(&db, &seller, "Rasam").await;

        let err = db
            .ratings()
            .upsert(&RatingUpsert {
                recipe_id: recipe.id,
                user_id: customer.id,
                rating: 6,
                review: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Invalid(_)));
    }
}
