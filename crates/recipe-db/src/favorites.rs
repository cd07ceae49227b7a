use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use uuid::Uuid;

use recipe_models::{Favorite, Page, PageParams, RecipeId, RecipeSummary, UserId};

use crate::error::DbResult;
use crate::recipes::RecipeRepository;
use crate::rows;

#[derive(Debug, Clone)]
pub struct FavoriteRepository {
    pool: SqlitePool,
}

impl FavoriteRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Add the favorite when absent, remove it when present.
    ///
    /// Returns whether the recipe is now a favorite.
    pub async fn toggle(&self, user_id: &UserId, recipe_id: &RecipeId) -> DbResult<bool> {
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query("DELETE FROM favorites WHERE user_id = ? AND recipe_id = ?")
            .bind(user_id.to_string())
            .bind(recipe_id.to_string())
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if removed == 0 {
            sqlx::query(
                "INSERT INTO favorites (id, user_id, recipe_id, created_at) VALUES (?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(user_id.to_string())
            .bind(recipe_id.to_string())
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(removed == 0)
    }

    pub async fn is_favorited(&self, user_id: &UserId, recipe_id: &RecipeId) -> DbResult<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM favorites WHERE user_id = ? AND recipe_id = ?")
                .bind(user_id.to_string())
                .bind(recipe_id.to_string())
                .fetch_one(&self.pool)
                .await?;
        Ok(count > 0)
    }

    /// The user's favorites, newest first, with recipes in list form.
    pub async fn list_for_user(
        &self,
        user_id: &UserId,
        params: PageParams,
    ) -> DbResult<Page<Favorite>> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM favorites WHERE user_id = ?")
            .bind(user_id.to_string())
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query(
            r"
            SELECT id, recipe_id, created_at FROM favorites
            WHERE user_id = ?
            ORDER BY created_at DESC
            LIMIT ? OFFSET ?
            ",
        )
        .bind(user_id.to_string())
        .bind(params.limit())
        .bind(params.offset())
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            entries.push((
                rows::uuid(row, "id")?,
                rows::recipe_id(row, "recipe_id")?,
                row.try_get::<DateTime<Utc>, _>("created_at")?,
            ));
        }

        let recipe_ids: Vec<RecipeId> = entries.iter().map(|(_, recipe_id, _)| *recipe_id).collect();
        let mut summaries: HashMap<RecipeId, RecipeSummary> = RecipeRepository::new(self.pool.clone())
            .summaries_by_ids(&recipe_ids, Some(user_id))
            .await?
            .into_iter()
            .map(|s| (s.id, s))
            .collect();

        let favorites = entries
            .into_iter()
            .filter_map(|(id, recipe_id, created_at)| {
                summaries.remove(&recipe_id).map(|recipe| Favorite {
                    id,
                    recipe,
                    created_at,
                })
            })
            .collect();

        Ok(Page::new(params, count, favorites))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipes::tests::{published_recipe, seller_and_customer};
    use crate::Database;

    #[tokio::test]
    async fn toggle_twice_restores_state() {
        let db = Database::in_memory().await.unwrap();
        let (seller, customer) = seller_and_customer(&db).await;
        let recipe = published_recipe(&db, &seller, "Vada Pav").await;
        let favorites = db.favorites();

        assert!(favorites.toggle(&customer.id, &recipe.id).await.unwrap());
        assert!(favorites.is_favorited(&customer.id, &recipe.id).await.unwrap());
        assert!(!favorites.toggle(&customer.id, &recipe.id).await.unwrap());
        assert!(!favorites.is_favorited(&customer.id, &recipe.id).await.unwrap());
    }

    #[tokio::test]
    async fn lists_favorites_with_recipe_summaries() {
        let db = Database::in_memory().await.unwrap();
        let (seller, customer) = seller_and_customer(&db).await;
        let first = published_recipe(&db, &seller, "Misal").await;
        let second = published_recipe(&db, &seller, "Thepla").await;
        let favorites = db.favorites();

        favorites.toggle(&customer.id, &first.id).await.unwrap();
        favorites.toggle(&customer.id, &second.id).await.unwrap();

        let page = favorites
            .list_for_user(&customer.id, PageParams::default())
            .await
            .unwrap();
        assert_eq!(page.count, 2);
        assert_eq!(page.results.len(), 2);
        assert!(page.results.iter().all(|f| f.recipe.is_favorited));

        let none = favorites
            .list_for_user(&seller.id, PageParams::default())
            .await
            .unwrap();
        assert_eq!(none.count, 0);
    }
}
