use chrono::Utc;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use uuid::Uuid;

use recipe_models::{RecipeId, RecipeImage};

use crate::error::DbResult;
use crate::rows;

/// Metadata for an uploaded recipe image.
#[derive(Debug, Clone)]
pub struct NewImage {
    pub recipe_id: RecipeId,
    /// Media key of the stored file
    pub image: String,
    pub caption: Option<String>,
    pub is_primary: bool,
    pub order: i64,
}

pub(crate) const IMAGE_COLUMNS: &str =
    "id, recipe_id, image, caption, is_primary, sort_order, created_at";

#[derive(Debug, Clone)]
pub struct ImageRepository {
    pool: SqlitePool,
}

impl ImageRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert an image. A new primary image demotes the recipe's others.
    pub async fn create(&self, input: &NewImage) -> DbResult<RecipeImage> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let caption = input
            .caption
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);

        let mut tx = self.pool.begin().await?;

        if input.is_primary {
            sqlx::query("UPDATE recipe_images SET is_primary = 0 WHERE recipe_id = ?")
                .bind(input.recipe_id.to_string())
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            r"
            INSERT INTO recipe_images (id, recipe_id, image, caption, is_primary, sort_order, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(id.to_string())
        .bind(input.recipe_id.to_string())
        .bind(&input.image)
        .bind(&caption)
        .bind(input.is_primary)
        .bind(input.order)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(RecipeImage {
            id,
            recipe_id: input.recipe_id,
            image: input.image.clone(),
            image_url: None,
            caption,
            is_primary: input.is_primary,
            order: input.order,
            created_at: now,
        })
    }

    pub async fn get(&self, id: Uuid) -> DbResult<Option<RecipeImage>> {
        let sql = format!("SELECT {IMAGE_COLUMNS} FROM recipe_images WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(image_from_row).transpose()
    }

    /// Images of a recipe, primary first then by display order.
    pub async fn list_for_recipe(&self, recipe_id: &RecipeId) -> DbResult<Vec<RecipeImage>> {
        let sql = format!(
            "SELECT {IMAGE_COLUMNS} FROM recipe_images WHERE recipe_id = ? \
             ORDER BY is_primary DESC, sort_order, created_at"
        );
        let rows = sqlx::query(&sql)
            .bind(recipe_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(image_from_row).collect()
    }
}

pub(crate) fn image_from_row(row: &SqliteRow) -> DbResult<RecipeImage> {
    Ok(RecipeImage {
        id: rows::uuid(row, "id")?,
        recipe_id: rows::recipe_id(row, "recipe_id")?,
        image: row.try_get("image")?,
        image_url: None,
        caption: row.try_get("caption")?,
        is_primary: row.try_get("is_primary")?,
        order: row.try_get("sort_order")?,
        created_at: row.try_get("created_at")?,
    })
}
