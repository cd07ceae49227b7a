use chrono::Utc;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use uuid::Uuid;

use recipe_models::validation::title_case;
use recipe_models::Category;

use crate::error::{DbError, DbResult};
use crate::rows;

/// Repository for recipe categories.
#[derive(Debug, Clone)]
pub struct CategoryRepository {
    pool: SqlitePool,
}

impl CategoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Active categories ordered by name, each with its published recipe count.
    pub async fn list_active_with_counts(&self) -> DbResult<Vec<Category>> {
        let rows = sqlx::query(
            r"
            SELECT c.id, c.name, c.description, c.is_active, c.created_at,
                (SELECT COUNT(*) FROM recipes r
                    WHERE r.category_id = c.id AND r.is_published = 1) AS recipe_count
            FROM categories c
            WHERE c.is_active = 1
            ORDER BY c.name
            ",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(category_from_row).collect()
    }

    pub async fn get(&self, id: Uuid) -> DbResult<Option<Category>> {
        let row = sqlx::query(
            r"
            SELECT c.id, c.name, c.description, c.is_active, c.created_at,
                (SELECT COUNT(*) FROM recipes r
                    WHERE r.category_id = c.id AND r.is_published = 1) AS recipe_count
            FROM categories c
            WHERE c.id = ?
            ",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(category_from_row).transpose()
    }

    /// Insert a category. Names are stored title-cased and must be unique.
    pub async fn create(&self, name: &str, description: Option<&str>) -> DbResult<Category> {
        let name = title_case(name);
        if name.is_empty() {
            return Err(DbError::invalid("category name must not be empty"));
        }
        let id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            r"
            INSERT INTO categories (id, name, description, is_active, created_at, updated_at)
            VALUES (?, ?, ?, 1, ?, ?)
            ",
        )
        .bind(id.to_string())
        .bind(&name)
        .bind(description)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(Category {
            id,
            name,
            description: description.map(str::to_string),
            is_active: true,
            recipe_count: 0,
            created_at: now,
        })
    }

    /// Fetch a category by its title-cased name, creating it if missing.
    pub async fn get_or_create(&self, name: &str, description: Option<&str>) -> DbResult<Category> {
        let normalized = title_case(name);
        let existing: Option<String> = sqlx::query_scalar("SELECT id FROM categories WHERE name = ?")
            .bind(&normalized)
            .fetch_optional(&self.pool)
            .await?;

        match existing {
            Some(id) => {
                let id = Uuid::parse_str(&id)?;
                self.get(id)
                    .await?
                    .ok_or_else(|| DbError::not_found(format!("category {id}")))
            }
            None => self.create(&normalized, description).await,
        }
    }

    pub async fn count_active(&self) -> DbResult<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM categories WHERE is_active = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

fn category_from_row(row: &SqliteRow) -> DbResult<Category> {
    Ok(Category {
        id: rows::uuid(row, "id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        is_active: row.try_get("is_active")?,
        recipe_count: row.try_get("recipe_count")?,
        created_at: row.try_get("created_at")?,
    })
}
