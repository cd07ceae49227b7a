//! Recipes, their tags and the listing queries.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Days, NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnection, SqlitePool, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};
use tracing::debug;
use uuid::Uuid;

use recipe_models::validation::normalize_tag;
use recipe_models::{
    display_name, round_rating, AuthorView, CategoryRef, Difficulty, Page, PageParams, Recipe,
    RecipeDetail, RecipeId, RecipeImage, RecipeQuery, RecipeStats, RecipeSummary,
    Tag, UserId, DEFAULT_TAG_COLOR,
};

use crate::error::{DbError, DbResult};
use crate::images::{image_from_row, IMAGE_COLUMNS};
use crate::ratings::RatingRepository;
use crate::rows;

/// Input for a new recipe.
#[derive(Debug, Clone)]
pub struct NewRecipe {
    pub title: String,
    pub description: String,
    pub ingredients: String,
    pub instructions: String,
    pub prep_time: i64,
    pub cook_time: i64,
    pub servings: i64,
    pub difficulty: Difficulty,
    pub category_id: Option<Uuid>,
    pub is_published: bool,
    pub is_featured: bool,
    pub tags: Vec<String>,
}

/// Partial recipe update. `None` leaves a field untouched.
///
/// `category_id: Some(None)` clears the category; `tags: Some(..)`
/// replaces the whole tag set.
#[derive(Debug, Clone, Default)]
pub struct RecipeChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub ingredients: Option<String>,
    pub instructions: Option<String>,
    pub prep_time: Option<i64>,
    pub cook_time: Option<i64>,
    pub servings: Option<i64>,
    pub difficulty: Option<Difficulty>,
    pub category_id: Option<Option<Uuid>>,
    pub is_published: Option<bool>,
    pub is_featured: Option<bool>,
    pub tags: Option<Vec<String>>,
}

/// Who looked at a recipe.
#[derive(Debug, Clone, Default)]
pub struct ViewRecord {
    pub user_id: Option<UserId>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Which recipes a listing draws from.
enum Scope {
    Published,
    Author(UserId),
}

const RECIPE_COLUMNS: &str = "id, title, description, ingredients, instructions, prep_time, \
     cook_time, servings, difficulty, author_id, category_id, is_published, is_featured, \
     view_count, created_at, updated_at";

const SUMMARY_SELECT: &str = r"
    SELECT r.id, r.title, r.description, r.ingredients, r.instructions,
           r.prep_time, r.cook_time, r.servings, r.difficulty,
           r.view_count, r.is_published, r.is_featured, r.created_at, r.updated_at,
           r.author_id, u.username AS author_username,
           u.first_name AS author_first_name, u.last_name AS author_last_name,
           r.category_id, c.name AS category_name,
           COALESCE((SELECT AVG(rt.rating) FROM ratings rt WHERE rt.recipe_id = r.id), 0.0)
               AS average_rating,
           (SELECT COUNT(*) FROM ratings rt WHERE rt.recipe_id = r.id) AS rating_count
    FROM recipes r
    JOIN users u ON u.id = r.author_id
    LEFT JOIN categories c ON c.id = r.category_id
";

const COUNT_SELECT: &str = r"
    SELECT COUNT(*)
    FROM recipes r
    JOIN users u ON u.id = r.author_id
";

/// Repository for recipes.
#[derive(Debug, Clone)]
pub struct RecipeRepository {
    pool: SqlitePool,
}

impl RecipeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a recipe and attach its tags in one transaction.
    pub async fn create(&self, author_id: &UserId, input: &NewRecipe) -> DbResult<Recipe> {
        let id = RecipeId::new();
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r"
            INSERT INTO recipes (
                id, title, description, ingredients, instructions, prep_time, cook_time,
                servings, difficulty, author_id, category_id, is_published, is_featured,
                view_count, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
            ",
        )
        .bind(id.to_string())
        .bind(input.title.trim())
        .bind(&input.description)
        .bind(&input.ingredients)
        .bind(&input.instructions)
        .bind(input.prep_time)
        .bind(input.cook_time)
        .bind(input.servings)
        .bind(input.difficulty.as_str())
        .bind(author_id.to_string())
        .bind(input.category_id.map(|c| c.to_string()))
        .bind(input.is_published)
        .bind(input.is_featured)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        replace_tags(&mut tx, &id, &input.tags).await?;
        tx.commit().await?;

        debug!(recipe_id = %id, author_id = %author_id, "Created recipe");
        self.get(&id)
            .await?
            .ok_or_else(|| DbError::not_found(format!("recipe {id}")))
    }

    /// Apply a partial update; tags, when given, replace the existing set.
    pub async fn update(&self, id: &RecipeId, changes: &RecipeChanges) -> DbResult<Recipe> {
        let mut tx = self.pool.begin().await?;

        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE recipes SET updated_at = ");
        qb.push_bind(Utc::now());
        if let Some(title) = &changes.title {
            qb.push(", title = ").push_bind(title.trim().to_string());
        }
        if let Some(description) = &changes.description {
            qb.push(", description = ").push_bind(description.clone());
        }
        if let Some(ingredients) = &changes.ingredients {
            qb.push(", ingredients = ").push_bind(ingredients.clone());
        }
        if let Some(instructions) = &changes.instructions {
            qb.push(", instructions = ").push_bind(instructions.clone());
        }
        if let Some(prep_time) = changes.prep_time {
            qb.push(", prep_time = ").push_bind(prep_time);
        }
        if let Some(cook_time) = changes.cook_time {
            qb.push(", cook_time = ").push_bind(cook_time);
        }
        if let Some(servings) = changes.servings {
            qb.push(", servings = ").push_bind(servings);
        }
        if let Some(difficulty) = changes.difficulty {
            qb.push(", difficulty = ").push_bind(difficulty.as_str());
        }
        if let Some(category_id) = changes.category_id {
            qb.push(", category_id = ")
                .push_bind(category_id.map(|c| c.to_string()));
        }
        if let Some(is_published) = changes.is_published {
            qb.push(", is_published = ").push_bind(is_published);
        }
        if let Some(is_featured) = changes.is_featured {
            qb.push(", is_featured = ").push_bind(is_featured);
        }
        qb.push(" WHERE id = ").push_bind(id.to_string());

        let result = qb.build().execute(&mut *tx).await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found(format!("recipe {id}")));
        }

        if let Some(tags) = &changes.tags {
            replace_tags(&mut tx, id, tags).await?;
        }
        tx.commit().await?;

        self.get(id)
            .await?
            .ok_or_else(|| DbError::not_found(format!("recipe {id}")))
    }

    /// Delete a recipe. Returns the media keys of its images so the caller
    /// can remove the files.
    pub async fn delete(&self, id: &RecipeId) -> DbResult<Vec<String>> {
        let mut tx = self.pool.begin().await?;

        let keys: Vec<String> = sqlx::query_scalar("SELECT image FROM recipe_images WHERE recipe_id = ?")
            .bind(id.to_string())
            .fetch_all(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM recipes WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found(format!("recipe {id}")));
        }

        tx.commit().await?;
        Ok(keys)
    }

    pub async fn get(&self, id: &RecipeId) -> DbResult<Option<Recipe>> {
        let sql = format!("SELECT {RECIPE_COLUMNS} FROM recipes WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(recipe_from_row).transpose()
    }

    pub async fn get_published(&self, id: &RecipeId) -> DbResult<Option<Recipe>> {
        Ok(self.get(id).await?.filter(|r| r.is_published))
    }

    /// A recipe only if `author_id` owns it.
    pub async fn get_owned(&self, id: &RecipeId, author_id: &UserId) -> DbResult<Option<Recipe>> {
        Ok(self.get(id).await?.filter(|r| r.author_id == *author_id))
    }

    /// Published recipes matching the query, one page at a time.
    pub async fn list(
        &self,
        query: &RecipeQuery,
        viewer: Option<&UserId>,
    ) -> DbResult<Page<RecipeSummary>> {
        self.page(Scope::Published, query, viewer).await
    }

    /// All of an author's recipes, published or not.
    pub async fn list_by_author(
        &self,
        author_id: &UserId,
        query: &RecipeQuery,
    ) -> DbResult<Page<RecipeSummary>> {
        self.page(Scope::Author(*author_id), query, Some(author_id))
            .await
    }

    /// Published and featured recipes, newest first.
    pub async fn featured(&self, limit: i64, viewer: Option<&UserId>) -> DbResult<Vec<RecipeSummary>> {
        let mut qb = QueryBuilder::<Sqlite>::new(SUMMARY_SELECT);
        qb.push(" WHERE r.is_published = 1 AND r.is_featured = 1 ORDER BY r.created_at DESC LIMIT ")
            .push_bind(limit);
        let rows = qb.build().fetch_all(&self.pool).await?;
        self.summaries(&rows, viewer).await
    }

    /// Published recipes by view count, then average rating.
    pub async fn popular(&self, limit: i64, viewer: Option<&UserId>) -> DbResult<Vec<RecipeSummary>> {
        let mut qb = QueryBuilder::<Sqlite>::new(SUMMARY_SELECT);
        qb.push(
            " WHERE r.is_published = 1 \
              ORDER BY r.view_count DESC, average_rating DESC, r.created_at DESC LIMIT ",
        )
        .push_bind(limit);
        let rows = qb.build().fetch_all(&self.pool).await?;
        self.summaries(&rows, viewer).await
    }

    /// Recipes published since `since`, newest first.
    pub async fn recent_published(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> DbResult<Vec<RecipeSummary>> {
        let mut qb = QueryBuilder::<Sqlite>::new(SUMMARY_SELECT);
        qb.push(" WHERE r.is_published = 1 AND r.created_at >= ")
            .push_bind(since)
            .push(" ORDER BY r.created_at DESC LIMIT ")
            .push_bind(limit);
        let rows = qb.build().fetch_all(&self.pool).await?;
        self.summaries(&rows, None).await
    }

    pub async fn stats(&self) -> DbResult<RecipeStats> {
        let row = sqlx::query(
            r"
            SELECT
                (SELECT COUNT(*) FROM recipes WHERE is_published = 1) AS total_recipes,
                (SELECT COUNT(*) FROM categories WHERE is_active = 1) AS total_categories,
                (SELECT COUNT(*) FROM ratings) AS total_ratings,
                (SELECT COUNT(*) FROM recipes WHERE is_published = 1 AND is_featured = 1)
                    AS featured_recipes
            ",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(RecipeStats {
            total_recipes: row.try_get("total_recipes")?,
            total_categories: row.try_get("total_categories")?,
            total_ratings: row.try_get("total_ratings")?,
            featured_recipes: row.try_get("featured_recipes")?,
        })
    }

    /// Store a view row and bump the recipe's view counter.
    pub async fn record_view(&self, id: &RecipeId, view: &ViewRecord) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r"
            INSERT INTO recipe_views (id, recipe_id, user_id, ip_address, user_agent, viewed_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(id.to_string())
        .bind(view.user_id.map(|u| u.to_string()))
        .bind(&view.ip_address)
        .bind(&view.user_agent)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE recipes SET view_count = view_count + 1 WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Full recipe view, published or not; callers decide visibility.
    pub async fn detail(
        &self,
        id: &RecipeId,
        viewer: Option<&UserId>,
    ) -> DbResult<Option<RecipeDetail>> {
        let mut qb = QueryBuilder::<Sqlite>::new(SUMMARY_SELECT);
        qb.push(" WHERE r.id = ").push_bind(id.to_string());
        let Some(row) = qb.build().fetch_optional(&self.pool).await? else {
            return Ok(None);
        };

        let summary = self
            .summaries(std::slice::from_ref(&row), viewer)
            .await?
            .pop()
            .ok_or_else(|| DbError::not_found(format!("recipe {id}")))?;

        let sql = format!(
            "SELECT {IMAGE_COLUMNS} FROM recipe_images WHERE recipe_id = ? \
             ORDER BY is_primary DESC, sort_order, created_at"
        );
        let images = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(image_from_row)
            .collect::<DbResult<Vec<_>>>()?;

        let ratings_repo = RatingRepository::new(self.pool.clone());
        let ratings = ratings_repo.list_for_recipe(id).await?;
        let user_rating = match viewer {
            Some(user_id) => ratings.iter().find(|r| r.user_id == *user_id).cloned(),
            None => None,
        };

        Ok(Some(RecipeDetail {
            id: summary.id,
            title: summary.title,
            description: summary.description,
            ingredients: row.try_get("ingredients")?,
            instructions: row.try_get("instructions")?,
            prep_time: summary.prep_time,
            cook_time: summary.cook_time,
            total_time: summary.total_time,
            servings: summary.servings,
            difficulty: summary.difficulty,
            author: summary.author,
            category: summary.category,
            images,
            ratings,
            average_rating: summary.average_rating,
            rating_count: summary.rating_count,
            user_rating,
            view_count: summary.view_count,
            is_published: summary.is_published,
            is_featured: summary.is_featured,
            is_favorited: summary.is_favorited,
            tags: summary.tags,
            created_at: summary.created_at,
            updated_at: row.try_get("updated_at")?,
        }))
    }

    /// Summaries for the given recipe ids, in the given order.
    pub(crate) async fn summaries_by_ids(
        &self,
        ids: &[RecipeId],
        viewer: Option<&UserId>,
    ) -> DbResult<Vec<RecipeSummary>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb = QueryBuilder::<Sqlite>::new(SUMMARY_SELECT);
        qb.push(" WHERE r.id IN (");
        let mut separated = qb.separated(", ");
        for id in ids {
            separated.push_bind(id.to_string());
        }
        separated.push_unseparated(")");
        let rows = qb.build().fetch_all(&self.pool).await?;

        let mut by_id: HashMap<RecipeId, RecipeSummary> = self
            .summaries(&rows, viewer)
            .await?
            .into_iter()
            .map(|s| (s.id, s))
            .collect();
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    async fn page(
        &self,
        scope: Scope,
        query: &RecipeQuery,
        viewer: Option<&UserId>,
    ) -> DbResult<Page<RecipeSummary>> {
        let params = PageParams::new(query.page, query.page_size);

        let mut count_qb = QueryBuilder::<Sqlite>::new(COUNT_SELECT);
        push_filters(&mut count_qb, &scope, query);
        let count: i64 = count_qb.build_query_scalar().fetch_one(&self.pool).await?;

        let mut qb = QueryBuilder::<Sqlite>::new(SUMMARY_SELECT);
        push_filters(&mut qb, &scope, query);
        qb.push(" ORDER BY ")
            .push(query.ordering().sql())
            .push(" LIMIT ")
            .push_bind(params.limit())
            .push(" OFFSET ")
            .push_bind(params.offset());
        let rows = qb.build().fetch_all(&self.pool).await?;

        let results = self.summaries(&rows, viewer).await?;
        Ok(Page::new(params, count, results))
    }

    /// Turn summary rows into summaries, batch-loading tags, primary images
    /// and the viewer's favorites.
    async fn summaries(
        &self,
        rows: &[SqliteRow],
        viewer: Option<&UserId>,
    ) -> DbResult<Vec<RecipeSummary>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let ids = rows
            .iter()
            .map(|row| rows::recipe_id(row, "id"))
            .collect::<DbResult<Vec<_>>>()?;

        let mut tags = self.tags_for(&ids).await?;
        let mut images = self.primary_images_for(&ids).await?;
        let favorites = match viewer {
            Some(user_id) => self.favorited_among(user_id, &ids).await?,
            None => HashSet::new(),
        };

        rows.iter()
            .zip(ids)
            .map(|(row, id)| -> DbResult<RecipeSummary> {
                let prep_time: i64 = row.try_get("prep_time")?;
                let cook_time: i64 = row.try_get("cook_time")?;
                let first_name: Option<String> = row.try_get("author_first_name")?;
                let last_name: Option<String> = row.try_get("author_last_name")?;
                let username: String = row.try_get("author_username")?;
                let category = match rows::opt_uuid(row, "category_id")? {
                    Some(category_id) => Some(CategoryRef {
                        id: category_id,
                        name: row.try_get("category_name")?,
                    }),
                    None => None,
                };
                let average: f64 = row.try_get("average_rating")?;

                Ok(RecipeSummary {
                    id,
                    title: row.try_get("title")?,
                    description: row.try_get("description")?,
                    author: AuthorView {
                        id: rows::user_id(row, "author_id")?,
                        full_name: display_name(
                            first_name.as_deref(),
                            last_name.as_deref(),
                            &username,
                        ),
                        username,
                    },
                    category,
                    prep_time,
                    cook_time,
                    total_time: prep_time + cook_time,
                    servings: row.try_get("servings")?,
                    difficulty: rows::parsed(row, "difficulty")?,
                    primary_image: images.remove(&id),
                    average_rating: round_rating(average),
                    rating_count: row.try_get("rating_count")?,
                    view_count: row.try_get("view_count")?,
                    is_published: row.try_get("is_published")?,
                    is_featured: row.try_get("is_featured")?,
                    is_favorited: favorites.contains(&id),
                    tags: tags.remove(&id).unwrap_or_default(),
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    async fn tags_for(&self, ids: &[RecipeId]) -> DbResult<HashMap<RecipeId, Vec<Tag>>> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT rtg.recipe_id, t.id, t.name, t.color \
             FROM recipe_tags rtg JOIN tags t ON t.id = rtg.tag_id \
             WHERE rtg.recipe_id IN (",
        );
        let mut separated = qb.separated(", ");
        for id in ids {
            separated.push_bind(id.to_string());
        }
        separated.push_unseparated(") ORDER BY t.name");

        let mut tags: HashMap<RecipeId, Vec<Tag>> = HashMap::new();
        for row in qb.build().fetch_all(&self.pool).await? {
            tags.entry(rows::recipe_id(&row, "recipe_id")?)
                .or_default()
                .push(Tag {
                    id: rows::uuid(&row, "id")?,
                    name: row.try_get("name")?,
                    color: row.try_get("color")?,
                });
        }
        Ok(tags)
    }

    /// The primary image of each recipe, falling back to its first image.
    async fn primary_images_for(
        &self,
        ids: &[RecipeId],
    ) -> DbResult<HashMap<RecipeId, RecipeImage>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {IMAGE_COLUMNS} FROM recipe_images WHERE recipe_id IN ("
        ));
        let mut separated = qb.separated(", ");
        for id in ids {
            separated.push_bind(id.to_string());
        }
        separated.push_unseparated(") ORDER BY is_primary DESC, sort_order, created_at");

        let mut images = HashMap::new();
        for row in qb.build().fetch_all(&self.pool).await? {
            let image = image_from_row(&row)?;
            images.entry(image.recipe_id).or_insert(image);
        }
        Ok(images)
    }

    async fn favorited_among(
        &self,
        user_id: &UserId,
        ids: &[RecipeId],
    ) -> DbResult<HashSet<RecipeId>> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT recipe_id FROM favorites WHERE user_id = ");
        qb.push_bind(user_id.to_string()).push(" AND recipe_id IN (");
        let mut separated = qb.separated(", ");
        for id in ids {
            separated.push_bind(id.to_string());
        }
        separated.push_unseparated(")");

        qb.build()
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|row| rows::recipe_id(row, "recipe_id"))
            .collect()
    }
}

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, scope: &Scope, query: &RecipeQuery) {
    match scope {
        Scope::Published => {
            qb.push(" WHERE r.is_published = 1");
        }
        Scope::Author(author_id) => {
            qb.push(" WHERE r.author_id = ").push_bind(author_id.to_string());
        }
    }

    if let Some(term) = query.search_term() {
        let pattern = rows::like_pattern(term);
        qb.push(" AND (");
        for (i, column) in [
            "r.title",
            "r.description",
            "r.ingredients",
            "r.instructions",
            "u.username",
        ]
        .iter()
        .enumerate()
        {
            if i > 0 {
                qb.push(" OR ");
            }
            qb.push(format!("LOWER({column}) LIKE "))
                .push_bind(pattern.clone())
                .push(" ESCAPE '\\'");
        }
        qb.push(")");
    }
    if let Some(category) = query.category {
        qb.push(" AND r.category_id = ").push_bind(category.to_string());
    }
    if let Some(difficulty) = query.difficulty {
        qb.push(" AND r.difficulty = ").push_bind(difficulty.as_str());
    }
    if let Some(max) = query.max_prep_time {
        qb.push(" AND r.prep_time <= ").push_bind(max);
    }
    if let Some(max) = query.max_cook_time {
        qb.push(" AND r.cook_time <= ").push_bind(max);
    }
    if let Some(max) = query.max_total_time {
        qb.push(" AND (r.prep_time + r.cook_time) <= ").push_bind(max);
    }
    if let Some(servings) = query.servings {
        qb.push(" AND r.servings = ").push_bind(servings);
    }
    if let Some(min) = query.min_servings {
        qb.push(" AND r.servings >= ").push_bind(min);
    }
    if let Some(max) = query.max_servings {
        qb.push(" AND r.servings <= ").push_bind(max);
    }
    if let Some(min) = query.min_rating {
        qb.push(" AND EXISTS (SELECT 1 FROM ratings mr WHERE mr.recipe_id = r.id AND mr.rating >= ")
            .push_bind(min)
            .push(")");
    }
    if let Some(author) = query.author.as_deref().map(str::trim).filter(|a| !a.is_empty()) {
        qb.push(" AND LOWER(u.username) LIKE ")
            .push_bind(rows::like_pattern(author))
            .push(" ESCAPE '\\'");
    }
    if let Some(featured) = query.featured {
        qb.push(" AND r.is_featured = ").push_bind(featured);
    }

    let tag_names = query.tag_names();
    if !tag_names.is_empty() {
        qb.push(
            " AND EXISTS (SELECT 1 FROM recipe_tags ft JOIN tags t ON t.id = ft.tag_id \
             WHERE ft.recipe_id = r.id AND t.name IN (",
        );
        let mut separated = qb.separated(", ");
        for name in tag_names {
            separated.push_bind(name);
        }
        separated.push_unseparated("))");
    }

    if let Some(after) = query.created_after {
        qb.push(" AND r.created_at >= ").push_bind(start_of_day(after));
    }
    if let Some(before) = query.created_before {
        // Inclusive of the whole day
        let next = before.checked_add_days(Days::new(1)).unwrap_or(before);
        qb.push(" AND r.created_at < ").push_bind(start_of_day(next));
    }
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}

/// Replace a recipe's tags, creating missing tags on demand.
async fn replace_tags(
    conn: &mut SqliteConnection,
    recipe_id: &RecipeId,
    names: &[String],
) -> DbResult<()> {
    sqlx::query("DELETE FROM recipe_tags WHERE recipe_id = ?")
        .bind(recipe_id.to_string())
        .execute(&mut *conn)
        .await?;

    let mut seen = HashSet::new();
    for name in names.iter().filter_map(|n| normalize_tag(n)) {
        if !seen.insert(name.clone()) {
            continue;
        }

        sqlx::query("INSERT INTO tags (id, name, color) VALUES (?, ?, ?) ON CONFLICT (name) DO NOTHING")
            .bind(Uuid::new_v4().to_string())
            .bind(&name)
            .bind(DEFAULT_TAG_COLOR)
            .execute(&mut *conn)
            .await?;

        let tag_id: String = sqlx::query_scalar("SELECT id FROM tags WHERE name = ?")
            .bind(&name)
            .fetch_one(&mut *conn)
            .await?;

        sqlx::query("INSERT OR IGNORE INTO recipe_tags (id, recipe_id, tag_id) VALUES (?, ?, ?)")
            .bind(Uuid::new_v4().to_string())
            .bind(recipe_id.to_string())
            .bind(tag_id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

fn recipe_from_row(row: &SqliteRow) -> DbResult<Recipe> {
    Ok(Recipe {
        id: rows::recipe_id(row, "id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        ingredients: row.try_get("ingredients")?,
        instructions: row.try_get("instructions")?,
        prep_time: row.try_get("prep_time")?,
        cook_time: row.try_get("cook_time")?,
        servings: row.try_get("servings")?,
        difficulty: rows::parsed(row, "difficulty")?,
        author_id: rows::user_id(row, "author_id")?,
        category_id: rows::opt_uuid(row, "category_id")?,
        is_published: row.try_get("is_published")?,
        is_featured: row.try_get("is_featured")?,
        view_count: row.try_get("view_count")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
