//! User accounts and profiles.

use chrono::{DateTime, NaiveDate, Utc};
use metrics::counter;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use tracing::info;
use uuid::Uuid;

use recipe_models::{Role, SellerProfile, User, UserId, UserProfile};

use crate::error::{DbError, DbResult};
use crate::rows;

/// Input for creating an account together with its profiles.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: Role,
    pub password_hash: String,
    pub seller: Option<NewSellerProfile>,
}

#[derive(Debug, Clone)]
pub struct NewSellerProfile {
    pub gst_number: String,
    pub business_name: String,
}

/// Partial profile update. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub bio: Option<String>,
    pub phone_number: Option<String>,
    pub address: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
}

impl ProfileUpdate {
    fn touches_user(&self) -> bool {
        self.first_name.is_some() || self.last_name.is_some()
    }

    fn touches_profile(&self) -> bool {
        self.bio.is_some()
            || self.phone_number.is_some()
            || self.address.is_some()
            || self.date_of_birth.is_some()
    }
}

/// One line of the weekly user data export.
#[derive(Debug, Clone)]
pub struct UserExportRow {
    pub user: User,
    pub total_recipes: i64,
    pub total_ratings_given: i64,
    pub total_favorites: i64,
    /// Average score across the user's recipes; sellers only
    pub avg_rating_received: Option<f64>,
}

const USER_COLUMNS: &str = "id, username, email, first_name, last_name, role, password_hash, \
     is_active, is_staff, is_superuser, auth_provider, created_at, updated_at, last_login";

/// Repository for users and their profiles.
#[derive(Debug, Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a user, its empty profile and (for sellers) its seller profile.
    ///
    /// Emails are stored lower-cased; GST numbers upper-cased.
    pub async fn create(&self, account: &NewAccount) -> DbResult<User> {
        let email = account.email.trim().to_lowercase();
        let now = Utc::now();
        let id = UserId::new();

        let mut tx = self.pool.begin().await?;

        let taken: Option<String> = sqlx::query_scalar("SELECT id FROM users WHERE email = ?")
            .bind(&email)
            .fetch_optional(&mut *tx)
            .await?;
        if taken.is_some() {
            return Err(DbError::conflict("email"));
        }

        sqlx::query(
            r"
            INSERT INTO users (
                id, username, email, first_name, last_name, role, password_hash,
                is_active, is_staff, is_superuser, auth_provider, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, 1, 0, 0, 'email', ?, ?)
            ",
        )
        .bind(id.to_string())
        .bind(account.username.trim())
        .bind(&email)
        .bind(&account.first_name)
        .bind(&account.last_name)
        .bind(account.role.as_str())
        .bind(&account.password_hash)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO user_profiles (id, user_id, created_at, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(id.to_string())
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if let Some(seller) = &account.seller {
            let gst = seller.gst_number.trim().to_uppercase();
            let gst_taken: Option<String> =
                sqlx::query_scalar("SELECT id FROM seller_profiles WHERE gst_number = ?")
                    .bind(&gst)
                    .fetch_optional(&mut *tx)
                    .await?;
            if gst_taken.is_some() {
                return Err(DbError::conflict("gst_number"));
            }

            sqlx::query(
                r"
                INSERT INTO seller_profiles (
                    id, user_id, gst_number, business_name, is_verified, created_at, updated_at
                ) VALUES (?, ?, ?, ?, 0, ?, ?)
                ",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(id.to_string())
            .bind(&gst)
            .bind(seller.business_name.trim())
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        counter!("recipe_users_registered_total", "role" => account.role.as_str()).increment(1);
        info!(user_id = %id, role = %account.role, "Created user account");

        self.get(&id)
            .await?
            .ok_or_else(|| DbError::not_found(format!("user {id}")))
    }

    pub async fn get(&self, id: &UserId) -> DbResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    /// Case-insensitive lookup by email.
    pub async fn find_by_email(&self, email: &str) -> DbResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?");
        let row = sqlx::query(&sql)
            .bind(email.trim().to_lowercase())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    pub async fn email_exists(&self, email: &str) -> DbResult<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE email = ?")
            .bind(email.trim().to_lowercase())
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    pub async fn gst_exists(&self, gst_number: &str) -> DbResult<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM seller_profiles WHERE gst_number = ?")
                .bind(gst_number.trim().to_uppercase())
                .fetch_one(&self.pool)
                .await?;
        Ok(count > 0)
    }

    pub async fn record_login(&self, id: &UserId) -> DbResult<()> {
        sqlx::query("UPDATE users SET last_login = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_password(&self, id: &UserId, password_hash: &str) -> DbResult<()> {
        let result = sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?")
            .bind(password_hash)
            .bind(Utc::now())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found(format!("user {id}")));
        }
        Ok(())
    }

    /// Flip the superuser and staff flags, used when seeding administrators.
    pub async fn set_superuser(&self, id: &UserId, is_superuser: bool) -> DbResult<()> {
        sqlx::query("UPDATE users SET is_superuser = ?, is_staff = ?, updated_at = ? WHERE id = ?")
            .bind(is_superuser)
            .bind(is_superuser)
            .bind(Utc::now())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_active(&self, id: &UserId, is_active: bool) -> DbResult<()> {
        sqlx::query("UPDATE users SET is_active = ?, updated_at = ? WHERE id = ?")
            .bind(is_active)
            .bind(Utc::now())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_profile(&self, id: &UserId) -> DbResult<Option<UserProfile>> {
        let row = sqlx::query(
            r"
            SELECT id, user_id, bio, phone_number, address, date_of_birth, created_at, updated_at
            FROM user_profiles WHERE user_id = ?
            ",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(profile_from_row).transpose()
    }

    pub async fn get_seller_profile(&self, id: &UserId) -> DbResult<Option<SellerProfile>> {
        let row = sqlx::query(
            r"
            SELECT id, user_id, gst_number, business_name, business_description,
                   business_address, business_phone, is_verified, created_at, updated_at
            FROM seller_profiles WHERE user_id = ?
            ",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(seller_profile_from_row).transpose()
    }

    /// Apply a partial update to the user's names and profile.
    pub async fn update_profile(&self, id: &UserId, update: &ProfileUpdate) -> DbResult<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let exists: Option<String> = sqlx::query_scalar("SELECT id FROM users WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(DbError::not_found(format!("user {id}")));
        }

        if update.touches_user() {
            sqlx::query(
                r"
                UPDATE users SET
                    first_name = COALESCE(?, first_name),
                    last_name = COALESCE(?, last_name),
                    updated_at = ?
                WHERE id = ?
                ",
            )
            .bind(&update.first_name)
            .bind(&update.last_name)
            .bind(now)
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        }

        if update.touches_profile() {
            // Accounts created before profiles existed get one on first update
            sqlx::query(
                r"
                INSERT INTO user_profiles (id, user_id, created_at, updated_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT (user_id) DO NOTHING
                ",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(id.to_string())
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r"
                UPDATE user_profiles SET
                    bio = COALESCE(?, bio),
                    phone_number = COALESCE(?, phone_number),
                    address = COALESCE(?, address),
                    date_of_birth = COALESCE(?, date_of_birth),
                    updated_at = ?
                WHERE user_id = ?
                ",
            )
            .bind(&update.bio)
            .bind(&update.phone_number)
            .bind(&update.address)
            .bind(update.date_of_birth)
            .bind(now)
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn list_active(&self) -> DbResult<Vec<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE is_active = 1 ORDER BY created_at");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(user_from_row).collect()
    }

    pub async fn list_superusers(&self) -> DbResult<Vec<User>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE is_superuser = 1 AND is_active = 1 ORDER BY created_at"
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(user_from_row).collect()
    }

    /// Every user with activity counters, for the weekly export.
    pub async fn export_rows(&self) -> DbResult<Vec<UserExportRow>> {
        let sql = format!(
            r"
            SELECT {USER_COLUMNS},
                (SELECT COUNT(*) FROM recipes r WHERE r.author_id = users.id) AS total_recipes,
                (SELECT COUNT(*) FROM ratings rt WHERE rt.user_id = users.id) AS total_ratings_given,
                (SELECT COUNT(*) FROM favorites f WHERE f.user_id = users.id) AS total_favorites,
                (SELECT AVG(rt.rating) FROM ratings rt
                    JOIN recipes r ON r.id = rt.recipe_id
                    WHERE r.author_id = users.id) AS avg_rating_received
            FROM users
            ORDER BY created_at
            "
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| -> DbResult<UserExportRow> {
                let user = user_from_row(row)?;
                let avg: Option<f64> = row.try_get("avg_rating_received")?;
                let total_recipes: i64 = row.try_get("total_recipes")?;
                let avg_rating_received = if user.role.is_seller() && total_recipes > 0 {
                    Some(avg.unwrap_or(0.0))
                } else {
                    None
                };
                Ok(UserExportRow {
                    total_recipes,
                    total_ratings_given: row.try_get("total_ratings_given")?,
                    total_favorites: row.try_get("total_favorites")?,
                    avg_rating_received,
                    user,
                })
            })
            .collect()
    }
}

fn user_from_row(row: &SqliteRow) -> DbResult<User> {
    Ok(User {
        id: rows::user_id(row, "id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        role: rows::parsed(row, "role")?,
        password_hash: row.try_get("password_hash")?,
        is_active: row.try_get("is_active")?,
        is_staff: row.try_get("is_staff")?,
        is_superuser: row.try_get("is_superuser")?,
        auth_provider: row.try_get("auth_provider")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
        last_login: row.try_get::<Option<DateTime<Utc>>, _>("last_login")?,
    })
}

fn profile_from_row(row: &SqliteRow) -> DbResult<UserProfile> {
    Ok(UserProfile {
        id: rows::uuid(row, "id")?,
        user_id: rows::user_id(row, "user_id")?,
        bio: row.try_get("bio")?,
        phone_number: row.try_get("phone_number")?,
        address: row.try_get("address")?,
        date_of_birth: row.try_get::<Option<NaiveDate>, _>("date_of_birth")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn seller_profile_from_row(row: &SqliteRow) -> DbResult<SellerProfile> {
    Ok(SellerProfile {
        id: rows::uuid(row, "id")?,
        user_id: rows::user_id(row, "user_id")?,
        gst_number: row.try_get("gst_number")?,
        business_name: row.try_get("business_name")?,
        business_description: row.try_get("business_description")?,
        business_address: row.try_get("business_address")?,
        business_phone: row.try_get("business_phone")?,
        is_verified: row.try_get("is_verified")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::Database;

    pub(crate) fn account(email: &str, role: Role) -> NewAccount {
        NewAccount {
            username: email.split('@').next().unwrap_or("user").to_string(),
            email: email.to_string(),
            first_name: None,
            last_name: None,
            role,
            password_hash: "hash".to_string(),
            seller: match role {
                Role::Seller => Some(NewSellerProfile {
                    gst_number: format!("{:0>15}", email.len()),
                    business_name: "Kitchen Co".to_string(),
                }),
                Role::Customer => None,
            },
        }
    }

    #[tokio::test]
    async fn create_normalizes_email_and_builds_profiles() {
        let db = Database::in_memory().await.unwrap();
        let users = db.users();

        let mut input = account("Chef@Example.com", Role::Seller);
        input.seller = Some(NewSellerProfile {
            gst_number: "22aaaaa0000a1z5".to_string(),
            business_name: "Chef Co".to_string(),
        });
        let user = users.create(&input).await.unwrap();

        assert_eq!(user.email, "chef@example.com");
        assert!(users.get_profile(&user.id).await.unwrap().is_some());
        let seller = users.get_seller_profile(&user.id).await.unwrap().unwrap();
        assert_eq!(seller.gst_number, "22AAAAA0000A1Z5");
        assert!(!seller.is_verified);

        let found = users.find_by_email("CHEF@example.COM").await.unwrap().unwrap();
        assert_eq!(found.id, user.id);
    }

    #[tokio::test]
    async fn duplicate_email_is_a_conflict() {
        let db = Database::in_memory().await.unwrap();
        let users = db.users();
        users.create(&account("a@example.com", Role::Customer)).await.unwrap();

        let err = users
            .create(&account("A@example.com", Role::Customer))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn partial_profile_update_keeps_other_fields() {
        let db = Database::in_memory().await.unwrap();
        let users = db.users();
        let user = users.create(&account("p@example.com", Role::Customer)).await.unwrap();

        users
            .update_profile(
                &user.id,
                &ProfileUpdate {
                    first_name: Some("Pat".to_string()),
                    bio: Some("Home cook".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        users
            .update_profile(
                &user.id,
                &ProfileUpdate {
                    address: Some("1 Main St".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let reloaded = users.get(&user.id).await.unwrap().unwrap();
        assert_eq!(reloaded.first_name.as_deref(), Some("Pat"));
        let profile = users.get_profile(&user.id).await.unwrap().unwrap();
        assert_eq!(profile.bio.as_deref(), Some("Home cook"));
        assert_eq!(profile.address.as_deref(), Some("1 Main St"));
    }

    #[tokio::test]
    async fn export_rows_report_seller_averages_only() {
        let db = Database::in_memory().await.unwrap();
        let users = db.users();
        users.create(&account("c@example.com", Role::Customer)).await.unwrap();

        let rows = users.export_rows().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].total_recipes, 0);
        assert!(rows[0].avg_rating_received.is_none());
    }
}
