use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use tracing::debug;

use recipe_models::UserId;

use crate::error::DbResult;

/// Revoked refresh tokens, keyed by JWT id.
#[derive(Debug, Clone)]
pub struct TokenRepository {
    pool: SqlitePool,
}

impl TokenRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Revoke a token. Revoking twice is a no-op.
    pub async fn blacklist(
        &self,
        jti: &str,
        user_id: &UserId,
        expires_at: DateTime<Utc>,
    ) -> DbResult<()> {
        sqlx::query(
            r"
            INSERT INTO token_blacklist (jti, user_id, expires_at, blacklisted_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (jti) DO NOTHING
            ",
        )
        .bind(jti)
        .bind(user_id.to_string())
        .bind(expires_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn is_blacklisted(&self, jti: &str) -> DbResult<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM token_blacklist WHERE jti = ?")
            .bind(jti)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    /// Drop entries whose tokens have expired anyway.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> DbResult<u64> {
        let purged = sqlx::query("DELETE FROM token_blacklist WHERE expires_at < ?")
            .bind(now)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if purged > 0 {
            debug!("Purged {} expired blacklist entries", purged);
        }
        Ok(purged)
    }
}
