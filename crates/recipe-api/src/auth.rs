//! JWT issuance and verification, password hashing, and the
//! authenticated-user extractors.

use std::time::Duration;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use recipe_models::{Role, User, UserId};

use crate::config::ApiConfig;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Which half of a token pair a JWT is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    Refresh,
}

/// Claims carried by every token this server issues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User ID
    pub sub: String,
    pub role: Role,
    pub token_type: TokenType,
    /// Unique token ID, used for blacklisting
    pub jti: String,
    /// Issued at
    pub iat: i64,
    /// Expiration
    pub exp: i64,
}

impl Claims {
    pub fn user_id(&self) -> ApiResult<UserId> {
        self.sub
            .parse()
            .map_err(|_| ApiError::unauthorized("Token contained no recognizable user identification"))
    }

    pub fn expires_at(&self) -> chrono::DateTime<Utc> {
        chrono::DateTime::from_timestamp(self.exp, 0).unwrap_or_else(Utc::now)
    }
}

/// Access and refresh token for one login.
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

/// HS256 signing keys and token lifetimes.
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl JwtKeys {
    pub fn new(secret: &[u8], access_ttl: Duration, refresh_ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            access_ttl,
            refresh_ttl,
        }
    }

    pub fn from_config(config: &ApiConfig) -> Self {
        Self::new(
            config.jwt_secret.as_bytes(),
            config.access_token_ttl,
            config.refresh_token_ttl,
        )
    }

    /// Sign a single token for a user.
    pub fn issue(&self, user_id: &UserId, role: Role, token_type: TokenType) -> ApiResult<String> {
        let ttl = match token_type {
            TokenType::Access => self.access_ttl,
            TokenType::Refresh => self.refresh_ttl,
        };
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            role,
            token_type,
            jti: Uuid::new_v4().simple().to_string(),
            iat: now,
            exp: now + i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX / 2),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| ApiError::internal(format!("Failed to generate authentication tokens: {e}")))
    }

    pub fn issue_pair(&self, user: &User) -> ApiResult<TokenPair> {
        Ok(TokenPair {
            access: self.issue(&user.id, user.role, TokenType::Access)?,
            refresh: self.issue(&user.id, user.role, TokenType::Refresh)?,
        })
    }

    /// Verify signature and expiry.
    pub fn verify(&self, token: &str) -> ApiResult<Claims> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                debug!("Token validation failed: {}", e);
                ApiError::unauthorized("Token is invalid or expired")
            })
    }

    /// Verify and require a particular token type.
    pub fn verify_as(&self, token: &str, expected: TokenType) -> ApiResult<Claims> {
        let claims = self.verify(token)?;
        if claims.token_type != expected {
            return Err(ApiError::unauthorized("Token has wrong type"));
        }
        Ok(claims)
    }
}

/// Bearer token from the Authorization header, if one was sent.
pub fn bearer_token(headers: &HeaderMap) -> ApiResult<Option<&str>> {
    let Some(value) = headers.get("Authorization") else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| ApiError::unauthorized("Invalid Authorization header format"))?;
    value
        .strip_prefix("Bearer ")
        .map(|token| Some(token.trim()))
        .ok_or_else(|| ApiError::unauthorized("Invalid Authorization header format"))
}

/// Hash a password on the blocking pool.
pub async fn hash_password(password: String, cost: u32) -> ApiResult<String> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| ApiError::internal(format!("Password hashing task failed: {e}")))?
        .map_err(|e| ApiError::internal(format!("Password hashing failed: {e}")))
}

/// Check a password against a stored hash on the blocking pool.
///
/// A malformed hash counts as a mismatch.
pub async fn verify_password(password: String, hash: String) -> ApiResult<bool> {
    let result = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| ApiError::internal(format!("Password check task failed: {e}")))?;
    match result {
        Ok(matches) => Ok(matches),
        Err(e) => {
            warn!("Stored password hash could not be checked: {}", e);
            Ok(false)
        }
    }
}

/// Authenticated, active user extracted from an access token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: User,
    pub claims: Claims,
}

impl AuthUser {
    pub fn id(&self) -> &UserId {
        &self.user.id
    }

    pub fn role(&self) -> Role {
        self.user.role
    }

    pub fn require_seller(&self) -> ApiResult<()> {
        if self.user.role.is_seller() {
            Ok(())
        } else {
            Err(ApiError::forbidden("You must be a seller to access this resource."))
        }
    }

    pub fn require_customer(&self) -> ApiResult<()> {
        if self.user.role.is_customer() {
            Ok(())
        } else {
            Err(ApiError::forbidden("You must be a customer to access this resource."))
        }
    }

    async fn from_token(token: &str, state: &AppState) -> ApiResult<Self> {
        let claims = state.jwt.verify_as(token, TokenType::Access)?;
        let user_id = claims.user_id()?;
        let user = state
            .db
            .users()
            .get(&user_id)
            .await?
            .ok_or_else(|| ApiError::unauthorized("User not found"))?;
        if !user.is_active {
            return Err(ApiError::unauthorized("User is inactive"));
        }
        Ok(Self { user, claims })
    }
}

/// Axum extractor for authenticated user.
#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)?
            .ok_or_else(|| ApiError::unauthorized("Missing Authorization header"))?;
        AuthUser::from_token(token, state).await
    }
}

/// Caller on a public endpoint: anonymous when no token is sent, rejected
/// when a token is sent but does not verify.
#[derive(Debug, Clone)]
pub struct MaybeAuthUser(pub Option<AuthUser>);

impl MaybeAuthUser {
    pub fn user_id(&self) -> Option<&UserId> {
        self.0.as_ref().map(AuthUser::id)
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for MaybeAuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match bearer_token(&parts.headers)? {
            Some(token) => Ok(MaybeAuthUser(Some(AuthUser::from_token(token, state).await?))),
            None => Ok(MaybeAuthUser(None)),
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn keys() -> JwtKeys {
        JwtKeys::new(
            b"unit-test-secret-unit-test-secret",
            Duration::from_secs(60),
            Duration::from_secs(3600),
        )
    }

    #[test]
    fn issued_tokens_verify_with_their_type() {
        let keys = keys();
        let user = UserId::new();
        let token = keys.issue(&user, Role::Seller, TokenType::Refresh).unwrap();

        let claims = keys.verify_as(&token, TokenType::Refresh).unwrap();
        assert_eq!(claims.user_id().unwrap(), user);
        assert_eq!(claims.role, Role::Seller);
        assert!(claims.exp - claims.iat == 3600);

        assert!(keys.verify_as(&token, TokenType::Access).is_err());
    }

    #[test]
    fn rejects_tokens_signed_with_another_secret() {
        let other = JwtKeys::new(b"another-secret", Duration::from_secs(60), Duration::from_secs(60));
        let token = other.issue(&UserId::new(), Role::Customer, TokenType::Access).unwrap();
        assert!(keys().verify(&token).is_err());
        assert!(keys().verify("garbage").is_err());
    }

    #[test]
    fn rejects_expired_tokens() {
        let keys = keys();
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: UserId::new().to_string(),
            role: Role::Customer,
            token_type: TokenType::Access,
            jti: "old".into(),
            iat: now - 120,
            exp: now - 60,
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &keys.encoding).unwrap();
        assert!(keys.verify(&token).is_err());
    }

    #[test]
    fn each_token_gets_a_unique_jti() {
        let keys = keys();
        let user = UserId::new();
        let a = keys.verify(&keys.issue(&user, Role::Customer, TokenType::Access).unwrap()).unwrap();
        let b = keys.verify(&keys.issue(&user, Role::Customer, TokenType::Access).unwrap()).unwrap();
        assert_ne!(a.jti, b.jti);
    }

    #[test]
    fn bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).unwrap().is_none());

        headers.insert("Authorization", HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer_token(&headers).unwrap(), Some("abc"));

        headers.insert("Authorization", HeaderValue::from_static("Basic abc"));
        assert!(bearer_token(&headers).is_err());
    }

    #[tokio::test]
    async fn password_hash_round_trip() {
        let hash = hash_password("Tr1cky-Sauce".into(), 4).await.unwrap();
        assert!(verify_password("Tr1cky-Sauce".into(), hash.clone()).await.unwrap());
        assert!(!verify_password("wrong".into(), hash).await.unwrap());
        assert!(!verify_password("x".into(), "not-a-hash".into()).await.unwrap());
    }
}
