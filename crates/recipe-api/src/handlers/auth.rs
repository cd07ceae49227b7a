//! Account handlers: registration, login, tokens and profile.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use validator::Validate;

use recipe_db::{DbError, NewAccount, NewSellerProfile, ProfileUpdate};
use recipe_models::validation::{
    password_problems, validate_business_name, validate_gst_number, validate_not_future,
    validate_phone_number,
};
use recipe_models::{ProfileView, Role, User, UserId, UserView};
use recipe_queue::{QueueJob, SendWelcomeEmailJob};

use crate::auth::{hash_password, verify_password, AuthUser, TokenType};
use crate::error::{ApiError, ApiJson, ApiResult};
use crate::metrics;
use crate::state::AppState;
use crate::validation::{check_max_len, Problems};

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 3, max = 150, message = "Username must be between 3 and 150 characters long."))]
    pub username: String,
    #[validate(email(message = "Enter a valid email address."))]
    pub email: String,
    #[validate(length(max = 150))]
    pub first_name: Option<String>,
    #[validate(length(max = 150))]
    pub last_name: Option<String>,
    pub role: Role,
    pub password: String,
    pub confirm_password: String,
    pub gst_number: Option<String>,
    pub business_name: Option<String>,
}

#[derive(Serialize)]
pub struct RegisterResponse {
    pub message: &'static str,
    pub user_id: UserId,
    pub email: String,
}

/// Register a new customer or seller.
pub async fn register(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<RegisterResponse>)> {
    let users = state.db.users();
    let email = req.email.trim().to_lowercase();

    let mut problems = Problems::of(&req);
    if req.username.trim().chars().count() < 3 && !problems.has("username") {
        problems.add("username", "Username must be at least 3 characters long.");
    }
    for problem in password_problems(&req.password, &[req.username.as_str(), email.as_str()]) {
        problems.add("password", problem);
    }
    if req.password != req.confirm_password {
        problems.add("password", "Passwords do not match.");
    }
    if !problems.has("email") && users.email_exists(&email).await? {
        problems.add("email", "A user with this email already exists.");
    }

    let seller = if req.role.is_seller() {
        let gst = req.gst_number.as_deref().map(str::trim).unwrap_or("");
        let business = req.business_name.as_deref().map(str::trim).unwrap_or("");
        if gst.is_empty() {
            problems.add("gst_number", "GST number is required for sellers.");
        } else {
            problems.check("gst_number", validate_gst_number(gst));
            if !problems.has("gst_number") && users.gst_exists(&gst.to_uppercase()).await? {
                problems.add("gst_number", "A seller with this GST number already exists.");
            }
        }
        if business.is_empty() {
            problems.add("business_name", "Business name is required for sellers.");
        } else {
            problems.check("business_name", validate_business_name(business));
            check_max_len(&mut problems, "business_name", Some(business), 200);
        }
        Some(NewSellerProfile {
            gst_number: gst.to_uppercase(),
            business_name: business.to_string(),
        })
    } else {
        None
    };

    if !problems.is_empty() {
        warn!(email = %email, "Registration failed validation");
    }
    problems.into_result()?;

    let password_hash = hash_password(req.password, state.config.bcrypt_cost).await?;
    let account = NewAccount {
        username: req.username.trim().to_string(),
        email,
        first_name: blank_to_none(req.first_name),
        last_name: blank_to_none(req.last_name),
        role: req.role,
        password_hash,
        seller,
    };

    // Lost a race with a concurrent registration
    let user = users.create(&account).await.map_err(|e| match e {
        DbError::Conflict(field) if field == "gst_number" => {
            ApiError::field("gst_number", "A seller with this GST number already exists.")
        }
        DbError::Conflict(_) => ApiError::field("email", "A user with this email already exists."),
        other => other.into(),
    })?;

    let job = QueueJob::SendWelcomeEmail(SendWelcomeEmailJob::new(user.id));
    if let Err(e) = state.queue.enqueue(job).await {
        warn!(user_id = %user.id, "Failed to enqueue welcome email: {}", e);
    }

    info!(user_id = %user.id, role = %user.role, "User registered successfully");

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "User registered successfully. Please login to continue.",
            user_id: user.id,
            email: user.email,
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub message: &'static str,
    pub access: String,
    pub refresh: String,
    pub user: UserView,
}

/// Authenticate with email and password and return a token pair.
pub async fn login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let email = req.email.trim().to_lowercase();
    if email.is_empty() || req.password.is_empty() {
        return Err(ApiError::field("non_field_errors", "Email and password are required."));
    }

    let users = state.db.users();
    let found = users.find_by_email(&email).await?;
    let password_ok = match &found {
        Some(user) => verify_password(req.password, user.password_hash.clone()).await?,
        None => false,
    };
    let user = match found {
        Some(user) if password_ok => user,
        _ => {
            warn!(email = %email, "Login failed");
            return Err(ApiError::field("non_field_errors", "Invalid email or password."));
        }
    };

    if !user.is_active {
        return Err(ApiError::field("non_field_errors", "User account is disabled."));
    }

    let tokens = state.jwt.issue_pair(&user)?;
    users.record_login(&user.id).await?;
    metrics::record_login(user.role.as_str());
    info!(user_id = %user.id, "User logged in successfully");

    Ok(Json(LoginResponse {
        message: "Login successful.",
        access: tokens.access,
        refresh: tokens.refresh,
        user: user_view(&state, &user).await?,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh: Option<String>,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

/// Blacklist the caller's refresh token.
pub async fn logout(
    State(state): State<AppState>,
    user: AuthUser,
    ApiJson(req): ApiJson<RefreshRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let token = req
        .refresh
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("Refresh token is required."))?;

    let claims = state
        .jwt
        .verify_as(token.trim(), TokenType::Refresh)
        .map_err(|_| ApiError::bad_request("Token is invalid or expired"))?;
    if claims.user_id()? != *user.id() {
        return Err(ApiError::bad_request("Token does not belong to this user"));
    }

    state
        .db
        .tokens()
        .blacklist(&claims.jti, user.id(), claims.expires_at())
        .await?;
    info!(user_id = %user.id(), "User logged out");

    Ok(Json(MessageResponse {
        message: "Logged out successfully.",
    }))
}

#[derive(Serialize)]
pub struct AccessResponse {
    pub access: String,
}

/// Exchange a refresh token for a new access token.
pub async fn refresh(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RefreshRequest>,
) -> ApiResult<Json<AccessResponse>> {
    let token = req
        .refresh
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ApiError::field("refresh", "This field is required."))?;

    let claims = state.jwt.verify_as(token.trim(), TokenType::Refresh)?;
    if state.db.tokens().is_blacklisted(&claims.jti).await? {
        return Err(ApiError::unauthorized("Token is blacklisted"));
    }

    let user = state
        .db
        .users()
        .get(&claims.user_id()?)
        .await?
        .filter(|u| u.is_active)
        .ok_or_else(|| ApiError::unauthorized("No active account found with the given credentials"))?;

    Ok(Json(AccessResponse {
        access: state.jwt.issue(&user.id, user.role, TokenType::Access)?,
    }))
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub token: Option<String>,
}

/// Check that a token is well-formed, unexpired and not revoked.
pub async fn verify(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<VerifyRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let token = req
        .token
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ApiError::field("token", "This field is required."))?;

    let claims = state.jwt.verify(token.trim())?;
    if claims.token_type == TokenType::Refresh
        && state.db.tokens().is_blacklisted(&claims.jti).await?
    {
        return Err(ApiError::unauthorized("Token is blacklisted"));
    }

    Ok(Json(serde_json::json!({})))
}

#[derive(Serialize)]
pub struct ProfileResponse {
    pub message: &'static str,
    pub user: UserView,
}

/// Details of the authenticated user.
pub async fn profile(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<ProfileResponse>> {
    Ok(Json(ProfileResponse {
        message: "User details retrieved successfully.",
        user: user_view(&state, &user.user).await?,
    }))
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct ProfileUpdateRequest {
    #[validate(length(max = 150))]
    pub first_name: Option<String>,
    #[validate(length(max = 150))]
    pub last_name: Option<String>,
    #[validate(length(max = 1000, message = "Bio cannot exceed 1000 characters."))]
    pub bio: Option<String>,
    pub phone_number: Option<String>,
    #[validate(length(max = 500))]
    pub address: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
}

#[derive(Serialize)]
pub struct ProfileUpdateResponse {
    pub message: &'static str,
    pub profile: Option<ProfileView>,
    pub user: UserView,
}

/// Partially update the caller's names and profile.
pub async fn update_profile(
    State(state): State<AppState>,
    user: AuthUser,
    ApiJson(req): ApiJson<ProfileUpdateRequest>,
) -> ApiResult<Json<ProfileUpdateResponse>> {
    let mut problems = Problems::of(&req);
    if let Some(phone) = &req.phone_number {
        problems.check("phone_number", validate_phone_number(phone));
    }
    if let Some(dob) = &req.date_of_birth {
        problems.check("date_of_birth", validate_not_future(dob));
    }
    problems.into_result()?;

    let update = ProfileUpdate {
        first_name: req.first_name,
        last_name: req.last_name,
        bio: req.bio,
        phone_number: req.phone_number,
        address: req.address,
        date_of_birth: req.date_of_birth,
    };
    let users = state.db.users();
    users.update_profile(user.id(), &update).await?;
    info!(user_id = %user.id(), "Profile updated");

    let refreshed = users
        .get(user.id())
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    let view = user_view(&state, &refreshed).await?;

    Ok(Json(ProfileUpdateResponse {
        message: "Profile updated successfully.",
        profile: view.profile.clone(),
        user: view,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
    pub confirm_new_password: String,
}

/// Change the caller's password after checking the current one.
pub async fn change_password(
    State(state): State<AppState>,
    user: AuthUser,
    ApiJson(req): ApiJson<ChangePasswordRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let mut problems = Problems::default();
    if !verify_password(req.old_password, user.user.password_hash.clone()).await? {
        problems.add("old_password", "Old password is incorrect.");
    }
    for problem in password_problems(
        &req.new_password,
        &[user.user.username.as_str(), user.user.email.as_str()],
    ) {
        problems.add("new_password", problem);
    }
    if req.new_password != req.confirm_new_password {
        problems.add("new_password", "New passwords do not match.");
    }
    problems.into_result()?;

    let hash = hash_password(req.new_password, state.config.bcrypt_cost).await?;
    state.db.users().update_password(user.id(), &hash).await?;
    info!(user_id = %user.id(), "Password changed");

    Ok(Json(MessageResponse {
        message: "Password changed successfully.",
    }))
}

async fn user_view(state: &AppState, user: &User) -> ApiResult<UserView> {
    let users = state.db.users();
    let profile = users.get_profile(&user.id).await?;
    let seller_profile = if user.role.is_seller() {
        users.get_seller_profile(&user.id).await?
    } else {
        None
    };
    Ok(UserView::new(user, profile.as_ref(), seller_profile))
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
