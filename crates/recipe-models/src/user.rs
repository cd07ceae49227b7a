//! User accounts, roles and profiles.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::UnknownVariant;
use crate::ids::UserId;

/// Marketplace role of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Browses, rates and favorites recipes
    #[default]
    Customer,
    /// Publishes and manages recipes
    Seller,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Seller => "seller",
        }
    }

    pub fn is_seller(&self) -> bool {
        matches!(self, Role::Seller)
    }

    pub fn is_customer(&self) -> bool {
        matches!(self, Role::Customer)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Role {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" => Ok(Role::Customer),
            "seller" => Ok(Role::Seller),
            other => Err(UnknownVariant::new("role", other)),
        }
    }
}

/// A user account as stored in the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: Role,
    /// bcrypt hash, never serialized
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub is_active: bool,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub auth_provider: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl User {
    /// "First Last" when either name is set, otherwise the username.
    pub fn full_name(&self) -> String {
        display_name(
            self.first_name.as_deref(),
            self.last_name.as_deref(),
            &self.username,
        )
    }
}

/// Joins first and last name, falling back to the username when both are blank.
pub fn display_name(first_name: Option<&str>, last_name: Option<&str>, username: &str) -> String {
    let first = first_name.unwrap_or("").trim();
    let last = last_name.unwrap_or("").trim();
    let joined = format!("{first} {last}");
    let joined = joined.trim();
    if joined.is_empty() {
        username.to_string()
    } else {
        joined.to_string()
    }
}

/// Personal profile attached to every account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub user_id: UserId,
    pub bio: Option<String>,
    pub phone_number: Option<String>,
    pub address: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    /// Age in whole years as of `today`.
    pub fn age_on(&self, today: NaiveDate) -> Option<u32> {
        let dob = self.date_of_birth?;
        let mut years = today.year() - dob.year();
        if (today.month(), today.day()) < (dob.month(), dob.day()) {
            years -= 1;
        }
        u32::try_from(years).ok()
    }

    /// Bio truncated to 50 characters with an ellipsis.
    pub fn short_bio(&self) -> Option<String> {
        let bio = self.bio.as_deref()?;
        if bio.chars().count() > 50 {
            let head: String = bio.chars().take(50).collect();
            Some(format!("{head}..."))
        } else {
            Some(bio.to_string())
        }
    }
}

/// Business details kept for sellers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SellerProfile {
    pub id: Uuid,
    pub user_id: UserId,
    pub gst_number: String,
    pub business_name: String,
    pub business_description: Option<String>,
    pub business_address: Option<String>,
    pub business_phone: Option<String>,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Serialized profile section of a [`UserView`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileView {
    pub id: Uuid,
    pub bio: Option<String>,
    pub phone_number: Option<String>,
    pub address: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub age: Option<u32>,
    pub short_bio: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProfileView {
    pub fn new(profile: &UserProfile, today: NaiveDate) -> Self {
        Self {
            id: profile.id,
            bio: profile.bio.clone(),
            phone_number: profile.phone_number.clone(),
            address: profile.address.clone(),
            date_of_birth: profile.date_of_birth,
            age: profile.age_on(today),
            short_bio: profile.short_bio(),
            created_at: profile.created_at,
            updated_at: profile.updated_at,
        }
    }
}

/// Public representation of an account returned by the auth endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserView {
    pub id: UserId,
    pub username: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub full_name: String,
    pub email: String,
    pub role: Role,
    pub auth_provider: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub profile: Option<ProfileView>,
    pub seller_profile: Option<SellerProfile>,
}

impl UserView {
    pub fn new(
        user: &User,
        profile: Option<&UserProfile>,
        seller_profile: Option<SellerProfile>,
    ) -> Self {
        let today = Utc::now().date_naive();
        Self {
            id: user.id,
            username: user.username.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            full_name: user.full_name(),
            email: user.email.clone(),
            role: user.role,
            auth_provider: user.auth_provider.clone(),
            is_active: user.is_active,
            created_at: user.created_at,
            profile: profile.map(|p| ProfileView::new(p, today)),
            seller_profile,
        }
    }
}
