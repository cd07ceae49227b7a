//! Field validation helpers.
//!
//! The `validate_*` functions have the signature expected by
//! `#[validate(custom(function = ...))]` so request types can reuse them.

use std::borrow::Cow;
use std::sync::LazyLock;

use chrono::{NaiveDate, Utc};
use regex_lite::Regex;
use validator::ValidationError;

/// Minimum accepted password length.
pub const MIN_PASSWORD_LENGTH: usize = 8;

static GST_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]{15}$").expect("valid GST regex"));

/// Passwords rejected regardless of length.
const COMMON_PASSWORDS: &[&str] = &[
    "password",
    "password1",
    "password123",
    "12345678",
    "123456789",
    "1234567890",
    "qwerty123",
    "qwertyuiop",
    "iloveyou",
    "letmein1",
    "welcome1",
    "admin123",
    "abc12345",
    "sunshine",
    "football",
    "baseball",
    "trustno1",
    "superman",
    "princess",
    "passw0rd",
];

fn error(code: &'static str, message: &'static str) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(Cow::Borrowed(message));
    err
}

/// GST numbers are exactly 15 alphanumeric characters.
pub fn validate_gst_number(value: &str) -> Result<(), ValidationError> {
    if value.chars().count() != 15 {
        return Err(error("gst_length", "GST number must be 15 characters long."));
    }
    if !GST_PATTERN.is_match(value) {
        return Err(error(
            "gst_charset",
            "GST number should contain only alphanumeric characters.",
        ));
    }
    Ok(())
}

/// Digits plus optional spaces, hyphens and a plus sign; 10 to 15 digits.
pub fn validate_phone_number(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Ok(());
    }
    let cleaned: String = value
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '+'))
        .collect();
    if cleaned.is_empty() || !cleaned.chars().all(|c| c.is_ascii_digit()) {
        return Err(error(
            "phone_charset",
            "Phone number should contain only digits, spaces, hyphens, or plus sign.",
        ));
    }
    if !(10..=15).contains(&cleaned.len()) {
        return Err(error(
            "phone_length",
            "Phone number should be between 10 and 15 digits.",
        ));
    }
    Ok(())
}

pub fn validate_not_future(value: &NaiveDate) -> Result<(), ValidationError> {
    if *value > Utc::now().date_naive() {
        return Err(error("future_date", "Date of birth cannot be in the future."));
    }
    Ok(())
}

/// Titles must have at least three characters once trimmed.
pub fn validate_title(value: &str) -> Result<(), ValidationError> {
    if value.trim().chars().count() < 3 {
        return Err(error("title_length", "Title must be at least 3 characters long."));
    }
    Ok(())
}

pub fn validate_business_name(value: &str) -> Result<(), ValidationError> {
    if value.trim().chars().count() < 2 {
        return Err(error(
            "business_name_length",
            "Business name must be at least 2 characters long.",
        ));
    }
    Ok(())
}

/// Collects every password policy violation.
///
/// `related` holds account attributes (username, email) the password must
/// not resemble.
pub fn password_problems(password: &str, related: &[&str]) -> Vec<String> {
    let mut problems = Vec::new();

    if password.chars().count() < MIN_PASSWORD_LENGTH {
        problems.push(format!(
            "This password is too short. It must contain at least {MIN_PASSWORD_LENGTH} characters."
        ));
    }

    if !password.is_empty() && password.chars().all(|c| c.is_ascii_digit()) {
        problems.push("This password is entirely numeric.".to_string());
    }

    let lowered = password.to_lowercase();
    if COMMON_PASSWORDS.contains(&lowered.as_str()) {
        problems.push("This password is too common.".to_string());
    }

    for attr in related {
        let attr = attr.to_lowercase();
        let local = attr.split('@').next().unwrap_or("");
        if !local.is_empty() && local.len() >= 3 && (lowered == local || lowered.contains(local)) {
            problems.push("The password is too similar to your account details.".to_string());
            break;
        }
    }

    problems
}

/// Trimmed, lower-cased tag name, or `None` when blank.
pub fn normalize_tag(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}

/// Upper-cases the first letter of each word and lower-cases the rest.
pub fn title_case(raw: &str) -> String {
    raw.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}
