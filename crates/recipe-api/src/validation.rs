//! Request validation helpers.

use validator::{Validate, ValidationError};

use crate::error::{field_errors, ApiError, ApiResult, FieldErrors};

/// Accumulates field errors from derive-based and hand-written checks so a
/// client sees every problem in one response.
#[derive(Debug, Default)]
pub struct Problems {
    errors: FieldErrors,
}

impl Problems {
    /// Start from the declarative rules on `value`.
    pub fn of<T: Validate>(value: &T) -> Self {
        match value.validate() {
            Ok(()) => Self::default(),
            Err(errs) => Self {
                errors: field_errors(&errs),
            },
        }
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.errors
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    /// Record the outcome of a `validate_*` helper.
    pub fn check(&mut self, field: &str, result: Result<(), ValidationError>) {
        if let Err(e) = result {
            let message = e
                .message
                .map(|m| m.to_string())
                .unwrap_or_else(|| format!("Invalid value ({}).", e.code));
            self.add(field, message);
        }
    }

    pub fn has(&self, field: &str) -> bool {
        self.errors.contains_key(field)
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_result(self) -> ApiResult<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ApiError::validation(self.errors))
        }
    }
}

/// Non-blank after trimming, at most `max` characters.
pub fn check_text(problems: &mut Problems, field: &str, value: &str, max: usize) {
    if value.trim().is_empty() {
        problems.add(field, "This field may not be blank.");
    } else if value.chars().count() > max {
        problems.add(
            field,
            format!("Ensure this field has no more than {max} characters."),
        );
    }
}

/// Optional text of at most `max` characters.
pub fn check_max_len(problems: &mut Problems, field: &str, value: Option<&str>, max: usize) {
    if let Some(value) = value {
        if value.chars().count() > max {
            problems.add(
                field,
                format!("Ensure this field has no more than {max} characters."),
            );
        }
    }
}
