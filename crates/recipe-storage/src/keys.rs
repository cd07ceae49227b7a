//! Object key layout under the media root.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Directory for uploaded recipe images.
pub const RECIPE_IMAGES_PREFIX: &str = "recipes/images";

/// Directory for user data exports.
pub const EXPORTS_PREFIX: &str = "exports";

/// File name prefix shared by all user data exports.
pub const EXPORT_FILE_PREFIX: &str = "user_data_export_";

/// Fresh key for an uploaded recipe image with the given extension.
pub fn recipe_image_key(extension: &str) -> String {
    format!(
        "{}/{}.{}",
        RECIPE_IMAGES_PREFIX,
        Uuid::new_v4(),
        extension.to_ascii_lowercase()
    )
}

/// Key for the user data export generated at `at`.
pub fn export_key(at: DateTime<Utc>) -> String {
    format!(
        "{}/{}{}.csv",
        EXPORTS_PREFIX,
        EXPORT_FILE_PREFIX,
        at.format("%Y%m%d_%H%M%S")
    )
}
