//! Recipe image upload.

use std::io::Cursor;

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use tracing::{info, warn};

use recipe_db::NewImage;
use recipe_models::RecipeImage;
use recipe_queue::{ProcessRecipeImageJob, QueueJob};
use recipe_storage::recipe_image_key;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::handlers::recipes::parse_recipe_id;
use crate::metrics;
use crate::state::AppState;
use crate::validation::{check_max_len, Problems};

pub const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];
const CAPTION_MAX: usize = 200;

#[derive(Debug, Default)]
struct UploadForm {
    recipe_id: Option<String>,
    file_name: Option<String>,
    data: Option<Vec<u8>>,
    caption: Option<String>,
    is_primary: Option<String>,
    order: Option<String>,
}

impl UploadForm {
    async fn read(mut multipart: Multipart) -> ApiResult<Self> {
        let mut form = Self::default();
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "recipe_id" => form.recipe_id = Some(field.text().await?),
                "image" => {
                    form.file_name = field.file_name().map(str::to_string);
                    form.data = Some(field.bytes().await?.to_vec());
                }
                "caption" => form.caption = Some(field.text().await?),
                "is_primary" => form.is_primary = Some(field.text().await?),
                "order" => form.order = Some(field.text().await?),
                _ => {}
            }
        }
        Ok(form)
    }
}

/// Lowercased extension if it is one we accept.
fn allowed_extension(file_name: &str) -> Option<String> {
    let (_, ext) = file_name.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    ALLOWED_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "on" | "yes" => Some(true),
        "false" | "0" | "off" | "no" | "" => Some(false),
        _ => None,
    }
}

/// True when the bytes carry a readable image header.
fn is_decodable(data: &[u8]) -> bool {
    image::io::Reader::new(Cursor::new(data))
        .with_guessed_format()
        .ok()
        .and_then(|reader| reader.into_dimensions().ok())
        .is_some_and(|(w, h)| w > 0 && h > 0)
}

/// Attach an image to a recipe owned by the calling seller.
///
/// The file is stored as uploaded; resizing happens in the worker.
pub async fn upload_image(
    State(state): State<AppState>,
    auth: AuthUser,
    multipart: Multipart,
) -> ApiResult<(StatusCode, Json<RecipeImage>)> {
    auth.require_seller()?;
    let form = UploadForm::read(multipart).await?;

    let raw_id = form
        .recipe_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::bad_request("recipe_id is required"))?;
    let data = form
        .data
        .filter(|d| !d.is_empty())
        .ok_or_else(|| ApiError::bad_request("image file is required"))?;

    let mut problems = Problems::default();
    let max_mb = state.config.max_image_size / (1024 * 1024);
    if data.len() > state.config.max_image_size {
        problems.add("image", format!("Image size cannot exceed {max_mb}MB"));
    }
    let extension = form.file_name.as_deref().and_then(allowed_extension);
    if extension.is_none() {
        problems.add(
            "image",
            format!("Allowed image formats: {}", ALLOWED_EXTENSIONS.join(", ")),
        );
    }
    if !problems.has("image") && !is_decodable(&data) {
        problems.add("image", "Invalid image file");
    }
    check_max_len(&mut problems, "caption", form.caption.as_deref(), CAPTION_MAX);
    let is_primary = match form.is_primary.as_deref().map(parse_flag) {
        None => false,
        Some(Some(flag)) => flag,
        Some(None) => {
            problems.add("is_primary", "Must be a valid boolean.");
            false
        }
    };
    let order = match form.order.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        None => 0,
        Some(raw) => raw.parse::<i64>().unwrap_or_else(|_| {
            problems.add("order", "A valid integer is required.");
            0
        }),
    };
    problems.into_result()?;

    let recipe_id = parse_recipe_id(raw_id)
        .map_err(|_| ApiError::not_found("Recipe not found or not owned by user"))?;
    if state
        .db
        .recipes()
        .get_owned(&recipe_id, auth.id())
        .await?
        .is_none()
    {
        return Err(ApiError::not_found("Recipe not found or not owned by user"));
    }

    let key = recipe_image_key(extension.as_deref().unwrap_or("jpg"));
    state.storage.upload_bytes(&data, &key).await?;

    let image = match state
        .db
        .images()
        .create(&NewImage {
            recipe_id,
            image: key.clone(),
            caption: form.caption.filter(|c| !c.trim().is_empty()),
            is_primary,
            order,
        })
        .await
    {
        Ok(image) => image,
        Err(e) => {
            if let Err(cleanup) = state.storage.delete_object(&key).await {
                warn!("Failed to remove orphaned upload {}: {}", key, cleanup);
            }
            return Err(e.into());
        }
    };

    metrics::record_image_uploaded(data.len());
    info!(recipe_id = %recipe_id, image_id = %image.id, bytes = data.len(), "Recipe image uploaded");

    let job = QueueJob::ProcessRecipeImage(ProcessRecipeImageJob::new(image.id, recipe_id));
    if let Err(e) = state.queue.enqueue(job).await {
        warn!(image_id = %image.id, "Failed to enqueue image processing: {}", e);
    }

    let image_url = state.storage.url_for(&image.image);
    Ok((
        StatusCode::CREATED,
        Json(RecipeImage {
            image_url: Some(image_url),
            ..image
        }),
    ))
}

#[cfg(test)]
mod tests {
    use image::{DynamicImage, ImageOutputFormat};

    use super::*;

    #[test]
    fn extension_check_is_case_insensitive() {
        assert_eq!(allowed_extension("Dosa.JPG").as_deref(), Some("jpg"));
        assert_eq!(allowed_extension("a.b.webp").as_deref(), Some("webp"));
        assert_eq!(allowed_extension("notes.txt"), None);
        assert_eq!(allowed_extension("noext"), None);
    }

    #[test]
    fn flags() {
        assert_eq!(parse_flag("True"), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn decodes_real_images_only() {
        let mut png = Vec::new();
        DynamicImage::new_rgb8(8, 6)
            .write_to(&mut Cursor::new(&mut png), ImageOutputFormat::Png)
            .unwrap();
        assert!(is_decodable(&png));
        assert!(!is_decodable(b"definitely not an image"));
    }
}
