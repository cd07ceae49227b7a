//! Resize uploaded recipe images.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ColorType, DynamicImage, GenericImageView};

use recipe_queue::ProcessRecipeImageJob;
use recipe_storage::StorageError;

use crate::context::JobContext;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;

/// Largest width a stored recipe image keeps.
pub const MAX_WIDTH: u32 = 800;
/// Largest height a stored recipe image keeps.
pub const MAX_HEIGHT: u32 = 600;
pub const JPEG_QUALITY: u8 = 85;

/// Decode any supported format and re-encode it as an RGB JPEG that fits
/// in `MAX_WIDTH` x `MAX_HEIGHT`, keeping the aspect ratio. Smaller images
/// keep their size.
pub fn shrink_to_fit(data: &[u8]) -> WorkerResult<(Vec<u8>, u32, u32)> {
    let decoded = image::load_from_memory(data)?;
    let mut rgb = DynamicImage::ImageRgb8(decoded.to_rgb8());
    if rgb.width() > MAX_WIDTH || rgb.height() > MAX_HEIGHT {
        rgb = rgb.resize(MAX_WIDTH, MAX_HEIGHT, FilterType::Lanczos3);
    }
    let rgb = rgb.to_rgb8();
    let (width, height) = rgb.dimensions();

    let mut out = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY).encode(
        rgb.as_raw(),
        width,
        height,
        ColorType::Rgb8,
    )?;
    Ok((out.into_inner(), width, height))
}

/// Shrink the stored file of one recipe image in place.
///
/// A deleted image row or a missing file means the recipe changed after the
/// upload; the job logs it and completes.
pub async fn process_recipe_image(
    ctx: &JobContext,
    job: &ProcessRecipeImageJob,
    logger: &JobLogger,
) -> WorkerResult<()> {
    logger.log_start(&format!("image {} of recipe {}", job.image_id, job.recipe_id));

    let Some(image) = ctx.db.images().get(job.image_id).await? else {
        logger.log_warning(&format!("image {} no longer exists", job.image_id));
        return Ok(());
    };

    let original = match ctx.storage.download_bytes(&image.image).await {
        Ok(bytes) => bytes,
        Err(StorageError::NotFound(_)) => {
            logger.log_warning(&format!("file {} is missing", image.image));
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let original_len = original.len();
    let (resized, width, height) = tokio::task::spawn_blocking(move || shrink_to_fit(&original))
        .await
        .map_err(|e| WorkerError::processing_failed(format!("resize task: {e}")))??;
    ctx.storage.upload_bytes(&resized, &image.image).await?;

    logger.log_completion(&format!(
        "{} now {}x{} ({} -> {} bytes)",
        image.image,
        width,
        height,
        original_len,
        resized.len()
    ));
    Ok(())
}
