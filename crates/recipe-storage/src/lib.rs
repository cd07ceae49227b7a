//! Local-disk media storage.
//!
//! This crate provides:
//! - Image and export file writes under a media root
//! - Key validation (no traversal outside the root)
//! - Listing with modification times for retention cleanup
//! - Public URL construction for stored media

pub mod client;
pub mod error;
pub mod keys;

pub use client::{MediaConfig, MediaStorage, ObjectInfo};
pub use error::{StorageError, StorageResult};
pub use keys::{export_key, recipe_image_key, EXPORTS_PREFIX, EXPORT_FILE_PREFIX, RECIPE_IMAGES_PREFIX};
