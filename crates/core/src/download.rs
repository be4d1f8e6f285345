//! Bulk-download constants, request validation and failure details.
//!
//! Provides the image reference snapshot type stored on every ledger row,
//! intake validation, object-key derivation and the structured
//! `error_detail` payload written when a request fails.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::RequestId;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Number of images fetched concurrently while building an archive.
pub const ARCHIVE_GROUP_SIZE: usize = 5;

/// Top-level folder every archive entry is placed under.
pub const ARCHIVE_FOLDER: &str = "images";

/// Content type of published archives.
pub const ARCHIVE_CONTENT_TYPE: &str = "application/zip";

/// Lifetime of a published download link, in days.
pub const DOWNLOAD_URL_TTL_DAYS: u64 = 7;

/// Upper bound on images in a single request.
pub const MAX_IMAGES_PER_REQUEST: usize = 500;

/// Batches up to this size are processed inline by the intake handler.
pub const DEFAULT_SYNC_MAX_IMAGES: usize = 10;

/// Object-key prefix for published archives.
pub const ARCHIVE_KEY_PREFIX: &str = "downloads";

// ---------------------------------------------------------------------------
// Image references
// ---------------------------------------------------------------------------

/// One image captured at request time.
///
/// The snapshot is immutable once the ledger row exists, so the pipeline
/// never depends on upstream gallery data changing mid-run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRef {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate that an owner id was supplied.
pub fn validate_user_id(user_id: &str) -> Result<(), CoreError> {
    if user_id.trim().is_empty() {
        return Err(CoreError::Validation("userId is required".to_string()));
    }
    Ok(())
}

/// Validate that an image URL is non-empty and uses http(s).
pub fn validate_image_url(url: &str) -> Result<(), CoreError> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(CoreError::Validation(
            "Image URL must not be empty".to_string(),
        ));
    }
    if !trimmed.starts_with("http://") && !trimmed.starts_with("https://") {
        return Err(CoreError::Validation(format!(
            "Image URL must start with http:// or https://, got: '{trimmed}'"
        )));
    }
    Ok(())
}

/// Validate the full image list of an intake request.
///
/// The list must be non-empty, at most [`MAX_IMAGES_PER_REQUEST`] long, and
/// every entry needs an id and a valid URL.
pub fn validate_image_refs(images: &[ImageRef]) -> Result<(), CoreError> {
    if images.is_empty() {
        return Err(CoreError::Validation(
            "At least one image is required".to_string(),
        ));
    }
    if images.len() > MAX_IMAGES_PER_REQUEST {
        return Err(CoreError::Validation(format!(
            "Too many images: {} (max {MAX_IMAGES_PER_REQUEST})",
            images.len()
        )));
    }
    for image in images {
        if image.id.trim().is_empty() {
            return Err(CoreError::Validation("Image id must not be empty".to_string()));
        }
        validate_image_url(&image.url)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Object keys
// ---------------------------------------------------------------------------

/// Deterministic storage key for a request's archive.
///
/// Re-processing the same request overwrites the same object. The user id
/// is reduced to a path-safe segment.
pub fn archive_object_key(user_id: &str, request_id: RequestId) -> String {
    let owner: String = user_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{ARCHIVE_KEY_PREFIX}/{owner}/{request_id}.zip")
}

// ---------------------------------------------------------------------------
// Failure details
// ---------------------------------------------------------------------------

/// Which stage of the pipeline caused a request to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No image could be retrieved. Check the source URLs.
    Fetch,
    /// The archive could not be serialized.
    Archive,
    /// The archive was built but could not be stored. Retry later.
    Storage,
    /// Anything else.
    Internal,
}

/// An image that did not make it into the archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedImage {
    pub image_id: String,
    pub url: String,
    pub cause: String,
}

/// Structured payload stored in `download_requests.error_detail`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureDetail {
    pub kind: FailureKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_images: Vec<FailedImage>,
}

impl FailureDetail {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            failed_images: Vec::new(),
        }
    }

    /// No image of a `total`-image batch could be downloaded.
    pub fn nothing_fetched(total: usize, failed_images: Vec<FailedImage>) -> Self {
        Self {
            kind: FailureKind::Fetch,
            message: format!(
                "No images could be retrieved ({} of {total} failed)",
                failed_images.len()
            ),
            failed_images,
        }
    }
}
