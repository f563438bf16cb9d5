//! Image upload plumbing
//!
//! Files arrive as multipart parts, are staged to the temp directory
//! (see [`staging`]) and then pushed to the image host through an
//! [`ImageUploader`]. The uploader owns the staged file from that point and
//! removes it whether or not the upload succeeds.

pub mod cloudinary;
pub mod staging;

pub use cloudinary::CloudinaryUploader;
pub use staging::{stage_multipart, StagedForm};

use crate::error::AppResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::Path;

/// Result of a successful upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedImage {
    pub url: String,
    pub public_id: String,
}

/// Pushes a staged local file to the image host
#[async_trait]
pub trait ImageUploader: Send + Sync {
    /// Upload the file and delete the local copy
    ///
    /// Fails with `AppError::Upstream` if the file is missing or the host
    /// rejects it.
    async fn upload(&self, local_path: &Path) -> AppResult<UploadedImage>;
}

/// Delete a staged file, ignoring files that are already gone
pub async fn remove_local_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove staged file {:?}: {}", path, e),
    }
}
