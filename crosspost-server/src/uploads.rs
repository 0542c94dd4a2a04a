//! Image upload storage
//!
//! Uploaded images land in `{uploads_dir}/social-posts/` under generated
//! names and are served back from `/uploads/social-posts/`, so platforms
//! can fetch them by URL.

use libcrosspost::types::ImageMimeType;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::error::ApiErr;

pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;
pub const MAX_BATCH_IMAGES: usize = 10;
const PUBLIC_PREFIX: &str = "/uploads/social-posts";

#[derive(Debug, Clone, Serialize)]
pub struct StoredImage {
    pub url: String,
    pub filename: String,
}

#[derive(Debug, Clone)]
pub struct UploadStore {
    dir: PathBuf,
    backend_url: String,
}

impl UploadStore {
    pub fn new(uploads_dir: PathBuf, backend_url: String) -> Self {
        Self {
            dir: uploads_dir.join("social-posts"),
            backend_url: backend_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Validate and write one image, returning its public URL
    pub async fn store(
        &self,
        bytes: &[u8],
        content_type: Option<&str>,
        file_name: Option<&str>,
    ) -> Result<StoredImage, ApiErr> {
        let mime = content_type
            .and_then(ImageMimeType::from_mime_str)
            .or_else(|| file_name.and_then(ImageMimeType::from_file_name))
            .ok_or_else(|| ApiErr::bad_request("Only image files are allowed"))?;
        if bytes.is_empty() {
            return Err(ApiErr::bad_request("Image file is empty"));
        }
        if bytes.len() > MAX_IMAGE_BYTES {
            return Err(ApiErr::bad_request(format!(
                "Image exceeds {} MB",
                MAX_IMAGE_BYTES / (1024 * 1024)
            )));
        }

        let filename = format!(
            "{}-{}.{}",
            chrono::Utc::now().timestamp_millis(),
            uuid::Uuid::new_v4().simple(),
            mime.extension()
        );

        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            error!(dir = %self.dir.display(), error = %e, "Cannot create upload directory");
            ApiErr::internal("Failed to store image")
        })?;
        tokio::fs::write(self.dir.join(&filename), bytes)
            .await
            .map_err(|e| {
                error!(filename = %filename, error = %e, "Cannot write upload");
                ApiErr::internal("Failed to store image")
            })?;

        let url = format!("{}{}/{}", self.backend_url, PUBLIC_PREFIX, filename);
        info!(%url, size = bytes.len(), %mime, "Image uploaded");
        Ok(StoredImage { url, filename })
    }
}
