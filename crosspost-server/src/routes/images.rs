use axum::{
    extract::{multipart::Field, Multipart, State},
    Json,
};
use serde::Serialize;

use crate::error::ApiErr;
use crate::uploads::{StoredImage, MAX_BATCH_IMAGES};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct BatchUploadResponse {
    images: Vec<StoredImage>,
    count: usize,
}

async fn store_field(state: &AppState, field: Field<'_>) -> Result<StoredImage, ApiErr> {
    let content_type = field.content_type().map(str::to_string);
    let file_name = field.file_name().map(str::to_string);
    let bytes = field
        .bytes()
        .await
        .map_err(|e| ApiErr::bad_request(format!("Unreadable upload: {}", e)))?;

    state
        .uploads
        .store(&bytes, content_type.as_deref(), file_name.as_deref())
        .await
}

fn malformed(e: axum::extract::multipart::MultipartError) -> ApiErr {
    ApiErr::bad_request(format!("Malformed multipart body: {}", e))
}

/// POST /images - multipart field `image`
pub async fn upload_one(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<StoredImage>, ApiErr> {
    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        if field.name() == Some("image") {
            return Ok(Json(store_field(&state, field).await?));
        }
    }
    Err(ApiErr::bad_request("No image file provided"))
}

/// POST /images/batch - multipart field `images`, repeated
pub async fn upload_batch(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<BatchUploadResponse>, ApiErr> {
    let mut images = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        if field.name() != Some("images") {
            continue;
        }
        if images.len() == MAX_BATCH_IMAGES {
            return Err(ApiErr::bad_request(format!(
                "At most {} images per upload",
                MAX_BATCH_IMAGES
            )));
        }
        images.push(store_field(&state, field).await?);
    }

    if images.is_empty() {
        return Err(ApiErr::bad_request("No image files provided"));
    }
    Ok(Json(BatchUploadResponse {
        count: images.len(),
        images,
    }))
}
