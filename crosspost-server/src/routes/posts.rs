use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use libcrosspost::service::deletion::PlatformDeletion;
use libcrosspost::service::editing::EditPostRequest;
use libcrosspost::service::posting::CreatePostRequest;
use libcrosspost::{PlatformKind, Post};
use serde::{Deserialize, Serialize};
use tracing::error;

use super::parse_platform;
use crate::context::RequestContext;
use crate::error::ApiErr;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreatePostBody {
    content: Option<String>,
    image_url: Option<String>,
    image_urls: Option<Vec<String>>,
    link: Option<String>,
    platforms: Vec<String>,
    scheduled_at: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdatePostBody {
    content: Option<String>,
    image_url: Option<String>,
    image_urls: Option<Vec<String>>,
    link: Option<String>,
    scheduled_at: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UpdatePostResponse {
    success: bool,
    post: Post,
}

#[derive(Debug, Serialize)]
pub struct DeletePostResponse {
    success: bool,
    message: &'static str,
    id: String,
    post: Post,
    results: Vec<PlatformDeletion>,
}

/// Accepts RFC 3339, or a bare `YYYY-MM-DDTHH:MM[:SS]` taken as UTC.
/// An empty string means "not scheduled".
fn parse_scheduled_at(raw: Option<&str>) -> Result<Option<DateTime<Utc>>, ApiErr> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };

    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(at.with_timezone(&Utc)));
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| Some(naive.and_utc()))
        .ok_or_else(|| ApiErr::bad_request(format!("Invalid scheduledAt: {}", raw)))
}

/// POST /posts - create, then publish in the background or schedule
pub async fn create(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(body): Json<CreatePostBody>,
) -> Result<Json<Post>, ApiErr> {
    let tenant_id = ctx.require_tenant()?.to_string();
    let user_id = ctx.require_user()?.to_string();

    let platforms = body
        .platforms
        .iter()
        .map(|p| parse_platform(p))
        .collect::<Result<Vec<PlatformKind>, _>>()?;

    let post = state
        .service
        .posting()
        .create_and_publish(CreatePostRequest {
            tenant_id,
            user_id,
            content: body.content,
            image_url: body.image_url,
            image_urls: body.image_urls.unwrap_or_default(),
            link: body.link,
            platforms,
            scheduled_at: parse_scheduled_at(body.scheduled_at.as_deref())?,
        })
        .await?;

    Ok(Json(post))
}

/// GET /posts - newest first; empty on missing tenant or store failure
pub async fn list(State(state): State<AppState>, ctx: RequestContext) -> Json<Vec<Post>> {
    let Some(tenant_id) = ctx.tenant_id else {
        return Json(Vec::new());
    };

    match state.service.list_posts(&tenant_id).await {
        Ok(posts) => Json(posts),
        Err(e) => {
            error!(tenant_id = %tenant_id, error = %e, "Failed to list posts");
            Json(Vec::new())
        }
    }
}

/// PUT /posts/{id}
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ctx: RequestContext,
    Json(body): Json<UpdatePostBody>,
) -> Result<Json<UpdatePostResponse>, ApiErr> {
    let tenant_id = ctx.require_tenant()?;

    let request = EditPostRequest {
        content: body.content,
        image_url: body.image_url,
        image_urls: body.image_urls,
        link: body.link,
        scheduled_at: parse_scheduled_at(body.scheduled_at.as_deref())?,
    };
    let post = state.service.editing().edit_post(tenant_id, &id, request).await?;

    Ok(Json(UpdatePostResponse {
        success: true,
        post,
    }))
}

/// DELETE /posts/{id} - remove from every platform, then locally
pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ctx: RequestContext,
) -> Result<Json<DeletePostResponse>, ApiErr> {
    let tenant_id = ctx.require_tenant()?;
    let report = state.service.deletion().delete_post(tenant_id, &id).await?;

    let fully_deleted = report.fully_deleted();
    Ok(Json(DeletePostResponse {
        success: fully_deleted,
        message: if fully_deleted {
            "Post deleted successfully"
        } else {
            "Post could not be removed from every platform"
        },
        id,
        post: report.post,
        results: report.results,
    }))
}
