//! Edit workflow
//!
//! Content changes are saved and answered immediately. Platforms that
//! already carry the post get it replaced in the background: the old
//! copy is removed, the new one created, and the stored native id swapped.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::events::Event;
use super::posting::PostingService;
use super::tasks::Task;
use super::ServiceContext;
use crate::error::{CrosspostError, Result};
use crate::media::normalize_image_url;
use crate::types::{PlatformKind, PlatformResponse, Post, PostStatus};

/// Fields to change. `None` keeps the stored value; an empty string clears
/// an optional text field.
#[derive(Debug, Clone, Default)]
pub struct EditPostRequest {
    pub content: Option<String>,
    pub image_url: Option<String>,
    pub image_urls: Option<Vec<String>>,
    pub link: Option<String>,
    /// Only honoured while the post is still scheduled
    pub scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct EditService {
    ctx: Arc<ServiceContext>,
    posting: PostingService,
}

impl EditService {
    pub(crate) fn new(ctx: Arc<ServiceContext>, posting: PostingService) -> Self {
        Self { ctx, posting }
    }

    /// Apply an edit and queue the repost.
    ///
    /// A scheduled post stays scheduled with its fields updated; anything
    /// else moves to `edited`.
    ///
    /// # Errors
    ///
    /// - `NotFound` for unknown or deleted posts
    /// - `InvalidInput` if the edit leaves the post empty
    /// - `Conflict` if the post changed since it was loaded
    pub async fn edit_post(&self, tenant_id: &str, post_id: &str, request: EditPostRequest) -> Result<Post> {
        let mut post = match self.ctx.db.get_post(tenant_id, post_id).await? {
            Some(post) if !post.is_deleted => post,
            _ => return Err(CrosspostError::NotFound(format!("Post {} not found", post_id))),
        };

        self.apply(&mut post, request)?;
        post.edited_at = Some(Utc::now().timestamp());
        let scheduled = post.status == PostStatus::Scheduled;
        if !scheduled {
            post.status = PostStatus::Edited;
        }

        if !self.ctx.db.save_post(&mut post).await? {
            return Err(CrosspostError::Conflict(
                "Post was modified by another request; reload and try again".to_string(),
            ));
        }

        info!(post_id, tenant_id, status = %post.status, "Post edited");

        let published_somewhere = post
            .platforms
            .iter()
            .any(|p| post.platform_responses.native_id(*p).is_some());
        if !scheduled && published_somewhere {
            self.posting.enqueue(Task::Repost {
                post_id: post.id.clone(),
            });
        }
        Ok(post)
    }

    fn apply(&self, post: &mut Post, request: EditPostRequest) -> Result<()> {
        let backend = &self.ctx.settings.backend_url;

        if let Some(content) = request.content {
            post.content = Some(content).filter(|c| !c.trim().is_empty());
        }
        if let Some(image_url) = request.image_url {
            post.image_url = Some(image_url)
                .filter(|u| !u.trim().is_empty())
                .map(|u| normalize_image_url(&u, backend));
        }
        if let Some(image_urls) = request.image_urls {
            if image_urls.len() > self.ctx.settings.max_images {
                return Err(CrosspostError::InvalidInput(format!(
                    "At most {} images per post ({} given)",
                    self.ctx.settings.max_images,
                    image_urls.len()
                )));
            }
            post.image_urls = image_urls
                .iter()
                .filter(|u| !u.trim().is_empty())
                .map(|u| normalize_image_url(u, backend))
                .collect();
        }
        if let Some(link) = request.link {
            post.link = Some(link).filter(|l| !l.trim().is_empty());
        }
        if let Some(at) = request.scheduled_at {
            if post.status == PostStatus::Scheduled {
                post.scheduled_at = Some(at.timestamp());
            }
        }

        if post.content.is_none() && post.link.is_none() && post.content_payload().images().is_empty() {
            return Err(CrosspostError::InvalidInput(
                "Post must have content, an image or a link".to_string(),
            ));
        }
        Ok(())
    }

    /// Background step for [`Task::Repost`].
    ///
    /// For every platform with a recorded native id: remove the old copy,
    /// create the edited one, replace the entry. Platforms whose adapter
    /// cannot delete keep their previous version and entry. The post is
    /// saved once at the end, only if an entry changed.
    pub async fn repost(&self, post_id: &str) -> Result<()> {
        let Some(mut post) = self.ctx.db.get_post_by_id(post_id).await? else {
            warn!(post_id, "Repost task for unknown post");
            return Ok(());
        };
        if post.is_deleted || post.status == PostStatus::Scheduled {
            debug!(post_id, status = %post.status, "Post not eligible for repost, skipping");
            return Ok(());
        }

        let targets: Vec<(PlatformKind, String)> = post
            .platforms
            .iter()
            .filter_map(|p| {
                post.platform_responses
                    .native_id(*p)
                    .map(|id| (*p, id.to_string()))
            })
            .collect();
        if targets.is_empty() {
            return Ok(());
        }

        let platforms: Vec<PlatformKind> = targets.iter().map(|(p, _)| *p).collect();
        let accounts = self
            .ctx
            .accounts
            .find_active(&post.tenant_id, &platforms)
            .await?;
        let content = post.content_payload();
        let mut touched = Vec::new();

        for (platform, old_id) in targets {
            let Some(account) = accounts.iter().find(|a| a.platform == platform) else {
                warn!(post_id, %platform, "No connected account, previous version left in place");
                continue;
            };

            let adapter = match self.ctx.registry.adapter_for(account, self.ctx.accounts.cipher()) {
                Ok(adapter) => adapter,
                Err(e) => {
                    warn!(post_id, %platform, error = %e, "Could not build adapter for repost");
                    continue;
                }
            };
            if !adapter.supports_delete() {
                warn!(post_id, %platform, "Platform cannot remove posts, previous version left in place");
                continue;
            }

            let removed = adapter.delete_post(&old_id).await;
            let response = if removed.success {
                self.posting.deliver(account, &content).await.to_response()
            } else {
                PlatformResponse {
                    success: false,
                    native_id: Some(old_id.clone()),
                    error: Some(format!(
                        "Could not remove previous version: {}",
                        removed.error.unwrap_or_default()
                    )),
                }
            };

            info!(
                post_id,
                %platform,
                old_id = %old_id,
                new_id = ?response.native_id,
                success = response.success,
                "Platform copy replaced"
            );
            post.record_response(platform, response);
            touched.push(platform);
        }

        if touched.is_empty() {
            return Ok(());
        }

        self.ctx.save_step(&mut post, &touched).await?;
        self.ctx.events.emit(Event::PostEdited {
            post_id: post.id.clone(),
            reposted: touched,
        });
        Ok(())
    }
}
