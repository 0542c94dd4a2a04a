//! Posting service - create posts and fan them out to platforms
//!
//! A create request is validated, checked against the duplicate guard,
//! persisted and answered right away. Delivery happens later in
//! [`PostingService::publish_post`], run from the background task queue, or
//! from the scheduler once a scheduled post falls due.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::dedup::{fingerprint, DuplicateGuard};
use super::events::Event;
use super::tasks::{Task, TaskQueue};
use super::ServiceContext;
use crate::error::{looks_like_expired_credential, CrosspostError, Result};
use crate::media::{is_https, normalize_image_url};
use crate::platforms::PublishOutcome;
use crate::types::{Account, PlatformKind, Post, PostContent, PostStatus};

/// Request to create a post and publish or schedule it
#[derive(Debug, Clone, Default)]
pub struct CreatePostRequest {
    pub tenant_id: String,
    pub user_id: String,
    pub content: Option<String>,
    /// Legacy single-image field
    pub image_url: Option<String>,
    pub image_urls: Vec<String>,
    pub link: Option<String>,
    pub platforms: Vec<PlatformKind>,
    /// A future time schedules the post; a past or absent one publishes now
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// Where a fan-out was started from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanOutOrigin {
    /// Background step after a create request
    Immediate,
    /// Scheduler sweep
    Scheduled,
}

impl FanOutOrigin {
    /// Scheduled runs flag accounts whose credential was rejected
    fn detects_expired_credentials(self) -> bool {
        matches!(self, FanOutOrigin::Scheduled)
    }

    fn no_accounts_message(self) -> &'static str {
        match self {
            FanOutOrigin::Immediate => "No connected accounts found for the selected platforms",
            FanOutOrigin::Scheduled => "No connected accounts found at scheduled time",
        }
    }
}

/// Summary of one fan-out
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanOutReport {
    /// Platforms that had a connected account, in list order
    pub attempted: Vec<PlatformKind>,
    pub succeeded: usize,
    /// Accounts flagged expired during this run
    pub expired_accounts: Vec<String>,
}

#[derive(Clone)]
pub struct PostingService {
    ctx: Arc<ServiceContext>,
    tasks: TaskQueue,
    guard: Arc<DuplicateGuard>,
}

impl PostingService {
    pub(crate) fn new(ctx: Arc<ServiceContext>, tasks: TaskQueue) -> Self {
        let guard = Arc::new(DuplicateGuard::new(ctx.settings.duplicate_window));
        Self { ctx, tasks, guard }
    }

    /// Validate, persist and enqueue a post.
    ///
    /// Returns the persisted record without waiting for delivery. The post
    /// is `scheduled` when `scheduled_at` lies in the future, otherwise
    /// `publishing` with a publish task queued.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` for a missing tenant, user, platform list or body
    /// - `Duplicate` when the same user sent the same request moments ago
    pub async fn create_and_publish(&self, request: CreatePostRequest) -> Result<Post> {
        validate_request(&request, self.ctx.settings.max_images)?;

        let key = fingerprint(
            &request.user_id,
            &json!({
                "content": request.content,
                "platforms": request.platforms,
                "link": request.link,
                "scheduledAt": request.scheduled_at.map(|t| t.timestamp()),
                "imageUrls": request.image_urls,
                "imageUrl": request.image_url,
            }),
        );
        if !self.guard.check(&key) {
            warn!(tenant_id = %request.tenant_id, user_id = %request.user_id, "Duplicate post request rejected");
            return Err(CrosspostError::Duplicate(
                "Duplicate request detected. Please wait before submitting again.".to_string(),
            ));
        }

        let post = self.build_post(request);
        if let Err(e) = self.ctx.db.create_post(&post).await {
            self.guard.forget(&key);
            return Err(e);
        }

        info!(
            post_id = %post.id,
            tenant_id = %post.tenant_id,
            status = %post.status,
            platforms = ?post.platforms,
            "Post created"
        );

        if post.status == PostStatus::Publishing {
            self.enqueue(Task::Publish {
                post_id: post.id.clone(),
            });
        }
        Ok(post)
    }

    fn build_post(&self, request: CreatePostRequest) -> Post {
        let backend = &self.ctx.settings.backend_url;
        let mut platforms = Vec::with_capacity(request.platforms.len());
        for platform in request.platforms {
            if !platforms.contains(&platform) {
                platforms.push(platform);
            }
        }

        let mut post = Post::new(request.tenant_id, platforms);
        post.created_by = Some(request.user_id);
        post.content = request.content.filter(|c| !c.trim().is_empty());
        post.image_url = request
            .image_url
            .filter(|u| !u.trim().is_empty())
            .map(|u| normalize_image_url(&u, backend));
        post.image_urls = request
            .image_urls
            .iter()
            .filter(|u| !u.trim().is_empty())
            .map(|u| normalize_image_url(u, backend))
            .collect();
        post.link = request.link.filter(|l| !l.trim().is_empty());

        if let Some(at) = request.scheduled_at {
            post.scheduled_at = Some(at.timestamp());
            if at > Utc::now() {
                post.status = PostStatus::Scheduled;
            }
        }
        post
    }

    pub(crate) fn enqueue(&self, task: Task) -> bool {
        self.tasks.submit(task)
    }

    /// Background step for [`Task::Publish`].
    ///
    /// Never propagates delivery failures: an unexpected error is recorded
    /// on the post as `failed` with an error log.
    pub async fn publish_post(&self, post_id: &str) -> Result<()> {
        let Some(mut post) = self.ctx.db.get_post_by_id(post_id).await? else {
            warn!(post_id, "Publish task for unknown post");
            return Ok(());
        };

        let runnable = match post.status {
            PostStatus::Publishing => true,
            // Edited before its first delivery ran
            PostStatus::Edited => post.platform_responses.is_empty(),
            _ => false,
        };
        if post.is_deleted || !runnable {
            debug!(post_id, status = %post.status, "Post no longer awaiting publish, skipping");
            return Ok(());
        }

        if let Err(e) = self.fan_out(&mut post, FanOutOrigin::Immediate).await {
            error!(post_id, error = %e, "Background publish failed");
            post.status = PostStatus::Failed;
            post.error_log = Some(e.to_string());
        }

        let touched = post.platforms.clone();
        self.ctx.save_step(&mut post, &touched).await
    }

    /// Deliver `post` to every platform that has a connected account.
    ///
    /// Platforms are tried in list order, each isolated from the others.
    /// Platforms without a connected account are left out of the response
    /// map entirely. Updates status, response map, error log and publish
    /// time on `post` but does not save it.
    pub(crate) async fn fan_out(&self, post: &mut Post, origin: FanOutOrigin) -> Result<FanOutReport> {
        let accounts = self
            .ctx
            .accounts
            .find_active(&post.tenant_id, &post.platforms)
            .await?;

        let mut report = FanOutReport::default();

        if accounts.is_empty() {
            warn!(post_id = %post.id, tenant_id = %post.tenant_id, "No connected accounts for post");
            post.status = PostStatus::Failed;
            post.error_log = Some(origin.no_accounts_message().to_string());
            self.ctx.events.emit(Event::PublishCompleted {
                post_id: post.id.clone(),
                status: post.status,
            });
            return Ok(report);
        }

        self.ctx.events.emit(Event::PublishStarted {
            post_id: post.id.clone(),
            platforms: post.platforms.clone(),
        });

        let content = post.content_payload();
        let mut failures = Vec::new();

        for platform in post.platforms.clone() {
            let Some(account) = accounts.iter().find(|a| a.platform == platform) else {
                debug!(post_id = %post.id, %platform, "No connected account, platform skipped");
                continue;
            };
            report.attempted.push(platform);

            // Already delivered by an earlier, interrupted run
            if let Some(existing) = post.platform_responses.get(platform) {
                if existing.success && post.platform_responses.native_id(platform).is_some() {
                    report.succeeded += 1;
                    continue;
                }
            }

            let outcome = self.deliver(account, &content).await;
            if outcome.success {
                report.succeeded += 1;
            } else if let Some(error) = &outcome.error {
                failures.push(format!("{}: {}", platform, error));
            }

            if origin.detects_expired_credentials() && credential_rejected(&outcome) {
                self.expire_account(account).await;
                report.expired_accounts.push(account.id.clone());
            }

            self.ctx.events.emit(Event::PlatformResult {
                post_id: post.id.clone(),
                platform,
                success: outcome.success,
                native_id: outcome.native_id.clone(),
                error: outcome.error.clone(),
            });
            post.record_response(platform, outcome.to_response());
        }

        post.status = PostStatus::from_delivery(report.succeeded, report.attempted.len());
        post.error_log = if post.status == PostStatus::Failed {
            Some(failures.join("; "))
        } else {
            None
        };
        if report.succeeded > 0 && post.published_at.is_none() {
            post.published_at = Some(Utc::now().timestamp());
        }

        info!(
            post_id = %post.id,
            status = %post.status,
            attempted = report.attempted.len(),
            succeeded = report.succeeded,
            "Fan-out complete"
        );
        self.ctx.events.emit(Event::PublishCompleted {
            post_id: post.id.clone(),
            status: post.status,
        });

        Ok(report)
    }

    /// Create the post on one account's platform, folding every failure
    /// (including a panicking adapter) into the outcome.
    pub(crate) async fn deliver(&self, account: &Account, content: &PostContent) -> PublishOutcome {
        if account.platform == PlatformKind::Instagram {
            if let Some(bad) = content.images().into_iter().find(|url| !is_https(url)) {
                debug!(image_url = bad, "Instagram image is not HTTPS, skipping call");
                return PublishOutcome::from_error(&CrosspostError::InvalidInput(
                    "Instagram requires HTTPS image URLs".to_string(),
                ));
            }
        }

        let adapter = match self.ctx.registry.adapter_for(account, self.ctx.accounts.cipher()) {
            Ok(adapter) => adapter,
            Err(e) => {
                warn!(platform = %account.platform, account_id = %account.id, error = %e, "Could not build adapter");
                return PublishOutcome::from_error(&e);
            }
        };

        match AssertUnwindSafe(adapter.create_post(content)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(platform = %account.platform, "Adapter panicked while publishing");
                PublishOutcome::from_error(&CrosspostError::InvalidInput(format!(
                    "{} adapter failed unexpectedly",
                    account.platform
                )))
            }
        }
    }

    async fn expire_account(&self, account: &Account) {
        if let Err(e) = self.ctx.accounts.mark_expired(&account.id).await {
            warn!(account_id = %account.id, error = %e, "Failed to mark account expired");
            return;
        }
        self.ctx.events.emit(Event::AccountExpired {
            account_id: account.id.clone(),
            platform: account.platform,
        });
    }
}

/// Keyword matching only applies to answers the upstream actually gave
fn credential_rejected(outcome: &PublishOutcome) -> bool {
    if outcome.success {
        return false;
    }
    outcome.credential_rejected
        || (!outcome.transient
            && outcome
                .error
                .as_deref()
                .is_some_and(looks_like_expired_credential))
}

fn validate_request(request: &CreatePostRequest, max_images: usize) -> Result<()> {
    if request.tenant_id.trim().is_empty() {
        return Err(CrosspostError::InvalidInput("Tenant ID is required".to_string()));
    }
    if request.user_id.trim().is_empty() {
        return Err(CrosspostError::InvalidInput("User ID is required".to_string()));
    }
    if request.platforms.is_empty() {
        return Err(CrosspostError::InvalidInput(
            "At least one platform is required".to_string(),
        ));
    }

    let has_text = request.content.as_deref().is_some_and(|c| !c.trim().is_empty());
    let has_image = request.image_url.as_deref().is_some_and(|u| !u.trim().is_empty())
        || request.image_urls.iter().any(|u| !u.trim().is_empty());
    let has_link = request.link.as_deref().is_some_and(|l| !l.trim().is_empty());
    if !has_text && !has_image && !has_link {
        return Err(CrosspostError::InvalidInput(
            "Post must have content, an image or a link".to_string(),
        ));
    }

    if request.image_urls.len() > max_images {
        return Err(CrosspostError::InvalidInput(format!(
            "At most {} images per post ({} given)",
            max_images,
            request.image_urls.len()
        )));
    }
    Ok(())
}
