//! Delete workflow
//!
//! Tears a post down platform by platform. Platforms whose copy is gone
//! are pruned from the post; the rest stay on it so the delete can be
//! retried. Only a post with no platforms left is soft-deleted.

use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use super::events::Event;
use super::ServiceContext;
use crate::error::{CrosspostError, Result};
use crate::platforms::DeleteOutcome;
use crate::types::{Account, PlatformKind, Post, PostStatus};

const SAVE_ATTEMPTS: usize = 3;

/// Outcome of one platform's teardown
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformDeletion {
    pub platform: PlatformKind,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteReport {
    pub post: Post,
    pub results: Vec<PlatformDeletion>,
}

impl DeleteReport {
    pub fn fully_deleted(&self) -> bool {
        self.post.status == PostStatus::Deleted
    }
}

#[derive(Clone)]
pub struct DeletionService {
    ctx: Arc<ServiceContext>,
}

impl DeletionService {
    pub(crate) fn new(ctx: Arc<ServiceContext>) -> Self {
        Self { ctx }
    }

    /// Remove a post from every platform it is on.
    ///
    /// Per platform: no connected account is a failure ("account
    /// disconnected"); no recorded native id counts as already gone; an
    /// adapter without delete support is a failure ("unsupported");
    /// otherwise the adapter's delete decides, with a missing upstream
    /// post counting as success.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown or already deleted posts
    pub async fn delete_post(&self, tenant_id: &str, post_id: &str) -> Result<DeleteReport> {
        let mut post = match self.ctx.db.get_post(tenant_id, post_id).await? {
            Some(post) if !post.is_deleted => post,
            _ => return Err(CrosspostError::NotFound(format!("Post {} not found", post_id))),
        };

        let accounts = self
            .ctx
            .accounts
            .find_active(&post.tenant_id, &post.platforms)
            .await?;

        let mut results = Vec::with_capacity(post.platforms.len());
        for platform in post.platforms.clone() {
            let native_id = post.platform_responses.native_id(platform).map(str::to_string);
            let account = accounts.iter().find(|a| a.platform == platform);
            let outcome = self.remove_from(platform, account, native_id.as_deref()).await;

            results.push(PlatformDeletion {
                platform,
                success: outcome.success,
                error: outcome.error,
            });
        }

        let removed: Vec<PlatformKind> = results
            .iter()
            .filter(|r| r.success)
            .map(|r| r.platform)
            .collect();
        self.save_removal(&mut post, &removed).await?;

        info!(
            post_id,
            tenant_id,
            status = %post.status,
            remaining = ?post.platforms,
            "Post delete processed"
        );
        self.ctx.events.emit(Event::PostDeleted {
            post_id: post.id.clone(),
            status: post.status,
            remaining: post.platforms.clone(),
        });

        Ok(DeleteReport { post, results })
    }

    async fn remove_from(
        &self,
        platform: PlatformKind,
        account: Option<&Account>,
        native_id: Option<&str>,
    ) -> DeleteOutcome {
        let Some(account) = account else {
            return DeleteOutcome::failed("account disconnected");
        };
        // Never published here; nothing upstream to remove. Checked before
        // delete capability so an unsent entry on a platform without delete
        // can still be cleaned up.
        let Some(native_id) = native_id else {
            return DeleteOutcome::removed();
        };

        match self.ctx.registry.adapter_for(account, self.ctx.accounts.cipher()) {
            Ok(adapter) => adapter.delete_post(native_id).await,
            Err(e) => {
                warn!(%platform, error = %e, "Could not build adapter for delete");
                DeleteOutcome::failed(e.to_string())
            }
        }
    }

    /// Prune `removed` platforms and save, reapplying onto the latest row
    /// if another writer got in first.
    async fn save_removal(&self, post: &mut Post, removed: &[PlatformKind]) -> Result<()> {
        for _ in 0..SAVE_ATTEMPTS {
            for platform in removed {
                post.prune_platform(*platform);
            }
            if post.platforms.is_empty() {
                post.mark_deleted(chrono::Utc::now().timestamp());
            } else {
                post.status = PostStatus::PartiallyDeleted;
            }

            if self.ctx.db.save_post(post).await? {
                return Ok(());
            }

            match self.ctx.db.get_post_by_id(&post.id).await? {
                Some(latest) if !latest.is_deleted => *post = latest,
                _ => {
                    return Err(CrosspostError::NotFound(format!("Post {} not found", post.id)));
                }
            }
        }

        Err(CrosspostError::Conflict(format!(
            "post {} kept changing while deleting",
            post.id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::{AccountCredentials, AccountProfile, AccountStore};
    use crate::credentials::TokenCipher;
    use crate::db::Database;
    use crate::platforms::mock::{MockDelete, MockPlatform};
    use crate::platforms::PlatformRegistry;
    use crate::service::posting::CreatePostRequest;
    use crate::service::tasks::TaskReceiver;
    use crate::service::{CrosspostService, ServiceSettings};
    use secrecy::SecretString;
    use tempfile::TempDir;

    async fn setup(registry: PlatformRegistry) -> (CrosspostService, TaskReceiver, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("delete.db");
        let db = Database::new(db_path.to_str().unwrap()).await.unwrap();
        let accounts = AccountStore::new(db.clone(), TokenCipher::generate());
        let (service, receiver) =
            CrosspostService::new(db, accounts, registry, ServiceSettings::default());
        (service, receiver, temp_dir)
    }

    async fn connect(service: &CrosspostService, platform: PlatformKind) {
        service
            .accounts()
            .upsert_account(
                "acme",
                platform,
                AccountCredentials {
                    access_token: SecretString::from("token".to_string()),
                    refresh_token: None,
                    expires_at: None,
                },
                AccountProfile::default(),
                None,
            )
            .await
            .unwrap();
    }

    async fn publish(service: &CrosspostService, receiver: &mut TaskReceiver, platforms: Vec<PlatformKind>) -> Post {
        let post = service
            .posting()
            .create_and_publish(CreatePostRequest {
                tenant_id: "acme".to_string(),
                user_id: "u-1".to_string(),
                content: Some("Open role".to_string()),
                platforms,
                ..Default::default()
            })
            .await
            .unwrap();
        service.run_task(receiver.try_recv().unwrap()).await.unwrap();
        service.get_post("acme", &post.id).await.unwrap()
    }

    #[tokio::test]
    async fn test_full_delete_soft_deletes_post() {
        let linkedin = MockPlatform::succeeding(PlatformKind::Linkedin);
        let facebook = MockPlatform::succeeding(PlatformKind::Facebook);
        let registry = PlatformRegistry::new()
            .with(PlatformKind::Linkedin, Arc::new(linkedin.clone()))
            .with(PlatformKind::Facebook, Arc::new(facebook.clone()));
        let (service, mut receiver, _dir) = setup(registry).await;
        connect(&service, PlatformKind::Linkedin).await;
        connect(&service, PlatformKind::Facebook).await;

        let post = publish(
            &service,
            &mut receiver,
            vec![PlatformKind::Linkedin, PlatformKind::Facebook],
        )
        .await;
        let report = service.deletion().delete_post("acme", &post.id).await.unwrap();

        assert!(report.fully_deleted());
        assert!(report.post.is_deleted);
        assert!(report.post.platforms.is_empty());
        assert!(report.post.platform_responses.is_empty());
        assert_eq!(linkedin.deleted_ids(), vec!["linkedin-mock-1"]);
        assert_eq!(facebook.deleted_ids(), vec!["facebook-mock-1"]);

        // Gone from listings and no longer addressable
        assert!(service.list_posts("acme").await.unwrap().is_empty());
        let err = service.deletion().delete_post("acme", &post.id).await.unwrap_err();
        assert!(matches!(err, CrosspostError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_failed_platform_remains_for_retry() {
        let linkedin = MockPlatform::succeeding(PlatformKind::Linkedin);
        let facebook = MockPlatform::succeeding(PlatformKind::Facebook)
            .with_delete(MockDelete::Fails("(#200) Permissions error".to_string()));
        let registry = PlatformRegistry::new()
            .with(PlatformKind::Linkedin, Arc::new(linkedin))
            .with(PlatformKind::Facebook, Arc::new(facebook));
        let (service, mut receiver, _dir) = setup(registry).await;
        connect(&service, PlatformKind::Linkedin).await;
        connect(&service, PlatformKind::Facebook).await;

        let post = publish(
            &service,
            &mut receiver,
            vec![PlatformKind::Linkedin, PlatformKind::Facebook],
        )
        .await;
        let report = service.deletion().delete_post("acme", &post.id).await.unwrap();

        assert_eq!(report.post.status, PostStatus::PartiallyDeleted);
        assert!(!report.post.is_deleted);
        assert_eq!(report.post.platforms, vec![PlatformKind::Facebook]);
        assert!(report.post.platform_responses.get(PlatformKind::Linkedin).is_none());
        assert_eq!(
            report.post.platform_responses.native_id(PlatformKind::Facebook),
            Some("facebook-mock-1")
        );
    }

    #[tokio::test]
    async fn test_disconnected_and_unsupported_platforms() {
        let twitter = MockPlatform::succeeding(PlatformKind::Twitter).without_delete();
        let linkedin = MockPlatform::succeeding(PlatformKind::Linkedin);
        let registry = PlatformRegistry::new()
            .with(PlatformKind::Twitter, Arc::new(twitter))
            .with(PlatformKind::Linkedin, Arc::new(linkedin));
        let (service, mut receiver, _dir) = setup(registry).await;
        connect(&service, PlatformKind::Twitter).await;
        connect(&service, PlatformKind::Linkedin).await;

        let post = publish(
            &service,
            &mut receiver,
            vec![PlatformKind::Twitter, PlatformKind::Linkedin],
        )
        .await;
        service
            .accounts()
            .disconnect("acme", PlatformKind::Linkedin)
            .await
            .unwrap();

        let report = service.deletion().delete_post("acme", &post.id).await.unwrap();
        let errors: Vec<_> = report
            .results
            .iter()
            .map(|r| (r.platform, r.error.as_deref()))
            .collect();
        assert_eq!(
            errors,
            vec![
                (PlatformKind::Twitter, Some("unsupported")),
                (PlatformKind::Linkedin, Some("account disconnected")),
            ]
        );
        assert_eq!(report.post.status, PostStatus::PartiallyDeleted);
        assert_eq!(report.post.platforms.len(), 2);
    }

    #[tokio::test]
    async fn test_never_published_platform_counts_as_removed() {
        let (service, _receiver, _dir) = setup(PlatformRegistry::new()).await;
        connect(&service, PlatformKind::Instagram).await;

        let post = service
            .posting()
            .create_and_publish(CreatePostRequest {
                tenant_id: "acme".to_string(),
                user_id: "u-1".to_string(),
                content: Some("Draft-ish".to_string()),
                platforms: vec![PlatformKind::Instagram],
                scheduled_at: Some(chrono::Utc::now() + chrono::Duration::hours(1)),
                ..Default::default()
            })
            .await
            .unwrap();

        let report = service.deletion().delete_post("acme", &post.id).await.unwrap();
        assert!(report.fully_deleted());
        assert!(report.results[0].success);
    }

    #[tokio::test]
    async fn test_unsent_entry_on_platform_without_delete_is_pruned() {
        let twitter = MockPlatform::succeeding(PlatformKind::Twitter).without_delete();
        let registry = PlatformRegistry::new().with(PlatformKind::Twitter, Arc::new(twitter));
        let (service, _receiver, _dir) = setup(registry).await;
        connect(&service, PlatformKind::Twitter).await;

        let post = service
            .posting()
            .create_and_publish(CreatePostRequest {
                tenant_id: "acme".to_string(),
                user_id: "u-1".to_string(),
                content: Some("Launch thread".to_string()),
                platforms: vec![PlatformKind::Twitter],
                scheduled_at: Some(chrono::Utc::now() + chrono::Duration::hours(1)),
                ..Default::default()
            })
            .await
            .unwrap();

        let report = service.deletion().delete_post("acme", &post.id).await.unwrap();
        assert!(report.results[0].success);
        assert_eq!(report.results[0].error, None);
        assert!(report.fully_deleted());
        assert_eq!(report.post.status, PostStatus::Deleted);
    }
}
