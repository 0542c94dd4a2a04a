//! Service layer for Crosspost
//!
//! `CrosspostService` is the facade the HTTP server and the scheduler
//! daemon share. It coordinates specialized sub-services over one set of
//! shared resources:
//!
//! - [`PostingService`]: create, persist and fan posts out to platforms
//! - [`EditService`]: edit content and repost to platforms
//! - [`DeletionService`]: platform-wise teardown
//! - [`EventBus`]: lifecycle event distribution
//!
//! Work that happens after a request has been answered runs as a
//! [`Task`] on the background queue.
//!
//! # Example
//!
//! ```no_run
//! use libcrosspost::service::posting::CreatePostRequest;
//! use libcrosspost::service::{tasks, CrosspostService};
//! use libcrosspost::{Config, PlatformKind};
//!
//! # async fn example() -> libcrosspost::Result<()> {
//! let config = Config::load()?;
//! let (service, receiver) = CrosspostService::from_config(&config).await?;
//! tokio::spawn(tasks::run_workers(service.clone(), receiver, 4));
//!
//! let post = service
//!     .posting()
//!     .create_and_publish(CreatePostRequest {
//!         tenant_id: "acme".to_string(),
//!         user_id: "u-1".to_string(),
//!         content: Some("We're hiring!".to_string()),
//!         platforms: vec![PlatformKind::Linkedin, PlatformKind::Facebook],
//!         ..Default::default()
//!     })
//!     .await?;
//! println!("Post {} is {}", post.id, post.status);
//! # Ok(())
//! # }
//! ```

pub mod dedup;
pub mod deletion;
pub mod editing;
pub mod events;
pub mod posting;
pub mod tasks;

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use self::deletion::DeletionService;
use self::editing::EditService;
use self::events::{EventBus, EventReceiver};
use self::posting::PostingService;
use self::tasks::{Task, TaskQueue, TaskReceiver};
use crate::accounts::AccountStore;
use crate::config::Config;
use crate::credentials::TokenCipher;
use crate::db::Database;
use crate::error::{ConfigError, CrosspostError, Result};
use crate::platforms::PlatformRegistry;
use crate::types::{PlatformKind, Post, PostStatus};

const SAVE_ATTEMPTS: usize = 3;

/// Request-independent knobs for the posting services
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// Public base URL; relative image paths are resolved against it
    pub backend_url: String,
    pub duplicate_window: Duration,
    pub max_images: usize,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:5000".to_string(),
            duplicate_window: Duration::from_secs(60),
            max_images: 10,
        }
    }
}

impl ServiceSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            backend_url: config.server.backend_url.clone(),
            duplicate_window: Duration::from_secs(config.publishing.duplicate_window_secs),
            max_images: config.publishing.max_images,
        }
    }
}

/// Resources every sub-service shares
pub(crate) struct ServiceContext {
    pub(crate) db: Database,
    pub(crate) accounts: AccountStore,
    pub(crate) registry: PlatformRegistry,
    pub(crate) events: EventBus,
    pub(crate) settings: ServiceSettings,
}

impl ServiceContext {
    /// Persist the outcome of a background step.
    ///
    /// On a version conflict the latest row is reloaded and only the
    /// step's own platform entries (`touched`), status and publish time
    /// are re-applied. A post deleted in the meantime keeps its deleted
    /// state and the step's results are discarded.
    pub(crate) async fn save_step(&self, post: &mut Post, touched: &[PlatformKind]) -> Result<()> {
        for _ in 0..SAVE_ATTEMPTS {
            if self.db.save_post(post).await? {
                return Ok(());
            }

            let Some(mut latest) = self.db.get_post_by_id(&post.id).await? else {
                warn!(post_id = %post.id, "Post vanished before results could be saved");
                return Ok(());
            };
            if latest.is_deleted {
                info!(post_id = %post.id, "Post deleted while a background step was running, results discarded");
                *post = latest;
                return Ok(());
            }

            for platform in touched {
                if let Some(response) = post.platform_responses.get(*platform).cloned() {
                    latest.record_response(*platform, response);
                }
            }
            if latest.status != PostStatus::PartiallyDeleted {
                latest.status = post.status;
                latest.error_log = post.error_log.clone();
            }
            latest.published_at = post.published_at.or(latest.published_at);
            *post = latest;
        }

        Err(CrosspostError::Conflict(format!(
            "post {} kept changing while saving results",
            post.id
        )))
    }
}

/// Main service facade
///
/// Cheap to clone; every clone shares the same database pool, registry,
/// event bus and task queue.
#[derive(Clone)]
pub struct CrosspostService {
    ctx: Arc<ServiceContext>,
    posting: PostingService,
    editing: EditService,
    deletion: DeletionService,
}

impl CrosspostService {
    /// Assemble a service from its parts. The returned receiver must be
    /// handed to [`tasks::run_workers`] (or drained with
    /// [`CrosspostService::run_task`] in tests).
    pub fn new(
        db: Database,
        accounts: AccountStore,
        registry: PlatformRegistry,
        settings: ServiceSettings,
    ) -> (Self, TaskReceiver) {
        let (queue, receiver) = TaskQueue::channel();
        let ctx = Arc::new(ServiceContext {
            db,
            accounts,
            registry,
            events: EventBus::default(),
            settings,
        });

        let posting = PostingService::new(Arc::clone(&ctx), queue);
        let editing = EditService::new(Arc::clone(&ctx), posting.clone());
        let deletion = DeletionService::new(Arc::clone(&ctx));

        (
            Self {
                ctx,
                posting,
                editing,
                deletion,
            },
            receiver,
        )
    }

    /// Open the database, load the token key and register the HTTP
    /// adapters described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No token key is configured or it does not parse
    /// - The database cannot be opened or migrated
    pub async fn from_config(config: &Config) -> Result<(Self, TaskReceiver)> {
        let key = config.security.token_key.as_deref().ok_or_else(|| {
            ConfigError::MissingField(
                "security.token_key (or CROSSPOST_TOKEN_KEY); generate one with --generate-key"
                    .to_string(),
            )
        })?;
        let cipher = TokenCipher::from_key(key)?;

        let db = Database::new(&config.expanded_database_path()).await?;
        let accounts = AccountStore::new(db.clone(), cipher);

        let http = http_client()?;
        let registry = PlatformRegistry::with_http_adapters(
            http,
            config.endpoints.clone(),
            Duration::from_millis(config.publishing.instagram_processing_delay_ms),
        );

        Ok(Self::new(db, accounts, registry, ServiceSettings::from_config(config)))
    }

    pub(crate) fn context(&self) -> &ServiceContext {
        &self.ctx
    }

    pub fn database(&self) -> &Database {
        &self.ctx.db
    }

    pub fn accounts(&self) -> &AccountStore {
        &self.ctx.accounts
    }

    pub fn posting(&self) -> &PostingService {
        &self.posting
    }

    pub fn editing(&self) -> &EditService {
        &self.editing
    }

    pub fn deletion(&self) -> &DeletionService {
        &self.deletion
    }

    pub fn events(&self) -> &EventBus {
        &self.ctx.events
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.ctx.events.subscribe()
    }

    /// Non-deleted posts of a tenant, newest first
    pub async fn list_posts(&self, tenant_id: &str) -> Result<Vec<Post>> {
        self.ctx.db.list_posts(tenant_id).await
    }

    /// # Errors
    ///
    /// `NotFound` if the post does not exist for this tenant or is deleted
    pub async fn get_post(&self, tenant_id: &str, post_id: &str) -> Result<Post> {
        match self.ctx.db.get_post(tenant_id, post_id).await? {
            Some(post) if !post.is_deleted => Ok(post),
            _ => Err(CrosspostError::NotFound(format!("Post {} not found", post_id))),
        }
    }

    /// Execute one queued task to completion
    pub async fn run_task(&self, task: Task) -> Result<()> {
        match task {
            Task::Publish { post_id } => self.posting.publish_post(&post_id).await,
            Task::Repost { post_id } => self.editing.repost(&post_id).await,
        }
    }

    /// Re-enqueue posts a previous process left in `publishing`.
    ///
    /// Returns the number of tasks submitted.
    pub async fn recover_in_flight(&self) -> Result<usize> {
        let stranded = self.ctx.db.get_posts_by_status(PostStatus::Publishing).await?;
        let mut submitted = 0;
        for post in stranded {
            if self.posting.enqueue(Task::Publish { post_id: post.id }) {
                submitted += 1;
            }
        }
        if submitted > 0 {
            info!(count = submitted, "Re-enqueued posts left in publishing");
        }
        Ok(submitted)
    }
}

/// Shared upstream client; per-call timeouts surface as adapter failures
pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .user_agent(concat!("crosspost/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ConfigError::Invalid(format!("HTTP client: {}", e)).into())
}
