//! Platform abstraction and implementations
//!
//! Every external network sits behind the [`Platform`] trait. Implementors
//! provide `publish` and, optionally, `remove`; callers use the provided
//! [`Platform::create_post`] and [`Platform::delete_post`] wrappers, which
//! never fail and always hand back a structured outcome so one platform's
//! error can't abort a fan-out.
//!
//! Adapters are built per call by a [`PlatformRegistry`] keyed by
//! [`PlatformKind`], from a stored [`Account`].
//!
//! ```no_run
//! use libcrosspost::platforms::PlatformRegistry;
//! # use libcrosspost::{Account, PostContent, credentials::TokenCipher};
//!
//! # async fn example(registry: &PlatformRegistry, account: &Account, cipher: &TokenCipher) -> libcrosspost::Result<()> {
//! let adapter = registry.adapter_for(account, cipher)?;
//! let outcome = adapter.create_post(&PostContent::text("We're hiring!")).await;
//! if !outcome.success {
//!     eprintln!("{} failed: {:?}", adapter.name(), outcome.error);
//! }
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Endpoints;
use crate::credentials::{SealedToken, TokenCipher};
use crate::error::{CrosspostError, PlatformError, Result};
use crate::types::{Account, PlatformKind, PlatformResponse, PostContent};

pub mod facebook;
pub(crate) mod http;
pub mod instagram;
pub mod linkedin;
pub mod twitter;

// Available outside tests so integration tests and embedders can use it
pub mod mock;

/// Result of a create call, as recorded on the post
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    pub success: bool,
    pub native_id: Option<String>,
    pub error: Option<String>,
    /// The upstream rejected the account's credential
    pub credential_rejected: bool,
    /// The upstream was unreachable or throttled; says nothing about the credential
    pub transient: bool,
}

impl PublishOutcome {
    pub fn delivered(native_id: String) -> Self {
        Self {
            success: true,
            native_id: Some(native_id),
            error: None,
            credential_rejected: false,
            transient: false,
        }
    }

    pub fn from_error(error: &CrosspostError) -> Self {
        let (message, credential_rejected, transient) = match error {
            CrosspostError::Platform(e) => {
                (e.to_string(), e.is_credential_failure(), e.is_transient())
            }
            other => (other.to_string(), false, false),
        };
        Self {
            success: false,
            native_id: None,
            error: Some(message),
            credential_rejected,
            transient,
        }
    }

    pub fn to_response(&self) -> PlatformResponse {
        PlatformResponse {
            success: self.success,
            native_id: self.native_id.clone(),
            error: self.error.clone(),
        }
    }
}

/// Result of a delete call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub success: bool,
    pub error: Option<String>,
}

impl DeleteOutcome {
    pub fn removed() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Uniform capability set over one external network
#[async_trait]
pub trait Platform: Send + Sync {
    fn kind(&self) -> PlatformKind;

    fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Maximum characters of post text, or `None` for no hard limit
    fn character_limit(&self) -> Option<usize> {
        None
    }

    /// Check content against platform rules before any network call
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Validation` if the content is not postable here
    fn validate_content(&self, content: &PostContent) -> Result<()> {
        if let Some(limit) = self.character_limit() {
            let length = content.text.chars().count();
            if length > limit {
                return Err(PlatformError::Validation(format!(
                    "Content exceeds {} character limit ({} characters)",
                    limit, length
                ))
                .into());
            }
        }
        Ok(())
    }

    /// Create the post upstream and return its native id
    async fn publish(&self, content: &PostContent) -> Result<String>;

    fn supports_delete(&self) -> bool {
        false
    }

    /// Remove a post upstream. An already-absent post is `Ok`.
    async fn remove(&self, native_id: &str) -> Result<()> {
        let _ = native_id;
        Err(PlatformError::NotImplemented(format!("{} does not support deletion", self.name())).into())
    }

    /// Validate and publish, folding any error into the outcome
    async fn create_post(&self, content: &PostContent) -> PublishOutcome {
        let result = match self.validate_content(content) {
            Ok(()) => self.publish(content).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(native_id) => {
                tracing::info!(platform = self.name(), native_id = %native_id, "Post created");
                PublishOutcome::delivered(native_id)
            }
            Err(e) => {
                tracing::warn!(platform = self.name(), error = %e, "Post creation failed");
                PublishOutcome::from_error(&e)
            }
        }
    }

    /// Remove a post, folding any error into the outcome
    async fn delete_post(&self, native_id: &str) -> DeleteOutcome {
        if !self.supports_delete() {
            return DeleteOutcome::failed("unsupported");
        }

        match self.remove(native_id).await {
            Ok(()) => {
                tracing::info!(platform = self.name(), native_id, "Post deleted");
                DeleteOutcome::removed()
            }
            Err(e) => {
                tracing::warn!(platform = self.name(), native_id, error = %e, "Post deletion failed");
                DeleteOutcome::failed(e.to_string())
            }
        }
    }
}

/// Builds an adapter bound to one stored account
pub trait AdapterFactory: Send + Sync {
    fn build(&self, account: &Account, cipher: &TokenCipher) -> Result<Box<dyn Platform>>;
}

/// Adapter factories keyed by platform
#[derive(Clone, Default)]
pub struct PlatformRegistry {
    factories: HashMap<PlatformKind, Arc<dyn AdapterFactory>>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the HTTP adapters for every supported network
    pub fn with_http_adapters(
        http: reqwest::Client,
        endpoints: Endpoints,
        instagram_processing_delay: Duration,
    ) -> Self {
        let shared = Arc::new(HttpAdapterFactory {
            http,
            endpoints,
            instagram_processing_delay,
        });
        let mut registry = Self::new();
        for kind in PlatformKind::ALL {
            registry.register(kind, shared.clone());
        }
        registry
    }

    pub fn register(&mut self, kind: PlatformKind, factory: Arc<dyn AdapterFactory>) {
        self.factories.insert(kind, factory);
    }

    pub fn with(mut self, kind: PlatformKind, factory: Arc<dyn AdapterFactory>) -> Self {
        self.register(kind, factory);
        self
    }

    pub fn adapter_for(&self, account: &Account, cipher: &TokenCipher) -> Result<Box<dyn Platform>> {
        let factory = self.factories.get(&account.platform).ok_or_else(|| {
            PlatformError::NotImplemented(format!("no adapter registered for {}", account.platform))
        })?;
        factory.build(account, cipher)
    }
}

struct HttpAdapterFactory {
    http: reqwest::Client,
    endpoints: Endpoints,
    instagram_processing_delay: Duration,
}

impl AdapterFactory for HttpAdapterFactory {
    fn build(&self, account: &Account, cipher: &TokenCipher) -> Result<Box<dyn Platform>> {
        let token = SealedToken::new(account.access_token.clone(), cipher.clone());
        let adapter: Box<dyn Platform> = match account.platform {
            PlatformKind::Linkedin => Box::new(linkedin::LinkedInPlatform::new(
                self.http.clone(),
                &self.endpoints.linkedin_api,
                token,
                account,
            )?),
            PlatformKind::Facebook => Box::new(facebook::FacebookPlatform::new(
                self.http.clone(),
                &self.endpoints.graph_api,
                token,
                account,
            )?),
            PlatformKind::Instagram => Box::new(
                instagram::InstagramPlatform::new(
                    self.http.clone(),
                    &self.endpoints.graph_api,
                    token,
                    account,
                )?
                .with_processing_delay(self.instagram_processing_delay),
            ),
            PlatformKind::Twitter => Box::new(twitter::TwitterPlatform::new(
                self.http.clone(),
                &self.endpoints.twitter_api,
                token,
            )),
        };
        Ok(adapter)
    }
}
