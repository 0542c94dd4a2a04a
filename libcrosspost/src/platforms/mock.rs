//! Mock platform implementation for testing
//!
//! A configurable adapter that records every call. Clones share their call
//! log, so a `MockPlatform` registered as an [`AdapterFactory`] can be
//! inspected after the orchestrator has built and used its own copies.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::credentials::TokenCipher;
use crate::error::{PlatformError, Result};
use crate::platforms::{AdapterFactory, Platform};
use crate::types::{Account, PlatformKind, PostContent};

/// How the mock answers delete calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockDelete {
    /// Removed, or already gone upstream
    Succeeds,
    Fails(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Publish { text: String, images: Vec<String> },
    Delete { native_id: String },
}

#[derive(Debug, Clone)]
pub struct MockConfig {
    pub kind: PlatformKind,
    pub publish_error: Option<PlatformError>,
    pub delete: MockDelete,
    pub supports_delete: bool,
    pub character_limit: Option<usize>,
    /// Delay before completing operations (simulates network latency)
    pub delay: Duration,
    pub calls: Arc<Mutex<Vec<MockCall>>>,
    sequence: Arc<AtomicUsize>,
}

impl MockConfig {
    pub fn new(kind: PlatformKind) -> Self {
        Self {
            kind,
            publish_error: None,
            delete: MockDelete::Succeeds,
            supports_delete: true,
            character_limit: None,
            delay: Duration::ZERO,
            calls: Arc::new(Mutex::new(Vec::new())),
            sequence: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MockPlatform {
    config: MockConfig,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockPlatform {
    pub fn new(config: MockConfig) -> Self {
        Self { config }
    }

    /// Accepts every post; ids are `{platform}-mock-{n}`
    pub fn succeeding(kind: PlatformKind) -> Self {
        Self::new(MockConfig::new(kind))
    }

    /// Rejects every post with `error`
    pub fn failing(kind: PlatformKind, error: PlatformError) -> Self {
        Self::new(MockConfig {
            publish_error: Some(error),
            ..MockConfig::new(kind)
        })
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.config.character_limit = Some(limit);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.config.delay = delay;
        self
    }

    pub fn with_delete(mut self, delete: MockDelete) -> Self {
        self.config.delete = delete;
        self
    }

    pub fn without_delete(mut self) -> Self {
        self.config.supports_delete = false;
        self
    }

    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.config.calls).clone()
    }

    pub fn publish_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, MockCall::Publish { .. }))
            .count()
    }

    pub fn published_texts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                MockCall::Publish { text, .. } => Some(text),
                MockCall::Delete { .. } => None,
            })
            .collect()
    }

    pub fn deleted_ids(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                MockCall::Delete { native_id } => Some(native_id),
                MockCall::Publish { .. } => None,
            })
            .collect()
    }
}

#[async_trait]
impl Platform for MockPlatform {
    fn kind(&self) -> PlatformKind {
        self.config.kind
    }

    fn character_limit(&self) -> Option<usize> {
        self.config.character_limit
    }

    async fn publish(&self, content: &PostContent) -> Result<String> {
        lock(&self.config.calls).push(MockCall::Publish {
            text: content.text.clone(),
            images: content.images().into_iter().map(str::to_string).collect(),
        });

        if !self.config.delay.is_zero() {
            tokio::time::sleep(self.config.delay).await;
        }

        match &self.config.publish_error {
            Some(error) => Err(error.clone().into()),
            None => {
                let n = self.config.sequence.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(format!("{}-mock-{}", self.config.kind, n))
            }
        }
    }

    fn supports_delete(&self) -> bool {
        self.config.supports_delete
    }

    async fn remove(&self, native_id: &str) -> Result<()> {
        lock(&self.config.calls).push(MockCall::Delete {
            native_id: native_id.to_string(),
        });

        match &self.config.delete {
            MockDelete::Succeeds => Ok(()),
            MockDelete::Fails(message) => Err(PlatformError::Posting(message.clone()).into()),
        }
    }
}

impl AdapterFactory for MockPlatform {
    fn build(&self, _account: &Account, _cipher: &TokenCipher) -> Result<Box<dyn Platform>> {
        Ok(Box::new(self.clone()))
    }
}
