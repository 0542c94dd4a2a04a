//! Publishing lifecycle events
//!
//! An in-process broadcast bus. Background publish, edit and delete steps
//! emit events here; the HTTP layer, tests or a metrics exporter can
//! subscribe. With no subscribers events are simply dropped.
//!
//! ```
//! use libcrosspost::service::events::{Event, EventBus};
//! use libcrosspost::PlatformKind;
//!
//! # async fn example() {
//! let event_bus = EventBus::new(100);
//! let mut receiver = event_bus.subscribe();
//!
//! event_bus.emit(Event::PublishStarted {
//!     post_id: "abc123".to_string(),
//!     platforms: vec![PlatformKind::Linkedin],
//! });
//!
//! if let Ok(event) = receiver.recv().await {
//!     println!("Received: {:?}", event);
//! }
//! # }
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::{PlatformKind, PostStatus};

pub type EventReceiver = broadcast::Receiver<Event>;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// `capacity` events are buffered per subscriber before the oldest are dropped
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Emit to all subscribers without blocking
    pub fn emit(&self, event: Event) {
        // Err only means nobody is listening
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    PublishStarted {
        post_id: String,
        platforms: Vec<PlatformKind>,
    },

    /// One platform finished within a fan-out
    PlatformResult {
        post_id: String,
        platform: PlatformKind,
        success: bool,
        native_id: Option<String>,
        error: Option<String>,
    },

    PublishCompleted {
        post_id: String,
        status: PostStatus,
    },

    PostEdited {
        post_id: String,
        reposted: Vec<PlatformKind>,
    },

    PostDeleted {
        post_id: String,
        status: PostStatus,
        remaining: Vec<PlatformKind>,
    },

    AccountExpired {
        account_id: String,
        platform: PlatformKind,
    },
}
