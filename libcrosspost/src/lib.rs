//! Crosspost - publish one post to several social networks
//!
//! This library holds everything the Crosspost server and scheduler daemon
//! share: the account store with encrypted tokens, the platform adapters,
//! the publish/edit/delete workflows and the scheduled-post sweeper.

pub mod accounts;
pub mod config;
pub mod credentials;
pub mod db;
pub mod error;
pub mod logging;
pub mod media;
pub mod oauth;
pub mod platforms;
pub mod scheduler;
pub mod service;
pub mod types;

// Re-export commonly used types
pub use accounts::{AccountCredentials, AccountProfile, AccountStore};
pub use config::Config;
pub use credentials::TokenCipher;
pub use db::Database;
pub use error::{CrosspostError, Result};
pub use oauth::{OAuthService, OAuthState};
pub use scheduler::{Scheduler, TokenRefresher};
pub use service::CrosspostService;
pub use types::{Account, AccountStatus, PlatformKind, Post, PostContent, PostStatus};
