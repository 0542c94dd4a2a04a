//! Core types for Crosspost

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CrosspostError;

/// External social network a post can be delivered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    Linkedin,
    Facebook,
    Instagram,
    Twitter,
}

impl PlatformKind {
    pub const ALL: [PlatformKind; 4] = [
        PlatformKind::Linkedin,
        PlatformKind::Facebook,
        PlatformKind::Instagram,
        PlatformKind::Twitter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformKind::Linkedin => "linkedin",
            PlatformKind::Facebook => "facebook",
            PlatformKind::Instagram => "instagram",
            PlatformKind::Twitter => "twitter",
        }
    }
}

impl FromStr for PlatformKind {
    type Err = CrosspostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "linkedin" => Ok(PlatformKind::Linkedin),
            "facebook" => Ok(PlatformKind::Facebook),
            "instagram" => Ok(PlatformKind::Instagram),
            "twitter" | "x" => Ok(PlatformKind::Twitter),
            other => Err(CrosspostError::InvalidInput(format!(
                "Unsupported platform: '{}'. Valid options: linkedin, facebook, instagram, twitter",
                other
            ))),
        }
    }
}

impl std::fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Accounts
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Connected,
    Expired,
    Error,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Connected => "connected",
            AccountStatus::Expired => "expired",
            AccountStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "connected" => Some(AccountStatus::Connected),
            "expired" => Some(AccountStatus::Expired),
            "error" => Some(AccountStatus::Error),
            _ => None,
        }
    }
}

/// A connected social account, one per (tenant, platform).
///
/// Token fields hold ciphertext and are never serialized.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    pub tenant_id: String,
    pub platform: PlatformKind,
    #[serde(skip_serializing)]
    pub access_token: String,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    pub expires_at: Option<i64>,
    pub status: AccountStatus,
    pub is_connected: bool,
    pub platform_user_id: Option<String>,
    pub platform_user_name: Option<String>,
    pub page_id: Option<String>,
    pub page_name: Option<String>,
    pub connected_by: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

// ============================================================================
// Posts
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    Draft,
    Scheduled,
    Publishing,
    Published,
    Failed,
    PartialSuccess,
    Edited,
    Deleted,
    PartiallyDeleted,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Scheduled => "scheduled",
            PostStatus::Publishing => "publishing",
            PostStatus::Published => "published",
            PostStatus::Failed => "failed",
            PostStatus::PartialSuccess => "partial_success",
            PostStatus::Edited => "edited",
            PostStatus::Deleted => "deleted",
            PostStatus::PartiallyDeleted => "partially_deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "draft" => PostStatus::Draft,
            "scheduled" => PostStatus::Scheduled,
            "publishing" => PostStatus::Publishing,
            "published" => PostStatus::Published,
            "failed" => PostStatus::Failed,
            "partial_success" => PostStatus::PartialSuccess,
            "edited" => PostStatus::Edited,
            "deleted" => PostStatus::Deleted,
            "partially_deleted" => PostStatus::PartiallyDeleted,
            _ => return None,
        })
    }

    /// Terminal status after a fan-out where `succeeded` of `attempted`
    /// platforms accepted the post.
    pub fn from_delivery(succeeded: usize, attempted: usize) -> Self {
        if attempted == 0 || succeeded == 0 {
            PostStatus::Failed
        } else if succeeded == attempted {
            PostStatus::Published
        } else {
            PostStatus::PartialSuccess
        }
    }
}

impl std::fmt::Display for PostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery result recorded for one platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PlatformResponse {
    pub fn delivered(native_id: impl Into<String>) -> Self {
        Self {
            success: true,
            native_id: Some(native_id.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            native_id: None,
            error: Some(error.into()),
        }
    }
}

/// Per-platform response map keyed by platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlatformResponses(BTreeMap<PlatformKind, PlatformResponse>);

impl PlatformResponses {
    pub fn get(&self, platform: PlatformKind) -> Option<&PlatformResponse> {
        self.0.get(&platform)
    }

    pub fn native_id(&self, platform: PlatformKind) -> Option<&str> {
        self.0
            .get(&platform)
            .and_then(|r| r.native_id.as_deref())
            .filter(|id| !id.is_empty())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PlatformKind, &PlatformResponse)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn insert(&mut self, platform: PlatformKind, response: PlatformResponse) {
        self.0.insert(platform, response);
    }

    fn remove(&mut self, platform: PlatformKind) -> Option<PlatformResponse> {
        self.0.remove(&platform)
    }
}

/// Content handed to a platform adapter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostContent {
    pub text: String,
    pub image_url: Option<String>,
    pub image_urls: Vec<String>,
    pub link: Option<String>,
}

impl PostContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// All images to attach, falling back to the single legacy field.
    pub fn images(&self) -> Vec<&str> {
        if !self.image_urls.is_empty() {
            self.image_urls.iter().map(String::as_str).collect()
        } else {
            self.image_url.as_deref().into_iter().collect()
        }
    }

    pub fn main_image(&self) -> Option<&str> {
        self.image_url
            .as_deref()
            .or_else(|| self.image_urls.first().map(String::as_str))
    }
}

/// A single authored publication intent and its delivery state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub tenant_id: String,
    pub created_by: Option<String>,
    pub content: Option<String>,
    pub image_url: Option<String>,
    pub image_urls: Vec<String>,
    pub link: Option<String>,
    pub platforms: Vec<PlatformKind>,
    pub status: PostStatus,
    pub scheduled_at: Option<i64>,
    pub platform_responses: PlatformResponses,
    pub error_log: Option<String>,
    pub is_deleted: bool,
    pub deleted_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    pub edited_at: Option<i64>,
    pub published_at: Option<i64>,
    pub version: i64,
}

impl Post {
    pub fn new(tenant_id: impl Into<String>, platforms: Vec<PlatformKind>) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            created_by: None,
            content: None,
            image_url: None,
            image_urls: Vec::new(),
            link: None,
            platforms,
            status: PostStatus::Publishing,
            scheduled_at: None,
            platform_responses: PlatformResponses::default(),
            error_log: None,
            is_deleted: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
            edited_at: None,
            published_at: None,
            version: 0,
        }
    }

    pub fn content_payload(&self) -> PostContent {
        PostContent {
            text: self.content.clone().unwrap_or_default(),
            image_url: self.image_url.clone(),
            image_urls: self.image_urls.clone(),
            link: self.link.clone(),
        }
    }

    /// Record a delivery result. Ignored for platforms the post does not target.
    pub fn record_response(&mut self, platform: PlatformKind, response: PlatformResponse) -> bool {
        if !self.platforms.contains(&platform) {
            return false;
        }
        self.platform_responses.insert(platform, response);
        true
    }

    /// Drop a platform from both the target list and the response map.
    pub fn prune_platform(&mut self, platform: PlatformKind) {
        self.platforms.retain(|p| *p != platform);
        self.platform_responses.remove(platform);
    }

    pub fn mark_deleted(&mut self, now: i64) {
        self.platforms.clear();
        self.platform_responses = PlatformResponses::default();
        self.is_deleted = true;
        self.deleted_at = Some(now);
        self.status = PostStatus::Deleted;
    }
}

// ============================================================================
// Upload Types
// ============================================================================

/// Supported image MIME types for uploads
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ImageMimeType {
    Jpeg,
    Png,
    Gif,
    WebP,
}

impl ImageMimeType {
    /// Parse MIME type from a MIME string (e.g., "image/jpeg")
    pub fn from_mime_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            "image/png" => Some(Self::Png),
            "image/gif" => Some(Self::Gif),
            "image/webp" => Some(Self::WebP),
            _ => None,
        }
    }

    /// Detect MIME type from a file name's extension
    pub fn from_file_name(name: &str) -> Option<Self> {
        let ext = name.rsplit_once('.').map(|(_, ext)| ext)?;
        match ext.to_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "gif" => Some(Self::Gif),
            "webp" => Some(Self::WebP),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::WebP => "image/webp",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Gif => "gif",
            Self::WebP => "webp",
        }
    }
}

impl std::fmt::Display for ImageMimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
