//! Instagram business account implementation
//!
//! Publishing is two-step: create a media container from an image URL,
//! then publish the container. Several images become carousel items under
//! one `CAROUSEL` container. Instagram has no text-only posts.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use std::time::Duration;

use super::http::{id_field, json_body, network_error, UpstreamError};
use super::Platform;
use crate::credentials::SealedToken;
use crate::error::{PlatformError, Result};
use crate::media::is_https;
use crate::types::{Account, PlatformKind, PostContent};

pub const MAX_CAROUSEL_ITEMS: usize = 10;
const PUBLISH_ATTEMPTS: u32 = 2;

/// Graph error code for objects that no longer exist
const GRAPH_OBJECT_MISSING: i64 = 100;
/// Graph error code for missing permission
const GRAPH_PERMISSION_DENIED: i64 = 10;

pub struct InstagramPlatform {
    http: Client,
    graph_base: String,
    token: SealedToken,
    ig_user_id: String,
    processing_delay: Duration,
}

impl InstagramPlatform {
    pub fn new(http: Client, graph_base: &str, token: SealedToken, account: &Account) -> Result<Self> {
        let ig_user_id = account.platform_user_id.clone().ok_or_else(|| {
            PlatformError::Authentication(
                "Instagram account has no business account id; reconnect the account".to_string(),
            )
        })?;

        Ok(Self {
            http,
            graph_base: graph_base.trim_end_matches('/').to_string(),
            token,
            ig_user_id,
            processing_delay: Duration::from_secs(3),
        })
    }

    /// Wait between container creation and publish
    pub fn with_processing_delay(mut self, delay: Duration) -> Self {
        self.processing_delay = delay;
        self
    }

    fn graph(&self, path: &str) -> String {
        format!("{}/{}", self.graph_base, path.trim_start_matches('/'))
    }

    async fn create_container(&self, token: &SecretString, body: Value) -> Result<String> {
        let response = self
            .http
            .post(self.graph(&format!("{}/media", self.ig_user_id)))
            .query(&[("access_token", token.expose_secret())])
            .json(&body)
            .send()
            .await
            .map_err(|e| network_error(PlatformKind::Instagram, e))?;
        let body = json_body(PlatformKind::Instagram, response).await?;
        id_field(&body, &["/id"]).ok_or_else(|| {
            PlatformError::Posting("Instagram returned no container id".to_string()).into()
        })
    }

    async fn publish_container(&self, token: &SecretString, creation_id: &str) -> Result<String> {
        let response = self
            .http
            .post(self.graph(&format!("{}/media_publish", self.ig_user_id)))
            .query(&[("access_token", token.expose_secret())])
            .json(&json!({ "creation_id": creation_id }))
            .send()
            .await
            .map_err(|e| network_error(PlatformKind::Instagram, e))?;
        let body = json_body(PlatformKind::Instagram, response).await?;
        id_field(&body, &["/id"]).ok_or_else(|| {
            PlatformError::Posting("Instagram returned no media id".to_string()).into()
        })
    }

    async fn publish_with_retry(&self, token: &SecretString, creation_id: &str) -> Result<String> {
        let mut attempt = 1;
        loop {
            match self.publish_container(token, creation_id).await {
                Ok(media_id) => return Ok(media_id),
                Err(e) if attempt < PUBLISH_ATTEMPTS => {
                    tracing::warn!(creation_id, attempt, error = %e, "Instagram publish failed, retrying");
                    tokio::time::sleep(self.processing_delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl Platform for InstagramPlatform {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Instagram
    }

    fn character_limit(&self) -> Option<usize> {
        Some(2200)
    }

    fn validate_content(&self, content: &PostContent) -> Result<()> {
        let images = content.images();
        if images.is_empty() {
            return Err(PlatformError::Validation(
                "Instagram requires at least one image. Text-only posts are not supported."
                    .to_string(),
            )
            .into());
        }
        if let Some(bad) = images.iter().find(|url| !is_https(url)) {
            return Err(PlatformError::Validation(format!(
                "Instagram requires HTTPS image URLs: {}",
                bad
            ))
            .into());
        }

        let length = content.text.chars().count();
        if length > 2200 {
            return Err(PlatformError::Validation(format!(
                "Content exceeds 2200 character limit ({} characters)",
                length
            ))
            .into());
        }
        Ok(())
    }

    async fn publish(&self, content: &PostContent) -> Result<String> {
        let token = self.token.reveal()?;
        let mut images = content.images();
        if images.len() > MAX_CAROUSEL_ITEMS {
            tracing::warn!(
                count = images.len(),
                "Instagram carousel limited to {} images, extra images dropped",
                MAX_CAROUSEL_ITEMS
            );
            images.truncate(MAX_CAROUSEL_ITEMS);
        }

        let creation_id = match images.as_slice() {
            [] => {
                return Err(PlatformError::Validation(
                    "Instagram requires at least one image".to_string(),
                )
                .into())
            }
            [single] => {
                self.create_container(
                    &token,
                    json!({ "image_url": single, "caption": content.text }),
                )
                .await?
            }
            many => {
                let mut children = Vec::with_capacity(many.len());
                for image_url in many {
                    let child = self
                        .create_container(
                            &token,
                            json!({ "image_url": image_url, "is_carousel_item": true }),
                        )
                        .await?;
                    children.push(child);
                }
                self.create_container(
                    &token,
                    json!({
                        "media_type": "CAROUSEL",
                        "children": children.join(","),
                        "caption": content.text
                    }),
                )
                .await?
            }
        };

        tokio::time::sleep(self.processing_delay).await;
        self.publish_with_retry(&token, &creation_id).await
    }

    fn supports_delete(&self) -> bool {
        true
    }

    async fn remove(&self, native_id: &str) -> Result<()> {
        let token = self.token.reveal()?;
        let response = self
            .http
            .delete(self.graph(native_id))
            .query(&[("access_token", token.expose_secret())])
            .send()
            .await
            .map_err(|e| network_error(PlatformKind::Instagram, e))?;

        if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }

        let failure = UpstreamError::from_response(response).await;
        if failure.code == Some(GRAPH_OBJECT_MISSING) || failure.message.contains("does not exist") {
            return Ok(());
        }
        if failure.code == Some(GRAPH_PERMISSION_DENIED) {
            return Err(PlatformError::Posting(format!(
                "Instagram API does not allow deleting this media: {}",
                failure.message
            ))
            .into());
        }
        Err(failure.into_platform_error(PlatformKind::Instagram).into())
    }
}
