//! Facebook Page platform implementation
//!
//! The Graph API endpoint depends on the content:
//!
//! - one image: `/{page}/photos` with the image URL and caption
//! - several images: each uploaded unpublished to `/photos`, then one
//!   `/{page}/feed` post with `attached_media`
//! - link only: `/{page}/feed` with `link`
//! - text only: `/{page}/feed`
//!
//! Facebook fetches images itself, so images on loopback or private hosts
//! are dropped and the post goes out as text instead.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};

use super::http::{id_field, json_body, network_error, UpstreamError};
use super::Platform;
use crate::credentials::SealedToken;
use crate::error::{PlatformError, Result};
use crate::media::is_publicly_reachable;
use crate::types::{Account, PlatformKind, PostContent};

pub struct FacebookPlatform {
    http: Client,
    graph_base: String,
    token: SealedToken,
    page_id: String,
}

impl FacebookPlatform {
    pub fn new(http: Client, graph_base: &str, token: SealedToken, account: &Account) -> Result<Self> {
        let page_id = account
            .page_id
            .clone()
            .or_else(|| account.platform_user_id.clone())
            .ok_or_else(|| {
                PlatformError::Authentication(
                    "Facebook account has no page id; reconnect the account".to_string(),
                )
            })?;

        Ok(Self {
            http,
            graph_base: graph_base.trim_end_matches('/').to_string(),
            token,
            page_id,
        })
    }

    fn graph(&self, path: &str) -> String {
        format!("{}/{}", self.graph_base, path.trim_start_matches('/'))
    }

    async fn post_graph(&self, token: &SecretString, path: &str, body: &Value) -> Result<Value> {
        let response = self
            .http
            .post(self.graph(path))
            .query(&[("access_token", token.expose_secret())])
            .json(body)
            .send()
            .await
            .map_err(|e| network_error(PlatformKind::Facebook, e))?;
        json_body(PlatformKind::Facebook, response).await
    }

    async fn feed_post(&self, token: &SecretString, content: &PostContent) -> Result<String> {
        let mut body = json!({ "message": content.text });
        if let Some(link) = content.link.as_deref() {
            body["link"] = json!(link);
        }
        let response = self
            .post_graph(token, &format!("{}/feed", self.page_id), &body)
            .await?;
        extract_id(&response)
    }

    async fn photo_post(&self, token: &SecretString, image_url: &str, content: &PostContent) -> Result<String> {
        let mut caption = content.text.clone();
        if let Some(link) = content.link.as_deref() {
            if !caption.contains(link) {
                if !caption.is_empty() {
                    caption.push_str("\n\n");
                }
                caption.push_str(link);
            }
        }

        let body = json!({ "url": image_url, "caption": caption });
        let response = self
            .post_graph(token, &format!("{}/photos", self.page_id), &body)
            .await?;
        extract_id(&response)
    }

    async fn album_post(&self, token: &SecretString, images: &[&str], content: &PostContent) -> Result<String> {
        let mut media_ids = Vec::new();
        for image_url in images {
            if !is_publicly_reachable(image_url) {
                tracing::warn!(image_url, "Skipping non-public image for Facebook album");
                continue;
            }
            let body = json!({ "url": image_url, "published": false });
            match self
                .post_graph(token, &format!("{}/photos", self.page_id), &body)
                .await
                .and_then(|r| extract_id(&r))
            {
                Ok(id) => media_ids.push(id),
                Err(e) => tracing::warn!(image_url, error = %e, "Facebook photo upload failed"),
            }
        }

        if media_ids.is_empty() {
            tracing::warn!("No Facebook album image uploaded, posting text only");
            return self.feed_post(token, content).await;
        }

        let attached: Vec<Value> = media_ids
            .iter()
            .map(|id| json!({ "media_fbid": id }))
            .collect();
        let mut body = json!({ "message": content.text, "attached_media": attached });
        if let Some(link) = content.link.as_deref() {
            body["link"] = json!(link);
        }
        let response = self
            .post_graph(token, &format!("{}/feed", self.page_id), &body)
            .await?;
        extract_id(&response)
    }
}

fn extract_id(response: &Value) -> Result<String> {
    id_field(response, &["/post_id", "/id"])
        .ok_or_else(|| PlatformError::Posting("Facebook returned no post id".to_string()).into())
}

#[async_trait]
impl Platform for FacebookPlatform {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Facebook
    }

    async fn publish(&self, content: &PostContent) -> Result<String> {
        let token = self.token.reveal()?;
        let images = content.images();

        if images.len() > 1 {
            return self.album_post(&token, &images, content).await;
        }

        match content.main_image() {
            Some(image_url) if is_publicly_reachable(image_url) => {
                self.photo_post(&token, image_url, content).await
            }
            Some(image_url) => {
                tracing::warn!(image_url, "Image URL is not publicly reachable, posting to Facebook as text");
                self.feed_post(&token, content).await
            }
            None => self.feed_post(&token, content).await,
        }
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
            .map_err(|e| network_error(PlatformKind::Facebook, e))?;

        if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(UpstreamError::from_response(response)
            .await
            .into_platform_error(PlatformKind::Facebook)
            .into())
    }
}
