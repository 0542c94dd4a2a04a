//! LinkedIn platform implementation
//!
//! Posts go through the UGC Posts API. Each image takes three calls:
//! register an upload to obtain an asset URN and upload URL, fetch the
//! source image bytes, then PUT the bytes to the upload URL. The share is
//! then created once, referencing the uploaded assets (or the link as an
//! article when there are no images).
//!
//! Deletion URL-encodes the share URN. Legacy `urn:li:share:` ids that the
//! UGC endpoint refuses are retried against `/v2/shares/`.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};

use super::http::{id_field, json_body, network_error, UpstreamError};
use super::Platform;
use crate::credentials::SealedToken;
use crate::error::{PlatformError, Result};
use crate::types::{Account, PlatformKind, PostContent};

const RESTLI_VERSION: &str = "2.0.0";
const UPLOAD_MECHANISM: &str = "com.linkedin.digitalmedia.uploading.MediaUploadHttpRequest";
const LEGACY_SHARE_PREFIX: &str = "urn:li:share:";

pub struct LinkedInPlatform {
    http: Client,
    api_base: String,
    token: SealedToken,
    author: String,
}

impl LinkedInPlatform {
    pub fn new(http: Client, api_base: &str, token: SealedToken, account: &Account) -> Result<Self> {
        let author = match (&account.page_id, &account.platform_user_id) {
            (Some(org), _) if org.starts_with("urn:li:") => org.clone(),
            (_, Some(member)) if member.starts_with("urn:li:") => member.clone(),
            (_, Some(member)) => format!("urn:li:person:{}", member),
            (Some(org), None) => format!("urn:li:organization:{}", org),
            (None, None) => {
                return Err(PlatformError::Authentication(
                    "LinkedIn account has no member id; reconnect the account".to_string(),
                )
                .into())
            }
        };

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
            author,
        })
    }

    fn api(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    /// register upload -> fetch bytes -> push bytes; returns the asset URN
    async fn upload_image(&self, token: &SecretString, image_url: &str) -> Result<String> {
        let register = json!({
            "registerUploadRequest": {
                "recipes": ["urn:li:digitalmediaRecipe:feedshare-image"],
                "owner": self.author,
                "serviceRelationships": [{
                    "relationshipType": "OWNER",
                    "identifier": "urn:li:userGeneratedContent"
                }]
            }
        });

        let response = self
            .http
            .post(self.api("/v2/assets?action=registerUpload"))
            .bearer_auth(token.expose_secret())
            .header("X-Restli-Protocol-Version", RESTLI_VERSION)
            .json(&register)
            .send()
            .await
            .map_err(|e| network_error(PlatformKind::Linkedin, e))?;
        let body = json_body(PlatformKind::Linkedin, response).await?;

        let upload_url = body
            .pointer(&format!("/value/uploadMechanism/{}/uploadUrl", UPLOAD_MECHANISM))
            .and_then(Value::as_str)
            .ok_or_else(|| PlatformError::Posting("LinkedIn upload registration returned no upload URL".to_string()))?
            .to_string();
        let asset = id_field(&body, &["/value/asset"]).ok_or_else(|| {
            PlatformError::Posting("LinkedIn upload registration returned no asset".to_string())
        })?;

        let source = self
            .http
            .get(image_url)
            .send()
            .await
            .map_err(|e| network_error(PlatformKind::Linkedin, e))?;
        if !source.status().is_success() {
            return Err(PlatformError::Posting(format!(
                "Could not fetch image {} ({})",
                image_url,
                source.status()
            ))
            .into());
        }
        let content_type = source
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/jpeg")
            .to_string();
        let bytes = source
            .bytes()
            .await
            .map_err(|e| network_error(PlatformKind::Linkedin, e))?;

        let pushed = self
            .http
            .put(&upload_url)
            .bearer_auth(token.expose_secret())
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| network_error(PlatformKind::Linkedin, e))?;
        if !pushed.status().is_success() {
            return Err(UpstreamError::from_response(pushed)
                .await
                .into_platform_error(PlatformKind::Linkedin)
                .into());
        }

        Ok(asset)
    }

    async fn delete_at(&self, token: &SecretString, path: &str) -> Result<()> {
        let response = self
            .http
            .delete(self.api(path))
            .bearer_auth(token.expose_secret())
            .header("X-Restli-Protocol-Version", RESTLI_VERSION)
            .send()
            .await
            .map_err(|e| network_error(PlatformKind::Linkedin, e))?;

        if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(UpstreamError::from_response(response)
            .await
            .into_platform_error(PlatformKind::Linkedin)
            .into())
    }
}

#[async_trait]
impl Platform for LinkedInPlatform {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Linkedin
    }

    fn character_limit(&self) -> Option<usize> {
        Some(3000)
    }

    async fn publish(&self, content: &PostContent) -> Result<String> {
        let token = self.token.reveal()?;

        let mut media = Vec::new();
        for image_url in content.images() {
            match self.upload_image(&token, image_url).await {
                Ok(asset) => media.push(json!({
                    "status": "READY",
                    "media": asset,
                    "title": { "text": "Image" }
                })),
                Err(e) => tracing::warn!(image_url, error = %e, "Skipping LinkedIn image upload"),
            }
        }

        let category = if !media.is_empty() {
            "IMAGE"
        } else if let Some(link) = content.link.as_deref() {
            media.push(json!({ "status": "READY", "originalUrl": link }));
            "ARTICLE"
        } else {
            "NONE"
        };

        let mut share = json!({
            "shareCommentary": { "text": content.text },
            "shareMediaCategory": category
        });
        if !media.is_empty() {
            share["media"] = Value::Array(media);
        }

        let payload = json!({
            "author": self.author,
            "lifecycleState": "PUBLISHED",
            "specificContent": { "com.linkedin.ugc.ShareContent": share },
            "visibility": { "com.linkedin.ugc.MemberNetworkVisibility": "PUBLIC" }
        });

        let response = self
            .http
            .post(self.api("/v2/ugcPosts"))
            .bearer_auth(token.expose_secret())
            .header("X-Restli-Protocol-Version", RESTLI_VERSION)
            .json(&payload)
            .send()
            .await
            .map_err(|e| network_error(PlatformKind::Linkedin, e))?;

        let header_id = response
            .headers()
            .get("x-restli-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if !response.status().is_success() {
            return Err(UpstreamError::from_response(response)
                .await
                .into_platform_error(PlatformKind::Linkedin)
                .into());
        }
        // The id may come only in the header, with an empty body
        let text = response
            .text()
            .await
            .map_err(|e| network_error(PlatformKind::Linkedin, e))?;
        let body: Value = serde_json::from_str(&text).unwrap_or(Value::Null);

        id_field(&body, &["/id"])
            .or(header_id)
            .ok_or_else(|| PlatformError::Posting("LinkedIn returned no post id".to_string()).into())
    }

    fn supports_delete(&self) -> bool {
        true
    }

    async fn remove(&self, native_id: &str) -> Result<()> {
        let token = self.token.reveal()?;

        // Ids may arrive already encoded; normalize before encoding once
        let decoded = urlencoding::decode(native_id)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| native_id.to_string());
        let encoded = urlencoding::encode(&decoded);

        let primary = self
            .delete_at(&token, &format!("/v2/ugcPosts/{}", encoded))
            .await;
        match primary {
            Ok(()) => Ok(()),
            Err(e) if decoded.starts_with(LEGACY_SHARE_PREFIX) => {
                tracing::debug!(native_id, error = %e, "Retrying LinkedIn delete via legacy shares endpoint");
                self.delete_at(&token, &format!("/v2/shares/{}", encoded))
                    .await
                    .map_err(|_| e)
            }
            Err(e) => Err(e),
        }
    }
}
