//! Twitter (X) platform implementation
//!
//! Text-only tweets through the v2 API with a 280 character ceiling.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde_json::json;

use super::http::{id_field, json_body, network_error};
use super::Platform;
use crate::credentials::SealedToken;
use crate::error::{PlatformError, Result};
use crate::types::{PlatformKind, PostContent};

pub const TWEET_LIMIT: usize = 280;

pub struct TwitterPlatform {
    http: Client,
    api_base: String,
    token: SealedToken,
}

impl TwitterPlatform {
    pub fn new(http: Client, api_base: &str, token: SealedToken) -> Self {
        Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
        }
    }
}

#[async_trait]
impl Platform for TwitterPlatform {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Twitter
    }

    fn character_limit(&self) -> Option<usize> {
        Some(TWEET_LIMIT)
    }

    fn validate_content(&self, content: &PostContent) -> Result<()> {
        if content.text.trim().is_empty() {
            return Err(PlatformError::Validation("Tweet text cannot be empty".to_string()).into());
        }
        let length = content.text.chars().count();
        if length > TWEET_LIMIT {
            return Err(PlatformError::Validation(format!(
                "Tweet exceeds {} character limit ({} characters)",
                TWEET_LIMIT, length
            ))
            .into());
        }
        Ok(())
    }

    async fn publish(&self, content: &PostContent) -> Result<String> {
        let token = self.token.reveal()?;
        let response = self
            .http
            .post(format!("{}/2/tweets", self.api_base))
            .bearer_auth(token.expose_secret())
            .json(&json!({ "text": content.text }))
            .send()
            .await
            .map_err(|e| network_error(PlatformKind::Twitter, e))?;

        let body = json_body(PlatformKind::Twitter, response).await?;
        id_field(&body, &["/data/id"])
            .ok_or_else(|| PlatformError::Posting("Twitter returned no tweet id".to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::TokenCipher;

    fn platform() -> TwitterPlatform {
        let cipher = TokenCipher::generate();
        let token = SealedToken::new(cipher.encrypt("bearer").unwrap(), cipher);
        // Unroutable base; validation must fail before any request
        TwitterPlatform::new(Client::new(), "http://127.0.0.1:9", token)
    }

    #[test]
    fn test_length_ceiling() {
        let platform = platform();
        assert!(platform
            .validate_content(&PostContent::text("a".repeat(280)))
            .is_ok());
        let err = platform
            .validate_content(&PostContent::text("a".repeat(281)))
            .unwrap_err();
        assert!(err.to_string().contains("280 character limit (281 characters)"));
    }

    #[test]
    fn test_length_counts_characters_not_bytes() {
        let platform = platform();
        assert!(platform
            .validate_content(&PostContent::text("é".repeat(280)))
            .is_ok());
    }

    #[tokio::test]
    async fn test_overlong_tweet_fails_without_network() {
        let outcome = platform()
            .create_post(&PostContent::text("b".repeat(300)))
            .await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("Tweet exceeds 280"));
    }

    #[test]
    fn test_no_delete_capability() {
        assert!(!platform().supports_delete());
    }
}
