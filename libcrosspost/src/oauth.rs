//! OAuth connection flow
//!
//! [`OAuthService::authorization_url`] sends the user to the platform's
//! consent screen with a CSRF state; [`OAuthService::complete`] validates
//! that state on the way back, exchanges the code and stores the account.
//!
//! The state is stateless on our side: base64 JSON of tenant, user,
//! timestamp and a random nonce, valid for ten minutes. Twitter's PKCE
//! verifier is derived from the nonce and the client secret, so the
//! callback can recompute it without server-side storage.

use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::{info, warn};

use crate::accounts::{AccountCredentials, AccountProfile, AccountStore};
use crate::config::{Config, Endpoints, OAuthClientConfig};
use crate::error::{ConfigError, OAuthError, Result};
use crate::platforms::http::UpstreamError;
use crate::scheduler::TokenRefresher;
use crate::types::{Account, PlatformKind};

/// States older than this are rejected
pub const STATE_TTL_MS: i64 = 10 * 60 * 1000;
/// Tolerated clock skew for states stamped slightly in the future
const STATE_SKEW_MS: i64 = 60 * 1000;
/// Page tokens are long-lived; Graph does not report their expiry
const PAGE_TOKEN_LIFETIME_SECS: i64 = 60 * 24 * 60 * 60;

const LINKEDIN_SCOPE: &str = "openid profile email w_member_social";
const FACEBOOK_SCOPE: &str = "pages_show_list,pages_read_engagement,pages_manage_posts,business_management";
const INSTAGRAM_SCOPE: &str = "pages_show_list,pages_read_engagement,pages_manage_posts,business_management,instagram_basic,instagram_content_publish";
const TWITTER_SCOPE: &str = "tweet.read tweet.write users.read offline.access";

/// CSRF state carried through the consent round trip
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthState {
    pub tenant_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    /// Milliseconds since the epoch
    pub timestamp: i64,
    pub nonce: String,
}

impl OAuthState {
    pub fn new(tenant_id: &str, user_id: Option<&str>) -> Self {
        let nonce: [u8; 16] = rand::random();
        Self {
            tenant_id: tenant_id.to_string(),
            user_id: user_id.map(str::to_string),
            timestamp: chrono::Utc::now().timestamp_millis(),
            nonce: nonce.iter().map(|b| format!("{:02x}", b)).collect(),
        }
    }

    pub fn encode(&self) -> String {
        // Serializing a struct of strings and integers cannot fail
        STANDARD.encode(serde_json::to_vec(self).unwrap_or_default())
    }

    /// Decode and check age against `now_ms`
    pub fn validate(raw: &str, now_ms: i64) -> std::result::Result<Self, OAuthError> {
        let bytes = STANDARD
            .decode(raw.trim())
            .map_err(|_| OAuthError::InvalidState)?;
        let state: OAuthState =
            serde_json::from_slice(&bytes).map_err(|_| OAuthError::InvalidState)?;

        if state.tenant_id.is_empty() || state.nonce.is_empty() {
            return Err(OAuthError::InvalidState);
        }
        let age = now_ms - state.timestamp;
        if age > STATE_TTL_MS {
            return Err(OAuthError::ExpiredState);
        }
        if age < -STATE_SKEW_MS {
            return Err(OAuthError::InvalidState);
        }
        Ok(state)
    }
}

/// PKCE verifier for a state nonce: base64url(sha256(secret ":" nonce))
pub fn pkce_verifier(client_secret: &str, nonce: &str) -> String {
    let digest = Sha256::new()
        .chain_update(client_secret.as_bytes())
        .chain_update(b":")
        .chain_update(nonce.as_bytes())
        .finalize();
    URL_SAFE_NO_PAD.encode(digest)
}

/// S256 challenge for a verifier
pub fn pkce_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Accounts stored by a successful callback
#[derive(Debug, Clone)]
pub struct OAuthCompletion {
    pub tenant_id: String,
    pub platform: PlatformKind,
    /// The requested platform first; Facebook may add a linked Instagram
    pub accounts: Vec<Account>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl TokenResponse {
    fn into_credentials(self) -> AccountCredentials {
        AccountCredentials {
            access_token: SecretString::from(self.access_token),
            refresh_token: self.refresh_token.map(SecretString::from),
            expires_at: self
                .expires_in
                .map(|secs| chrono::Utc::now().timestamp() + secs),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GraphPage {
    id: String,
    name: String,
    access_token: String,
    #[serde(default)]
    instagram_business_account: Option<GraphId>,
}

#[derive(Debug, Deserialize)]
struct GraphId {
    id: String,
}

pub struct OAuthService {
    http: Client,
    endpoints: Endpoints,
    clients: HashMap<PlatformKind, OAuthClientConfig>,
    accounts: AccountStore,
}

impl OAuthService {
    pub fn new(http: Client, config: &Config, accounts: AccountStore) -> Self {
        let clients = PlatformKind::ALL
            .into_iter()
            .filter_map(|kind| config.oauth_client(kind).map(|client| (kind, client)))
            .collect();
        Self {
            http,
            endpoints: config.endpoints.clone(),
            clients,
            accounts,
        }
    }

    fn client(&self, platform: PlatformKind) -> std::result::Result<&OAuthClientConfig, OAuthError> {
        self.clients
            .get(&platform)
            .ok_or_else(|| OAuthError::NotConfigured(platform.to_string()))
    }

    fn redirect_uri(client: &OAuthClientConfig) -> &str {
        client.redirect_uri.as_deref().unwrap_or_default()
    }

    /// Consent screen URL for `platform` with a fresh state
    pub fn authorization_url(&self, platform: PlatformKind, tenant_id: &str, user_id: Option<&str>) -> Result<String> {
        let client = self.client(platform)?;
        let state = OAuthState::new(tenant_id, user_id);

        let (base, scope) = match platform {
            PlatformKind::Linkedin => (&self.endpoints.linkedin_authorize_url, LINKEDIN_SCOPE),
            PlatformKind::Facebook => (&self.endpoints.facebook_authorize_url, FACEBOOK_SCOPE),
            PlatformKind::Instagram => (&self.endpoints.facebook_authorize_url, INSTAGRAM_SCOPE),
            PlatformKind::Twitter => (&self.endpoints.twitter_authorize_url, TWITTER_SCOPE),
        };

        let mut params = vec![
            ("response_type", "code".to_string()),
            ("client_id", client.client_id.clone()),
            ("redirect_uri", Self::redirect_uri(client).to_string()),
            ("scope", scope.to_string()),
            ("state", state.encode()),
        ];
        if platform == PlatformKind::Twitter {
            let verifier = pkce_verifier(&client.client_secret, &state.nonce);
            params.push(("code_challenge", pkce_challenge(&verifier)));
            params.push(("code_challenge_method", "S256".to_string()));
        }

        let url = url::Url::parse_with_params(base, &params)
            .map_err(|e| ConfigError::Invalid(format!("{} authorize URL: {}", platform, e)))?;
        info!(%platform, tenant_id, "Starting OAuth flow");
        Ok(url.into())
    }

    /// Validate the state, exchange `code` and store the resulting account(s)
    pub async fn complete(&self, platform: PlatformKind, code: &str, raw_state: &str) -> Result<OAuthCompletion> {
        let state = OAuthState::validate(raw_state, chrono::Utc::now().timestamp_millis())?;
        let client = self.client(platform)?;
        let connected_by = state.user_id.as_deref();

        let accounts = match platform {
            PlatformKind::Linkedin => {
                vec![self.connect_linkedin(client, &state, code, connected_by).await?]
            }
            PlatformKind::Facebook => self.connect_facebook(client, &state, code, connected_by).await?,
            PlatformKind::Instagram => {
                vec![self.connect_instagram(client, &state, code, connected_by).await?]
            }
            PlatformKind::Twitter => {
                vec![self.connect_twitter(client, &state, code, connected_by).await?]
            }
        };

        info!(%platform, tenant_id = %state.tenant_id, count = accounts.len(), "OAuth connection stored");
        Ok(OAuthCompletion {
            tenant_id: state.tenant_id,
            platform,
            accounts,
        })
    }

    async fn connect_linkedin(
        &self,
        client: &OAuthClientConfig,
        state: &OAuthState,
        code: &str,
        connected_by: Option<&str>,
    ) -> Result<Account> {
        let request = self.http.post(&self.endpoints.linkedin_token_url).form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", client.client_id.as_str()),
            ("client_secret", client.client_secret.as_str()),
            ("redirect_uri", Self::redirect_uri(client)),
        ]);
        let tokens = token_request(request).await?;

        let profile = profile_request(
            self.http
                .get(format!("{}/v2/userinfo", self.endpoints.linkedin_api))
                .bearer_auth(&tokens.access_token),
        )
        .await?;
        let member_id = profile
            .get("sub")
            .and_then(Value::as_str)
            .ok_or_else(|| OAuthError::Profile("LinkedIn profile has no member id".to_string()))?;
        let name = profile
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("LinkedIn User");

        let profile = AccountProfile {
            platform_user_id: Some(member_id.to_string()),
            platform_user_name: Some(name.to_string()),
            page_id: None,
            page_name: None,
        };
        self.accounts
            .upsert_account(
                &state.tenant_id,
                PlatformKind::Linkedin,
                tokens.into_credentials(),
                profile,
                connected_by,
            )
            .await
    }

    async fn exchange_graph_code(&self, client: &OAuthClientConfig, code: &str) -> Result<SecretString> {
        let request = self
            .http
            .get(format!("{}/oauth/access_token", self.endpoints.graph_api))
            .query(&[
                ("client_id", client.client_id.as_str()),
                ("client_secret", client.client_secret.as_str()),
                ("redirect_uri", Self::redirect_uri(client)),
                ("code", code),
            ]);
        let tokens = token_request(request).await?;
        Ok(SecretString::from(tokens.access_token))
    }

    async fn graph_pages(&self, user_token: &SecretString) -> Result<Vec<GraphPage>> {
        let body = profile_request(
            self.http
                .get(format!("{}/me/accounts", self.endpoints.graph_api))
                .query(&[
                    ("access_token", user_token.expose_secret()),
                    ("fields", "name,access_token,id,instagram_business_account"),
                ]),
        )
        .await?;

        let pages = body.get("data").cloned().unwrap_or(Value::Array(Vec::new()));
        serde_json::from_value(pages)
            .map_err(|e| OAuthError::Profile(format!("Unreadable page list: {}", e)).into())
    }

    fn page_credentials(page: &GraphPage) -> AccountCredentials {
        AccountCredentials {
            access_token: SecretString::from(page.access_token.clone()),
            refresh_token: None,
            expires_at: Some(chrono::Utc::now().timestamp() + PAGE_TOKEN_LIFETIME_SECS),
        }
    }

    async fn upsert_instagram(
        &self,
        tenant_id: &str,
        page: &GraphPage,
        ig_user_id: &str,
        connected_by: Option<&str>,
    ) -> Result<Account> {
        let profile = AccountProfile {
            platform_user_id: Some(ig_user_id.to_string()),
            platform_user_name: Some(format!("{} (Instagram)", page.name)),
            page_id: Some(page.id.clone()),
            page_name: Some(page.name.clone()),
        };
        self.accounts
            .upsert_account(
                tenant_id,
                PlatformKind::Instagram,
                Self::page_credentials(page),
                profile,
                connected_by,
            )
            .await
    }

    /// Stores the first page; also stores its linked Instagram account
    async fn connect_facebook(
        &self,
        client: &OAuthClientConfig,
        state: &OAuthState,
        code: &str,
        connected_by: Option<&str>,
    ) -> Result<Vec<Account>> {
        let user_token = self.exchange_graph_code(client, code).await?;
        let pages = self.graph_pages(&user_token).await?;
        let page = pages.first().ok_or_else(|| {
            OAuthError::NoPages(
                "No Facebook Pages found. Make sure you granted \"Pages\" access.".to_string(),
            )
        })?;

        let profile = AccountProfile {
            platform_user_id: Some(page.id.clone()),
            platform_user_name: Some(page.name.clone()),
            page_id: Some(page.id.clone()),
            page_name: Some(page.name.clone()),
        };
        let facebook = self
            .accounts
            .upsert_account(
                &state.tenant_id,
                PlatformKind::Facebook,
                Self::page_credentials(page),
                profile,
                connected_by,
            )
            .await?;
        let mut stored = vec![facebook];

        if let Some(ig) = &page.instagram_business_account {
            info!(page_id = %page.id, "Page has a linked Instagram business account");
            stored.push(
                self.upsert_instagram(&state.tenant_id, page, &ig.id, connected_by)
                    .await?,
            );
        }
        Ok(stored)
    }

    /// Stores the first page that has a linked Instagram business account
    async fn connect_instagram(
        &self,
        client: &OAuthClientConfig,
        state: &OAuthState,
        code: &str,
        connected_by: Option<&str>,
    ) -> Result<Account> {
        let user_token = self.exchange_graph_code(client, code).await?;
        let pages = self.graph_pages(&user_token).await?;
        if pages.is_empty() {
            return Err(OAuthError::NoPages(
                "No Facebook Pages found. You need a Page to connect Instagram.".to_string(),
            )
            .into());
        }

        let (page, ig) = pages
            .iter()
            .find_map(|page| page.instagram_business_account.as_ref().map(|ig| (page, ig)))
            .ok_or_else(|| {
                OAuthError::NoPages(
                    "No Instagram Business Account found linked to your Facebook Pages."
                        .to_string(),
                )
            })?;

        self.upsert_instagram(&state.tenant_id, page, &ig.id, connected_by)
            .await
    }

    async fn connect_twitter(
        &self,
        client: &OAuthClientConfig,
        state: &OAuthState,
        code: &str,
        connected_by: Option<&str>,
    ) -> Result<Account> {
        let verifier = pkce_verifier(&client.client_secret, &state.nonce);
        let request = self
            .http
            .post(format!("{}/2/oauth2/token", self.endpoints.twitter_api))
            .basic_auth(&client.client_id, Some(&client.client_secret))
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", Self::redirect_uri(client)),
                ("code_verifier", verifier.as_str()),
                ("client_id", client.client_id.as_str()),
            ]);
        let tokens = token_request(request).await?;

        let me = profile_request(
            self.http
                .get(format!("{}/2/users/me", self.endpoints.twitter_api))
                .bearer_auth(&tokens.access_token),
        )
        .await?;
        let user_id = me
            .pointer("/data/id")
            .and_then(Value::as_str)
            .ok_or_else(|| OAuthError::Profile("Twitter profile has no user id".to_string()))?;
        let name = me
            .pointer("/data/username")
            .or_else(|| me.pointer("/data/name"))
            .and_then(Value::as_str)
            .unwrap_or("Twitter User");

        let profile = AccountProfile {
            platform_user_id: Some(user_id.to_string()),
            platform_user_name: Some(name.to_string()),
            page_id: None,
            page_name: None,
        };
        self.accounts
            .upsert_account(
                &state.tenant_id,
                PlatformKind::Twitter,
                tokens.into_credentials(),
                profile,
                connected_by,
            )
            .await
    }
}

#[async_trait]
impl TokenRefresher for OAuthService {
    async fn refresh(&self, account: &Account) -> Result<Account> {
        let sealed = account.refresh_token.as_deref().ok_or_else(|| {
            OAuthError::TokenExchange(format!("{} account has no refresh token", account.platform))
        })?;
        let refresh_token = self.accounts.cipher().decrypt(sealed)?;
        let client = self.client(account.platform)?;

        let request = match account.platform {
            PlatformKind::Linkedin => self.http.post(&self.endpoints.linkedin_token_url).form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.expose_secret()),
                ("client_id", client.client_id.as_str()),
                ("client_secret", client.client_secret.as_str()),
            ]),
            PlatformKind::Twitter => self
                .http
                .post(format!("{}/2/oauth2/token", self.endpoints.twitter_api))
                .basic_auth(&client.client_id, Some(&client.client_secret))
                .form(&[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh_token.expose_secret()),
                    ("client_id", client.client_id.as_str()),
                ]),
            PlatformKind::Facebook | PlatformKind::Instagram => {
                return Err(OAuthError::TokenExchange(
                    "Page tokens cannot be refreshed; reconnect the account".to_string(),
                )
                .into())
            }
        };

        let tokens = token_request(request).await?;
        let credentials = AccountCredentials {
            access_token: SecretString::from(tokens.access_token),
            // Keep the old refresh token when the platform doesn't rotate it
            refresh_token: Some(
                tokens
                    .refresh_token
                    .map(SecretString::from)
                    .unwrap_or(refresh_token),
            ),
            expires_at: tokens
                .expires_in
                .map(|secs| chrono::Utc::now().timestamp() + secs),
        };
        let profile = AccountProfile {
            platform_user_id: account.platform_user_id.clone(),
            platform_user_name: account.platform_user_name.clone(),
            page_id: account.page_id.clone(),
            page_name: account.page_name.clone(),
        };

        self.accounts
            .upsert_account(
                &account.tenant_id,
                account.platform,
                credentials,
                profile,
                account.connected_by.as_deref(),
            )
            .await
    }
}

async fn token_request(request: reqwest::RequestBuilder) -> Result<TokenResponse> {
    let response = request
        .send()
        .await
        .map_err(|e| OAuthError::TokenExchange(e.without_url().to_string()))?;
    if !response.status().is_success() {
        let failure = UpstreamError::from_response(response).await;
        warn!(status = failure.status, message = %failure.message, "Token exchange rejected");
        return Err(OAuthError::TokenExchange(failure.message).into());
    }
    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| {
            OAuthError::TokenExchange(format!("Unreadable token response: {}", e.without_url()))
                .into()
        })
}

async fn profile_request(request: reqwest::RequestBuilder) -> Result<Value> {
    let response = request
        .send()
        .await
        .map_err(|e| OAuthError::Profile(e.without_url().to_string()))?;
    if !response.status().is_success() {
        let failure = UpstreamError::from_response(response).await;
        return Err(OAuthError::Profile(failure.message).into());
    }
    response
        .json::<Value>()
        .await
        .map_err(|e| {
            OAuthError::Profile(format!("Unreadable profile response: {}", e.without_url())).into()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trip() {
        let state = OAuthState::new("acme", Some("u-1"));
        let now = state.timestamp + 1_000;
        let decoded = OAuthState::validate(&state.encode(), now).unwrap();
        assert_eq!(decoded, state);
        assert_eq!(decoded.nonce.len(), 32);
    }

    #[test]
    fn test_state_older_than_ten_minutes_rejected() {
        let state = OAuthState::new("acme", None);
        let raw = state.encode();

        assert!(OAuthState::validate(&raw, state.timestamp + STATE_TTL_MS).is_ok());
        assert!(matches!(
            OAuthState::validate(&raw, state.timestamp + STATE_TTL_MS + 1),
            Err(OAuthError::ExpiredState)
        ));
    }

    #[test]
    fn test_malformed_state_rejected() {
        let now = chrono::Utc::now().timestamp_millis();
        assert!(matches!(
            OAuthState::validate("not base64!!", now),
            Err(OAuthError::InvalidState)
        ));
        let not_json = STANDARD.encode("hello");
        assert!(matches!(
            OAuthState::validate(&not_json, now),
            Err(OAuthError::InvalidState)
        ));
        let missing_tenant = STANDARD.encode(r#"{"tenantId":"","timestamp":1,"nonce":"ab"}"#);
        assert!(matches!(
            OAuthState::validate(&missing_tenant, now),
            Err(OAuthError::InvalidState)
        ));
    }

    #[test]
    fn test_state_wire_format() {
        let state = OAuthState {
            tenant_id: "acme".to_string(),
            user_id: Some("u-1".to_string()),
            timestamp: 1_700_000_000_000,
            nonce: "00ff".to_string(),
        };
        let json: Value = serde_json::from_slice(&STANDARD.decode(state.encode()).unwrap()).unwrap();
        assert_eq!(json["tenantId"], "acme");
        assert_eq!(json["userId"], "u-1");
        assert_eq!(json["timestamp"], 1_700_000_000_000i64);
    }

    #[test]
    fn test_pkce_is_deterministic_and_url_safe() {
        let verifier = pkce_verifier("secret", "nonce");
        assert_eq!(verifier, pkce_verifier("secret", "nonce"));
        assert_ne!(verifier, pkce_verifier("secret", "other"));
        assert_eq!(verifier.len(), 43);

        let challenge = pkce_challenge(&verifier);
        assert!(!challenge.contains('+') && !challenge.contains('/') && !challenge.contains('='));
    }
}
