//! OAuth connection and token refresh against a local stand-in provider

mod common;

use base64::Engine as _;
use common::{closed_base, Reply, Stub};
use libcrosspost::config::{Endpoints, OAuthClientConfig};
use libcrosspost::error::OAuthError;
use libcrosspost::oauth::{pkce_challenge, pkce_verifier};
use libcrosspost::{
    AccountStatus, AccountStore, Config, CrosspostError, Database, OAuthService, OAuthState,
    PlatformKind, TokenCipher, TokenRefresher,
};
use secrecy::ExposeSecret;
use serde_json::json;
use tempfile::TempDir;

fn client(id: &str, secret: &str, platform: &str) -> Option<OAuthClientConfig> {
    Some(OAuthClientConfig {
        client_id: id.to_string(),
        client_secret: secret.to_string(),
        redirect_uri: Some(format!("https://api.example.com/oauth/{}/callback", platform)),
    })
}

async fn oauth(stub: &Stub) -> (OAuthService, AccountStore, TempDir) {
    oauth_at(&stub.base).await
}

async fn oauth_at(base: &str) -> (OAuthService, AccountStore, TempDir) {
    let temp = TempDir::new().unwrap();
    let db = Database::new(temp.path().join("oauth.db").to_str().unwrap())
        .await
        .unwrap();
    let accounts = AccountStore::new(db, TokenCipher::generate());

    let mut config = Config::default();
    config.endpoints = Endpoints::all_at(base);
    config.linkedin = client("li-client", "li-secret", "linkedin");
    config.facebook = client("fb-app", "fb-secret", "facebook");
    config.twitter = client("tw-client", "tw-secret", "twitter");

    let service = OAuthService::new(reqwest::Client::new(), &config, accounts.clone());
    (service, accounts, temp)
}

fn fresh_state(user: Option<&str>) -> (OAuthState, String) {
    let state = OAuthState::new("acme", user);
    let raw = state.encode();
    (state, raw)
}

#[tokio::test]
async fn test_linkedin_code_exchange_stores_member() {
    let stub = Stub::start(|_| {
        |req: &common::Recorded| {
            if req.is("POST", "/oauth/v2/accessToken") {
                Reply::ok(json!({
                    "access_token": "li-access",
                    "refresh_token": "li-refresh",
                    "expires_in": 5184000
                }))
            } else if req.is("GET", "/v2/userinfo") {
                Reply::ok(json!({ "sub": "member-9", "name": "Dana Recruiter" }))
            } else {
                Reply::empty(404)
            }
        }
    })
    .await;
    let (service, accounts, _temp) = oauth(&stub).await;
    let (_, raw) = fresh_state(Some("u-7"));

    let completion = service
        .complete(PlatformKind::Linkedin, "auth-code", &raw)
        .await
        .unwrap();

    assert_eq!(completion.tenant_id, "acme");
    assert_eq!(completion.accounts.len(), 1);
    let form = stub.calls_to("POST", "/oauth/v2/accessToken")[0].form();
    assert_eq!(form["grant_type"], "authorization_code");
    assert_eq!(form["code"], "auth-code");
    assert_eq!(form["client_secret"], "li-secret");
    assert_eq!(form["redirect_uri"], "https://api.example.com/oauth/linkedin/callback");
    assert_eq!(
        stub.calls_to("GET", "/v2/userinfo")[0].authorization.as_deref(),
        Some("Bearer li-access")
    );

    let stored = accounts.list_accounts("acme").await.unwrap();
    assert_eq!(stored.len(), 1);
    let account = &stored[0];
    assert_eq!(account.platform, PlatformKind::Linkedin);
    assert_eq!(account.platform_user_id.as_deref(), Some("member-9"));
    assert_eq!(account.platform_user_name.as_deref(), Some("Dana Recruiter"));
    assert_eq!(account.connected_by.as_deref(), Some("u-7"));
    assert_eq!(account.status, AccountStatus::Connected);
    assert!(account.expires_at.is_some());
    assert_ne!(account.access_token, "li-access");
    assert_eq!(
        accounts
            .cipher()
            .decrypt(&account.access_token)
            .unwrap()
            .expose_secret(),
        "li-access"
    );
}

fn graph_stub(pages: serde_json::Value) -> impl Fn(&common::Recorded) -> Reply + Send + Sync + 'static {
    move |req: &common::Recorded| {
        if req.is("GET", "/oauth/access_token") {
            Reply::ok(json!({ "access_token": "user-token", "token_type": "bearer" }))
        } else if req.is("GET", "/me/accounts") {
            Reply::ok(json!({ "data": pages.clone() }))
        } else {
            Reply::empty(404)
        }
    }
}

#[tokio::test]
async fn test_facebook_connect_stores_page_and_linked_instagram() {
    let stub = Stub::start(|_| {
        graph_stub(json!([
            {
                "id": "page-1",
                "name": "Acme Careers",
                "access_token": "page-token",
                "instagram_business_account": { "id": "ig-1" }
            },
            { "id": "page-2", "name": "Acme Events", "access_token": "other-token" }
        ]))
    })
    .await;
    let (service, accounts, _temp) = oauth(&stub).await;
    let (_, raw) = fresh_state(None);

    let completion = service
        .complete(PlatformKind::Facebook, "fb-code", &raw)
        .await
        .unwrap();

    let platforms: Vec<PlatformKind> = completion.accounts.iter().map(|a| a.platform).collect();
    assert_eq!(platforms, vec![PlatformKind::Facebook, PlatformKind::Instagram]);

    let exchange = stub.calls_to("GET", "/oauth/access_token")[0].query_pairs();
    assert_eq!(exchange["client_id"], "fb-app");
    assert_eq!(exchange["code"], "fb-code");
    assert_eq!(
        stub.calls_to("GET", "/me/accounts")[0].query_pairs()["access_token"],
        "user-token"
    );

    let facebook = accounts
        .find_active("acme", &[PlatformKind::Facebook])
        .await
        .unwrap()
        .remove(0);
    assert_eq!(facebook.page_id.as_deref(), Some("page-1"));
    assert_eq!(facebook.page_name.as_deref(), Some("Acme Careers"));
    assert_eq!(
        accounts
            .cipher()
            .decrypt(&facebook.access_token)
            .unwrap()
            .expose_secret(),
        "page-token"
    );

    let instagram = accounts
        .find_active("acme", &[PlatformKind::Instagram])
        .await
        .unwrap()
        .remove(0);
    assert_eq!(instagram.platform_user_id.as_deref(), Some("ig-1"));
    assert_eq!(instagram.page_id.as_deref(), Some("page-1"));
}

#[tokio::test]
async fn test_instagram_connect_picks_first_linked_page() {
    let stub = Stub::start(|_| {
        graph_stub(json!([
            { "id": "page-1", "name": "No IG", "access_token": "t1" },
            {
                "id": "page-2",
                "name": "Acme Studio",
                "access_token": "t2",
                "instagram_business_account": { "id": "ig-2" }
            }
        ]))
    })
    .await;
    let (service, accounts, _temp) = oauth(&stub).await;
    let (_, raw) = fresh_state(None);

    // Falls back to the Facebook app credentials
    let completion = service
        .complete(PlatformKind::Instagram, "ig-code", &raw)
        .await
        .unwrap();

    assert_eq!(completion.accounts.len(), 1);
    assert_eq!(
        stub.calls_to("GET", "/oauth/access_token")[0].query_pairs()["client_id"],
        "fb-app"
    );
    let stored = accounts.list_accounts("acme").await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].platform, PlatformKind::Instagram);
    assert_eq!(stored[0].platform_user_id.as_deref(), Some("ig-2"));
    assert_eq!(stored[0].page_id.as_deref(), Some("page-2"));
}

#[tokio::test]
async fn test_graph_connect_without_pages() {
    let stub = Stub::start(|_| graph_stub(json!([]))).await;
    let (service, accounts, _temp) = oauth(&stub).await;

    let err = service
        .complete(PlatformKind::Facebook, "fb-code", &fresh_state(None).1)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("No Facebook Pages found"));

    let err = service
        .complete(PlatformKind::Instagram, "ig-code", &fresh_state(None).1)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("You need a Page to connect Instagram"));
    assert!(accounts.list_accounts("acme").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_twitter_exchange_sends_derived_verifier() {
    let stub = Stub::start(|_| {
        |req: &common::Recorded| {
            if req.is("POST", "/2/oauth2/token") {
                Reply::ok(json!({
                    "access_token": "tw-access",
                    "refresh_token": "tw-refresh",
                    "expires_in": 7200
                }))
            } else if req.is("GET", "/2/users/me") {
                Reply::ok(json!({ "data": { "id": "42", "name": "Acme", "username": "acmejobs" } }))
            } else {
                Reply::empty(404)
            }
        }
    })
    .await;
    let (service, accounts, _temp) = oauth(&stub).await;

    let authorize = service
        .authorization_url(PlatformKind::Twitter, "acme", Some("u-1"))
        .unwrap();
    let url = url::Url::parse(&authorize).unwrap();
    let params: std::collections::HashMap<String, String> = url.query_pairs().into_owned().collect();
    assert_eq!(params["code_challenge_method"], "S256");
    let state = OAuthState::validate(&params["state"], chrono::Utc::now().timestamp_millis()).unwrap();
    let verifier = pkce_verifier("tw-secret", &state.nonce);
    assert_eq!(params["code_challenge"], pkce_challenge(&verifier));

    service
        .complete(PlatformKind::Twitter, "tw-code", &params["state"])
        .await
        .unwrap();

    let token_call = &stub.calls_to("POST", "/2/oauth2/token")[0];
    assert_eq!(token_call.form()["code_verifier"], verifier);
    let basic = base64::engine::general_purpose::STANDARD.encode("tw-client:tw-secret");
    assert_eq!(
        token_call.authorization.as_deref(),
        Some(format!("Basic {}", basic).as_str())
    );

    let stored = accounts.list_accounts("acme").await.unwrap();
    assert_eq!(stored[0].platform_user_id.as_deref(), Some("42"));
    assert_eq!(stored[0].platform_user_name.as_deref(), Some("acmejobs"));
    assert!(stored[0].refresh_token.is_some());
}

#[tokio::test]
async fn test_bad_state_never_reaches_provider() {
    let stub = Stub::start(|_| |_: &common::Recorded| Reply::empty(500)).await;
    let (service, accounts, _temp) = oauth(&stub).await;

    let err = service
        .complete(PlatformKind::Linkedin, "code", "not-a-state")
        .await
        .unwrap_err();
    assert!(matches!(err, CrosspostError::OAuth(OAuthError::InvalidState)));

    let mut stale = OAuthState::new("acme", None);
    stale.timestamp -= 11 * 60 * 1000;
    let err = service
        .complete(PlatformKind::Linkedin, "code", &stale.encode())
        .await
        .unwrap_err();
    assert!(matches!(err, CrosspostError::OAuth(OAuthError::ExpiredState)));

    assert!(stub.calls().is_empty());
    assert!(accounts.list_accounts("acme").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rejected_code_is_a_token_exchange_error() {
    let stub = Stub::start(|_| {
        |_: &common::Recorded| {
            Reply::json(
                400,
                json!({ "error": "invalid_grant", "error_description": "Authorization code expired" }),
            )
        }
    })
    .await;
    let (service, _accounts, _temp) = oauth(&stub).await;

    let err = service
        .complete(PlatformKind::Linkedin, "old-code", &fresh_state(None).1)
        .await
        .unwrap_err();
    match err {
        CrosspostError::OAuth(OAuthError::TokenExchange(message)) => {
            assert_eq!(message, "Authorization code expired")
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_unreachable_graph_exchange_hides_client_secret() {
    let (service, accounts, _temp) = oauth_at(&closed_base()).await;

    let err = service
        .complete(PlatformKind::Facebook, "fb-code-123", &fresh_state(None).1)
        .await
        .unwrap_err();
    let message = err.to_string();
    assert!(matches!(
        err,
        CrosspostError::OAuth(OAuthError::TokenExchange(_))
    ));
    assert!(!message.contains("fb-secret"), "{message}");
    assert!(!message.contains("fb-code-123"), "{message}");
    assert!(accounts.list_accounts("acme").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_refresh_rotates_access_token_and_keeps_refresh_token() {
    let stub = Stub::start(|_| {
        |req: &common::Recorded| {
            if req.is("POST", "/oauth/v2/accessToken") {
                match req.form().get("grant_type").map(String::as_str) {
                    Some("refresh_token") => {
                        Reply::ok(json!({ "access_token": "li-access-2", "expires_in": 3600 }))
                    }
                    _ => Reply::ok(json!({
                        "access_token": "li-access-1",
                        "refresh_token": "li-refresh",
                        "expires_in": 60
                    })),
                }
            } else if req.is("GET", "/v2/userinfo") {
                Reply::ok(json!({ "sub": "member-9" }))
            } else {
                Reply::empty(404)
            }
        }
    })
    .await;
    let (service, accounts, _temp) = oauth(&stub).await;
    let connected = service
        .complete(PlatformKind::Linkedin, "code", &fresh_state(None).1)
        .await
        .unwrap()
        .accounts
        .remove(0);

    let refreshed = service.refresh(&connected).await.unwrap();

    let refresh_form = stub
        .calls_to("POST", "/oauth/v2/accessToken")
        .into_iter()
        .map(|c| c.form())
        .find(|f| f["grant_type"] == "refresh_token")
        .unwrap();
    assert_eq!(refresh_form["refresh_token"], "li-refresh");

    let cipher = accounts.cipher();
    assert_eq!(
        cipher.decrypt(&refreshed.access_token).unwrap().expose_secret(),
        "li-access-2"
    );
    assert_eq!(
        cipher
            .decrypt(refreshed.refresh_token.as_deref().unwrap())
            .unwrap()
            .expose_secret(),
        "li-refresh"
    );
    assert!(refreshed.expires_at.unwrap() > connected.expires_at.unwrap());
    assert_eq!(refreshed.id, connected.id);
}

#[tokio::test]
async fn test_page_tokens_cannot_be_refreshed() {
    let stub = Stub::start(|_| {
        graph_stub(json!([{ "id": "page-1", "name": "Acme", "access_token": "page-token" }]))
    })
    .await;
    let (service, accounts, _temp) = oauth(&stub).await;
    let mut facebook = service
        .complete(PlatformKind::Facebook, "code", &fresh_state(None).1)
        .await
        .unwrap()
        .accounts
        .remove(0);

    // Without a refresh token
    assert!(service.refresh(&facebook).await.is_err());

    facebook.refresh_token = Some(accounts.cipher().encrypt("unused").unwrap());
    let err = service.refresh(&facebook).await.unwrap_err();
    assert!(err.to_string().contains("Page tokens cannot be refreshed"));
    assert!(stub.calls_to("POST", "/oauth/access_token").is_empty());
}
