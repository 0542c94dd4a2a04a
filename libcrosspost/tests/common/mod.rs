//! Local stand-in for the upstream social APIs
//!
//! Every request is recorded; the responder decides what comes back.

#![allow(dead_code)]

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use libcrosspost::{Account, AccountStatus, PlatformKind, TokenCipher};
use serde_json::Value;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub path: String,
    pub query: String,
    pub authorization: Option<String>,
    pub content_type: Option<String>,
    pub raw: Bytes,
    pub body: Value,
}

impl Recorded {
    pub fn is(&self, method: &str, path: &str) -> bool {
        self.method.as_str() == method && self.path == path
    }

    pub fn form(&self) -> std::collections::HashMap<String, String> {
        url::form_urlencoded::parse(&self.raw).into_owned().collect()
    }

    pub fn query_pairs(&self) -> std::collections::HashMap<String, String> {
        url::form_urlencoded::parse(self.query.as_bytes())
            .into_owned()
            .collect()
    }
}

pub struct Reply {
    pub status: StatusCode,
    pub body: Value,
    pub headers: Vec<(&'static str, String)>,
}

impl Reply {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status: StatusCode::from_u16(status).unwrap(),
            body,
            headers: Vec::new(),
        }
    }

    pub fn ok(body: Value) -> Self {
        Self::json(200, body)
    }

    pub fn empty(status: u16) -> Self {
        Self::json(status, Value::Null)
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }
}

type Responder = Arc<dyn Fn(&Recorded) -> Reply + Send + Sync>;

#[derive(Clone)]
struct StubState {
    calls: Arc<Mutex<Vec<Recorded>>>,
    respond: Responder,
}

pub struct Stub {
    pub base: String,
    calls: Arc<Mutex<Vec<Recorded>>>,
}

impl Stub {
    /// Start a stub on an ephemeral port. `make` receives the base URL so
    /// responses can point back at the stub.
    pub async fn start<F>(make: impl FnOnce(String) -> F) -> Self
    where
        F: Fn(&Recorded) -> Reply + Send + Sync + 'static,
    {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let calls = Arc::new(Mutex::new(Vec::new()));
        let state = StubState {
            calls: calls.clone(),
            respond: Arc::new(make(base.clone())),
        };

        let app = Router::new().fallback(handle).with_state(state);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base, calls }
    }

    pub fn calls(&self) -> Vec<Recorded> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, method: &str, path: &str) -> Vec<Recorded> {
        self.calls().into_iter().filter(|c| c.is(method, path)).collect()
    }
}

async fn handle(
    State(state): State<StubState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    raw: Bytes,
) -> Response {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let recorded = Recorded {
        method,
        path: uri.path().to_string(),
        query: uri.query().unwrap_or_default().to_string(),
        authorization: header("authorization"),
        content_type: header("content-type"),
        body: serde_json::from_slice(&raw).unwrap_or(Value::Null),
        raw,
    };

    let reply = (state.respond)(&recorded);
    state.calls.lock().unwrap().push(recorded);

    let mut response = if reply.body.is_null() {
        reply.status.into_response()
    } else {
        (reply.status, axum::Json(reply.body)).into_response()
    };
    for (name, value) in reply.headers {
        response.headers_mut().insert(
            HeaderName::from_static(name),
            HeaderValue::from_str(&value).unwrap(),
        );
    }
    response
}

/// A connected account row as the store would hand it to an adapter
pub fn account(
    cipher: &TokenCipher,
    platform: PlatformKind,
    token: &str,
    platform_user_id: Option<&str>,
    page_id: Option<&str>,
) -> Account {
    let now = chrono::Utc::now().timestamp();
    Account {
        id: format!("{}-account", platform),
        tenant_id: "acme".to_string(),
        platform,
        access_token: cipher.encrypt(token).unwrap(),
        refresh_token: None,
        expires_at: None,
        status: AccountStatus::Connected,
        is_connected: true,
        platform_user_id: platform_user_id.map(str::to_string),
        platform_user_name: None,
        page_id: page_id.map(str::to_string),
        page_name: None,
        connected_by: None,
        created_at: now,
        updated_at: now,
    }
}

/// Base URL of a loopback port nothing listens on
pub fn closed_base() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}
