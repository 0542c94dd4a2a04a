//! Upstream HTTP response handling shared by the adapters

use reqwest::Response;
use serde_json::Value;

use crate::error::{PlatformError, Result};
use crate::types::PlatformKind;

/// Graph API error code for an invalid or expired access token
const GRAPH_INVALID_TOKEN: i64 = 190;

/// A non-success upstream response, reduced to what callers branch on
#[derive(Debug, Clone)]
pub(crate) struct UpstreamError {
    pub status: u16,
    pub code: Option<i64>,
    pub message: String,
}

impl UpstreamError {
    pub async fn from_response(response: Response) -> Self {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Self::from_body(status.as_u16(), &body, status.canonical_reason())
    }

    pub fn from_body(status: u16, body: &str, reason: Option<&str>) -> Self {
        let parsed: Option<Value> = serde_json::from_str(body).ok();
        let (code, message) = match parsed.as_ref() {
            Some(json) => (error_code(json), error_message(json)),
            None => (None, None),
        };

        let message = message.unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                reason.unwrap_or("unknown error").to_string()
            } else {
                trimmed.chars().take(300).collect()
            }
        });

        Self {
            status,
            code,
            message,
        }
    }

    pub fn into_platform_error(self, platform: PlatformKind) -> PlatformError {
        let detail = format!("{} API error ({}): {}", platform, self.status, self.message);
        if self.status == 401 || self.code == Some(GRAPH_INVALID_TOKEN) {
            PlatformError::Authentication(detail)
        } else if self.status == 429 {
            PlatformError::RateLimit(detail)
        } else if self.status >= 500 {
            PlatformError::Network(detail)
        } else {
            PlatformError::Posting(detail)
        }
    }
}

fn error_code(json: &Value) -> Option<i64> {
    json.pointer("/error/code")
        .and_then(Value::as_i64)
        .or_else(|| json.get("serviceErrorCode").and_then(Value::as_i64))
}

fn error_message(json: &Value) -> Option<String> {
    [
        "/error/message",
        "/message",
        "/detail",
        "/errors/0/message",
        "/title",
        "/error_description",
        "/error",
    ]
    .iter()
    .find_map(|path| json.pointer(path).and_then(Value::as_str))
    .map(str::to_string)
}

/// Request URLs can carry `access_token`; they never reach the message
pub(crate) fn network_error(platform: PlatformKind, err: reqwest::Error) -> PlatformError {
    PlatformError::Network(format!("{} request failed: {}", platform, err.without_url()))
}

/// Parse a success body as JSON, or map the failure
pub(crate) async fn json_body(platform: PlatformKind, response: Response) -> Result<Value> {
    if !response.status().is_success() {
        return Err(UpstreamError::from_response(response)
            .await
            .into_platform_error(platform)
            .into());
    }

    response.json::<Value>().await.map_err(|e| {
        PlatformError::Posting(format!(
            "{} returned an unreadable response: {}",
            platform,
            e.without_url()
        ))
        .into()
    })
}

/// First string (or number) found at one of `keys` in a JSON object
pub(crate) fn id_field(json: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match json.pointer(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
