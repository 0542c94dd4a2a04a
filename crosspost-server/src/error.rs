use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use libcrosspost::error::OAuthError;
use libcrosspost::CrosspostError;

/// API error rendered as `{"error": "<message>"}`
#[derive(Debug)]
pub struct ApiErr {
    status: StatusCode,
    message: String,
}

impl ApiErr {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: msg.into(),
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.into(),
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: msg.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<CrosspostError> for ApiErr {
    fn from(err: CrosspostError) -> Self {
        match err {
            CrosspostError::InvalidInput(msg) => Self::bad_request(msg),
            CrosspostError::NotFound(msg) => Self::not_found(msg),
            CrosspostError::Duplicate(msg) | CrosspostError::Conflict(msg) => Self::conflict(msg),
            CrosspostError::OAuth(
                e @ (OAuthError::NotConfigured(_) | OAuthError::UnsupportedPlatform(_)),
            ) => Self::bad_request(e.to_string()),
            other => {
                tracing::error!(error = %other, "Request failed");
                Self::internal(other.to_string())
            }
        }
    }
}

impl IntoResponse for ApiErr {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({"error": self.message})),
        )
            .into_response()
    }
}
