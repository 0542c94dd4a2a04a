//! Caller identity
//!
//! Authentication happens upstream of this service; the gateway forwards
//! the tenant and user as `x-tenant-id` / `x-user-id` headers.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use std::convert::Infallible;

use crate::error::ApiErr;

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const USER_HEADER: &str = "x-user-id";

#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub tenant_id: Option<String>,
    pub user_id: Option<String>,
}

impl RequestContext {
    pub fn require_tenant(&self) -> Result<&str, ApiErr> {
        self.tenant_id
            .as_deref()
            .ok_or_else(|| ApiErr::bad_request("Tenant ID is required"))
    }

    pub fn require_user(&self) -> Result<&str, ApiErr> {
        self.user_id
            .as_deref()
            .ok_or_else(|| ApiErr::unauthorized("User authentication required to create posts"))
    }
}

fn header_value(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl<S: Send + Sync> FromRequestParts<S> for RequestContext {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self {
            tenant_id: header_value(parts, TENANT_HEADER),
            user_id: header_value(parts, USER_HEADER),
        })
    }
}
