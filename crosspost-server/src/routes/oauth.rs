use axum::{
    extract::{Path, Query, State},
    response::Redirect,
};
use libcrosspost::error::OAuthError;
use libcrosspost::{Config, CrosspostError, PlatformKind};
use serde::Deserialize;
use tracing::{info, warn};

use super::parse_platform;
use crate::context::RequestContext;
use crate::error::ApiErr;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartParams {
    tenant_id: Option<String>,
    user_id: Option<String>,
}

/// GET /oauth/{platform}/start - redirect to the platform's consent screen.
///
/// Browsers arrive here by navigation, so tenant and user may come as
/// query parameters instead of headers.
pub async fn start(
    State(state): State<AppState>,
    Path(platform): Path<String>,
    Query(params): Query<StartParams>,
    ctx: RequestContext,
) -> Result<Redirect, ApiErr> {
    let platform = parse_platform(&platform)?;
    let tenant_id = params
        .tenant_id
        .filter(|t| !t.is_empty())
        .or(ctx.tenant_id)
        .ok_or_else(|| ApiErr::bad_request("Tenant ID is required"))?;
    let user_id = params.user_id.filter(|u| !u.is_empty()).or(ctx.user_id);

    let url = state
        .oauth
        .authorization_url(platform, &tenant_id, user_id.as_deref())?;
    Ok(Redirect::temporary(&url))
}

#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

fn frontend_return(config: &Config) -> String {
    format!(
        "{}{}",
        config.server.frontend_url.trim_end_matches('/'),
        config.server.frontend_return_path
    )
}

fn success_redirect(config: &Config, platform: PlatformKind) -> Redirect {
    Redirect::to(&format!(
        "{}?oauth=success&platform={}",
        frontend_return(config),
        platform
    ))
}

fn error_redirect(config: &Config, message: &str) -> Redirect {
    Redirect::to(&format!(
        "{}?oauth=error&message={}",
        frontend_return(config),
        urlencoding::encode(message)
    ))
}

fn user_message(err: &CrosspostError) -> String {
    match err {
        CrosspostError::OAuth(OAuthError::InvalidState | OAuthError::ExpiredState) => {
            "Invalid or expired state parameter".to_string()
        }
        CrosspostError::OAuth(e) => e.to_string(),
        other => other.to_string(),
    }
}

/// GET /oauth/{platform}/callback - finish the connection.
///
/// Always answers with a redirect back to the frontend, carrying
/// `oauth=success` or `oauth=error` and a message.
pub async fn callback(
    State(state): State<AppState>,
    Path(platform): Path<String>,
    Query(params): Query<CallbackParams>,
) -> Redirect {
    let config = &state.config;
    let platform = match parse_platform(&platform) {
        Ok(platform) => platform,
        Err(_) => return error_redirect(config, &format!("Unsupported platform: {}", platform)),
    };

    if let Some(error) = params.error {
        let message = params.error_description.unwrap_or(error);
        warn!(%platform, %message, "Platform denied authorization");
        return error_redirect(config, &message);
    }

    let (Some(code), Some(raw_state)) = (params.code, params.state) else {
        return error_redirect(config, "Missing authorization code or state");
    };

    match state.oauth.complete(platform, &code, &raw_state).await {
        Ok(completion) => {
            info!(
                %platform,
                tenant_id = %completion.tenant_id,
                accounts = completion.accounts.len(),
                "Account connected"
            );
            success_redirect(config, platform)
        }
        Err(e) => {
            warn!(%platform, error = %e, "OAuth callback failed");
            error_redirect(config, &user_message(&e))
        }
    }
}
