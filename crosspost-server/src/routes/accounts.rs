use axum::{
    extract::{Path, State},
    Json,
};
use libcrosspost::Account;
use serde_json::{json, Value};
use tracing::error;

use super::parse_platform;
use crate::context::RequestContext;
use crate::error::ApiErr;
use crate::AppState;

/// GET /accounts - connected accounts of the tenant, tokens omitted.
///
/// Dashboards poll this; a missing tenant or a store failure yields `[]`.
pub async fn list(State(state): State<AppState>, ctx: RequestContext) -> Json<Vec<Account>> {
    let Some(tenant_id) = ctx.tenant_id else {
        return Json(Vec::new());
    };

    match state.service.accounts().list_accounts(&tenant_id).await {
        Ok(accounts) => Json(accounts),
        Err(e) => {
            error!(tenant_id = %tenant_id, error = %e, "Failed to list accounts");
            Json(Vec::new())
        }
    }
}

/// DELETE /accounts/{platform}
pub async fn disconnect(
    State(state): State<AppState>,
    Path(platform): Path<String>,
    ctx: RequestContext,
) -> Result<Json<Value>, ApiErr> {
    let tenant_id = ctx.require_tenant()?;
    let platform = parse_platform(&platform)?;

    state.service.accounts().disconnect(tenant_id, platform).await?;
    Ok(Json(json!({"message": "Disconnected successfully"})))
}
