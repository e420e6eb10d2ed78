//! Token authorizer.
//!
//! Every protected route requires an `x-auth-token`, validated against the
//! identity API. Rackers (role name "Racker" or role id "9") act on behalf of
//! the tenant named in `x-tenant-id`; everyone else is scoped to their own
//! `RAX-AUTH:domainId`. A request that resolves to no domain is forbidden.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use serde_json::Value;
use tracing::debug;
use vdo_core::clients::identity;

use crate::error::ApiError;
use crate::AppState;

const RACKER_ROLE_NAME: &str = "Racker";
const RACKER_ROLE_ID: &str = "9";

#[derive(Debug, Clone)]
pub struct AuthContext {
    pub domain_id: String,
    pub name: String,
    pub user_id: String,
    pub racker: bool,
    pub roles: Vec<String>,
}

pub async fn authorize(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get("x-auth-token")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| ApiError::Unauthorized("missing x-auth-token".to_string()))?;

    let document = identity::validate(&state.http, &state.identity_endpoint, &token)
        .await
        .map_err(|error| ApiError::Unauthorized(format!("token rejected: {error}")))?;

    let user = &document["access"]["user"];
    let roles: Vec<Value> = user["roles"].as_array().cloned().unwrap_or_default();
    let racker = roles
        .iter()
        .any(|role| role["name"] == RACKER_ROLE_NAME || role["id"] == RACKER_ROLE_ID);

    let domain_id = if racker {
        request
            .headers()
            .get("x-tenant-id")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    } else {
        user["RAX-AUTH:domainId"]
            .as_str()
            .map(str::to_string)
            .or_else(|| user["RAX-AUTH:domainId"].as_i64().map(|id| id.to_string()))
    };
    let domain_id = domain_id
        .ok_or_else(|| ApiError::Forbidden("no domain resolved for caller".to_string()))?;

    let context = AuthContext {
        domain_id,
        name: user["name"].as_str().unwrap_or_default().to_string(),
        user_id: user["id"].as_str().unwrap_or_default().to_string(),
        racker,
        roles: roles
            .iter()
            .filter_map(|role| role["name"].as_str().map(str::to_string))
            .collect(),
    };
    debug!(user = %context.name, domain = %context.domain_id, racker, "authorized request");

    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}
