use super::AppState;
use crate::console::ConsoleSession;
use crate::error::{GatewayError, Result};
use axum::Json;
use axum::body::{Body, Bytes, to_bytes};
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use protocol::{
    ConnectionDescriptor, ConsoleToken, NodeId, PowerCycleRequest, PowerStatusResponse,
    TokenResponse,
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::convert::Infallible;
use tracing::debug;

/// Largest accepted node descriptor
const MAX_NODE_BODY: usize = 64 * 1024;

/// Largest accepted power request
const MAX_POWER_BODY: usize = 4 * 1024;

#[derive(Debug, Default, Deserialize)]
pub(super) struct TokenQuery {
    #[serde(default)]
    token: Option<String>,
}

pub(super) async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Admin check that runs before anything else about the request is looked at
fn require_admin(state: &AppState, headers: &HeaderMap, id: &str, operation: &str) -> Result<()> {
    state.admin.require(headers).inspect_err(|_| {
        if let Some(ref audit) = *state.audit {
            audit.log_auth_failure(NodeId::parse(id).ok().as_ref(), operation);
        }
    })
}

/// Node id from the path of a request that already passed the admin check
fn admin_node_id(id: &str) -> Result<NodeId> {
    Ok(NodeId::parse(id)?)
}

/// Collect a request body, only called once the caller is authorized
async fn read_body(body: Body, limit: usize) -> Result<Bytes> {
    to_bytes(body, limit)
        .await
        .map_err(|e| GatewayError::InvalidInput(format!("request body: {}", e)))
}

/// Node id and token of a token-authenticated request
///
/// Every failure here is reported as not found.
fn token_request(id: &str, query: Option<Query<TokenQuery>>) -> Result<(NodeId, ConsoleToken)> {
    let id = NodeId::parse(id).map_err(|_| GatewayError::NotFound)?;
    let token = query
        .and_then(|Query(q)| q.token)
        .ok_or(GatewayError::NotFound)?
        .parse::<ConsoleToken>()
        .map_err(|_| GatewayError::NotFound)?;
    Ok((id, token))
}

pub(super) async fn put_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<Value>> {
    require_admin(&state, &headers, &id, "put node")?;
    let id = admin_node_id(&id)?;
    let body = read_body(body, MAX_NODE_BODY).await?;
    let descriptor = ConnectionDescriptor::from_json(&body)?;

    let outcome = state.gateway.put_node(id, descriptor)?;
    Ok(Json(json!({ "status": outcome.as_str() })))
}

pub(super) async fn delete_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    require_admin(&state, &headers, &id, "delete node")?;
    let id = NodeId::parse(&id).map_err(|_| GatewayError::NotFound)?;

    state.gateway.delete_node(&id)?;
    Ok(Json(json!({ "status": "deleted" })))
}

pub(super) async fn issue_token(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<TokenResponse>> {
    require_admin(&state, &headers, &id, "issue token")?;
    let id = NodeId::parse(&id).map_err(|_| GatewayError::NotFound)?;

    let token = state.gateway.issue_token(&id)?;
    Ok(Json(TokenResponse { token }))
}

pub(super) async fn revoke_tokens(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    require_admin(&state, &headers, &id, "revoke tokens")?;
    let id = NodeId::parse(&id).map_err(|_| GatewayError::NotFound)?;

    let revoked = state.gateway.revoke_tokens(&id)?;
    Ok(Json(json!({ "revoked": revoked })))
}

pub(super) async fn stream_console(
    State(state): State<AppState>,
    Path(id): Path<String>,
    query: Option<Query<TokenQuery>>,
) -> Result<Response> {
    let (id, token) = token_request(&id, query)?;
    let session = state.gateway.attach(&id, &token).inspect_err(|e| {
        debug!("Console attach to {} refused: {}", id, e);
    })?;

    let stream = futures::stream::unfold(
        (session, state),
        |(mut session, state)| async move {
            match session.next_unit().await {
                Some(unit) => Some((Ok::<_, Infallible>(unit), (session, state))),
                None => {
                    log_detached(&state, &session);
                    None
                }
            }
        },
    );

    Ok((
        [(CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(stream),
    )
        .into_response())
}

fn log_detached(state: &AppState, session: &ConsoleSession) {
    if let Some(ref audit) = *state.audit {
        let reason = session
            .detach_reason()
            .map_or_else(|| "console closed".to_string(), |r| r.to_string());
        audit.log_console_detached(session.node_id(), session.id(), &reason);
    }
}

pub(super) async fn power_off(
    State(state): State<AppState>,
    Path(id): Path<String>,
    query: Option<Query<TokenQuery>>,
) -> Result<Json<Value>> {
    let (id, token) = token_request(&id, query)?;
    state.gateway.power_off(&id, &token).await?;
    Ok(Json(json!({ "status": "ok" })))
}

pub(super) async fn power_cycle(
    State(state): State<AppState>,
    Path(id): Path<String>,
    query: Option<Query<TokenQuery>>,
    body: Body,
) -> Result<Json<Value>> {
    let (id, token) = token_request(&id, query)?;
    state.gateway.check_token(&id, &token)?;
    let body = read_body(body, MAX_POWER_BODY).await?;

    let request = if body.is_empty() {
        PowerCycleRequest::default()
    } else {
        serde_json::from_slice::<PowerCycleRequest>(&body)
            .map_err(|e| GatewayError::InvalidInput(e.to_string()))?
    };

    state
        .gateway
        .power_cycle(&id, &token, request.force)
        .await?;
    Ok(Json(json!({ "status": "ok" })))
}

pub(super) async fn power_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    query: Option<Query<TokenQuery>>,
) -> Result<Json<PowerStatusResponse>> {
    let (id, token) = token_request(&id, query)?;
    let power_status = state.gateway.power_status(&id, &token).await?;
    Ok(Json(PowerStatusResponse { power_status }))
}
