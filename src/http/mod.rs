//! Operator HTTP surface: deployment control, proxying, and liveness.
//!
//! Routes:
//!
//! - `POST /deployments/{server_id}/start` with an optional `{"kind": ...}`
//! - `POST /deployments/{server_id}/stop`
//! - `GET /deployments/{server_id}/status`
//! - `GET /deployments/{server_id}/logs?tail=N`
//! - any method on `/proxy/{server_id}` and `/proxy/{server_id}/{*path}`
//! - `GET /healthz`

mod error;

pub use error::{ApiError, ErrorBody};

use crate::agent_runtime::{
    domain::{DeploymentKind, ServerId},
    ports::RuntimeRepository,
    services::{AgentRuntime, ProxyRequest},
};
use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{HeaderMap, Method, Uri},
    response::Response,
    routing::{any, get, post},
};
use mockable::Clock;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;

/// Log lines returned when `tail` is omitted.
pub const DEFAULT_LOG_TAIL: usize = 100;

#[derive(Debug, Default, Deserialize)]
struct StartBody {
    #[serde(default)]
    kind: Option<DeploymentKind>,
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    tail: Option<usize>,
}

/// Builds the router over a shared runtime.
pub fn router<R, C>(runtime: Arc<AgentRuntime<R, C>>) -> Router
where
    R: RuntimeRepository + 'static,
    C: Clock + Send + Sync + 'static,
{
    Router::new()
        .route("/healthz", get(healthz::<R, C>))
        .route("/deployments/{server_id}/start", post(start::<R, C>))
        .route("/deployments/{server_id}/stop", post(stop::<R, C>))
        .route("/deployments/{server_id}/status", get(status::<R, C>))
        .route("/deployments/{server_id}/logs", get(logs::<R, C>))
        .route("/proxy/{server_id}", any(proxy::<R, C>))
        .route("/proxy/{server_id}/{*path}", any(proxy::<R, C>))
        .with_state(runtime)
}

fn parse_server_id(raw: &str) -> Result<ServerId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::validation(format!("invalid server id: {raw}")))
}

async fn healthz<R, C>(State(runtime): State<Arc<AgentRuntime<R, C>>>) -> Json<Value>
where
    R: RuntimeRepository + 'static,
    C: Clock + Send + Sync + 'static,
{
    Json(json!({
        "status": "ok",
        "pooled_processes": runtime.pool().active_servers().len(),
    }))
}

async fn start<R, C>(
    State(runtime): State<Arc<AgentRuntime<R, C>>>,
    Path(raw_id): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, ApiError>
where
    R: RuntimeRepository + 'static,
    C: Clock + Send + Sync + 'static,
{
    let server_id = parse_server_id(&raw_id)?;
    let request: StartBody = if body.is_empty() {
        StartBody::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|err| ApiError::validation(format!("invalid start request: {err}")))?
    };

    let deployment = runtime.start(server_id, request.kind).await?;
    Ok(Json(json!({"success": true, "deployment": deployment})))
}

async fn stop<R, C>(
    State(runtime): State<Arc<AgentRuntime<R, C>>>,
    Path(raw_id): Path<String>,
) -> Result<Json<Value>, ApiError>
where
    R: RuntimeRepository + 'static,
    C: Clock + Send + Sync + 'static,
{
    let server_id = parse_server_id(&raw_id)?;
    let stopped = runtime.stop(server_id).await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("server {server_id} stopped"),
        "deployment": stopped,
    })))
}

async fn status<R, C>(
    State(runtime): State<Arc<AgentRuntime<R, C>>>,
    Path(raw_id): Path<String>,
) -> Result<Json<Value>, ApiError>
where
    R: RuntimeRepository + 'static,
    C: Clock + Send + Sync + 'static,
{
    let server_id = parse_server_id(&raw_id)?;
    let report = runtime.status(server_id).await?;
    Ok(Json(json!({"success": true, "status": report})))
}

async fn logs<R, C>(
    State(runtime): State<Arc<AgentRuntime<R, C>>>,
    Path(raw_id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<Value>, ApiError>
where
    R: RuntimeRepository + 'static,
    C: Clock + Send + Sync + 'static,
{
    let server_id = parse_server_id(&raw_id)?;
    let tail = query.tail.unwrap_or(DEFAULT_LOG_TAIL);
    let lines = runtime.logs(server_id, tail).await?;
    Ok(Json(json!({"success": true, "logs": lines})))
}

async fn proxy<R, C>(
    State(runtime): State<Arc<AgentRuntime<R, C>>>,
    Path(params): Path<HashMap<String, String>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError>
where
    R: RuntimeRepository + 'static,
    C: Clock + Send + Sync + 'static,
{
    let raw_id = params
        .get("server_id")
        .ok_or_else(|| ApiError::validation("missing server id"))?;
    let server_id = parse_server_id(raw_id)?;

    let mut path = format!("/{}", params.get("path").map_or("", String::as_str));
    if let Some(query) = uri.query() {
        path.push('?');
        path.push_str(query);
    }

    let response = runtime
        .proxy(
            server_id,
            ProxyRequest {
                method,
                path,
                headers,
                body: body.to_vec(),
            },
        )
        .await;

    let mut rendered = Response::new(Body::from(response.body));
    *rendered.status_mut() = response.status;
    *rendered.headers_mut() = response.headers;
    Ok(rendered)
}
