// SPDX-License-Identifier: MIT OR Apache-2.0
//! HTTP/JSON and JSON-RPC bindings for the Cheshire daemon.
//!
//! These are the external-collaborator side of the dispatcher contract:
//! they translate wire requests into [`RequestEnvelope`]s, hand them to a
//! [`Dispatcher`], and map the response's status category to wire-level
//! codes.

#![deny(unsafe_code)]

/// The line-delimited JSON loop over stdio.
pub mod stdio;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use csh_core::{
    JsonMap, ProtocolMeta, RequestContext, RequestEnvelope, RequestPayload, ResponseEntity,
    StatusCategory,
};
use csh_dispatch::Dispatcher;
use csh_health::{HealthMonitor, HealthState, MetricsRegistry};
use serde::Deserialize;
use std::sync::Arc;

/// Shared state behind the HTTP router.
pub struct AppState {
    /// Dispatcher for the REST-style binding.
    pub http: Arc<Dispatcher>,
    /// Dispatcher for the JSON-RPC binding.
    pub rpc: Arc<Dispatcher>,
    /// Health monitor backing `/healthz`.
    pub health: Arc<HealthMonitor>,
    /// Metrics registry backing `/metrics`.
    pub metrics: Arc<MetricsRegistry>,
}

/// Build the daemon router.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/{capability}/{action}", post(invoke))
        .route("/rpc", post(rpc))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Body of a REST-style invocation.
#[derive(Debug, Default, Deserialize)]
pub struct InvokeBody {
    /// Payload data entries.
    #[serde(default)]
    pub data: JsonMap,
    /// Invocation parameters.
    #[serde(default)]
    pub parameters: JsonMap,
    /// Payload metadata.
    #[serde(default)]
    pub metadata: JsonMap,
    /// Request context (identity, deadline).
    #[serde(default)]
    pub context: Option<RequestContext>,
}

fn to_envelope(
    capability: String,
    action: String,
    body: InvokeBody,
    transport: &str,
) -> Result<RequestEnvelope, csh_error::CshError> {
    RequestEnvelope::builder(capability, action)
        .protocol(ProtocolMeta {
            transport: transport.to_string(),
            version: None,
            attributes: JsonMap::new(),
        })
        .payload(RequestPayload::new(
            "json",
            body.data,
            body.parameters,
            body.metadata,
        ))
        .context(body.context.unwrap_or_default())
        .build()
}

fn entity_response(entity: ResponseEntity) -> Response {
    let code = match &entity {
        ResponseEntity::Ok { .. } => StatusCategory::Success.http_status(),
        ResponseEntity::Error { status, .. } => status.http_status(),
    };
    let code = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (code, Json(entity)).into_response()
}

async fn invoke(
    State(state): State<Arc<AppState>>,
    Path((capability, action)): Path<(String, String)>,
    Json(body): Json<InvokeBody>,
) -> Response {
    match to_envelope(capability, action, body, "http") {
        Ok(envelope) => entity_response(state.http.dispatch(envelope).await),
        Err(err) => entity_response(ResponseEntity::error(
            StatusCategory::BadRequest,
            err.message().to_string(),
        )),
    }
}

// ---------------------------------------------------------------------------
// JSON-RPC
// ---------------------------------------------------------------------------

/// A JSON-RPC 2.0 request; `method` is `capability.action`.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    /// Protocol version marker; must be `"2.0"`.
    #[serde(default)]
    pub jsonrpc: String,
    /// `capability.action`.
    pub method: String,
    /// Invocation payload.
    #[serde(default)]
    pub params: InvokeBody,
    /// Correlation id echoed back.
    #[serde(default)]
    pub id: Option<serde_json::Value>,
}

fn rpc_error_code(status: StatusCategory) -> i64 {
    match status {
        StatusCategory::BadRequest => -32602,
        StatusCategory::NotFound => -32601,
        _ => -32000,
    }
}

async fn rpc(State(state): State<Arc<AppState>>, Json(request): Json<RpcRequest>) -> Response {
    let id = request.id.clone().unwrap_or(serde_json::Value::Null);
    if !request.jsonrpc.is_empty() && request.jsonrpc != "2.0" {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "error": {"code": -32600, "message": "unsupported jsonrpc version"},
            "id": id,
        });
        return (StatusCode::OK, Json(body)).into_response();
    }
    let Some((capability, action)) = request.method.split_once('.') else {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "error": {"code": -32601, "message": "method must be capability.action"},
            "id": id,
        });
        return (StatusCode::OK, Json(body)).into_response();
    };

    let envelope = match to_envelope(
        capability.to_string(),
        action.to_string(),
        request.params,
        "jsonrpc",
    ) {
        Ok(envelope) => envelope,
        Err(err) => {
            let body = serde_json::json!({
                "jsonrpc": "2.0",
                "error": {"code": -32602, "message": err.message()},
                "id": id,
            });
            return (StatusCode::OK, Json(body)).into_response();
        }
    };

    let body = match state.rpc.dispatch(envelope).await {
        ResponseEntity::Ok { data, metadata } => serde_json::json!({
            "jsonrpc": "2.0",
            "result": {"data": data, "metadata": metadata},
            "id": id,
        }),
        ResponseEntity::Error {
            status, message, ..
        } => serde_json::json!({
            "jsonrpc": "2.0",
            "error": {"code": rpc_error_code(status), "message": message},
            "id": id,
        }),
    };
    (StatusCode::OK, Json(body)).into_response()
}

// ---------------------------------------------------------------------------
// Observability
// ---------------------------------------------------------------------------

async fn healthz(State(state): State<Arc<AppState>>) -> Response {
    let snapshot = state.health.snapshot();
    let code = if matches!(
        snapshot.status,
        HealthState::Running | HealthState::Degraded
    ) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(snapshot)).into_response()
}

async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    (StatusCode::OK, Json(state.metrics.snapshot())).into_response()
}
