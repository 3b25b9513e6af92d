// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-transport dispatch from request envelopes to session execution.
//!
//! The dispatcher is polymorphic over a closed set of transport kinds.
//! Whatever the wire looks like, the flow is the same: envelope → session
//! context + task → `session.execute` → task result → response entity.
//! Status categories pass through unchanged; transports map them to wire
//! codes on their side of the boundary.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Server and server-factory boundary contracts, plus the channel server.
pub mod server;

use chrono::Utc;
use csh_core::{
    meta, JsonMap, RequestEnvelope, ResponseEntity, StatusCategory, TaskResult,
};
use csh_error::{CshError, Result};
use csh_health::MetricsRegistry;
use csh_session::{Session, SessionContext, SessionTask};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// TransportKind
// ---------------------------------------------------------------------------

/// Closed set of wire bindings a capability can be exposed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Request/response JSON over HTTP.
    HttpJson,
    /// JSON-RPC 2.0 framing.
    JsonRpc,
    /// Line-delimited JSON over stdio.
    Stdio,
    /// Fragmented streaming responses.
    Streaming,
}

impl TransportKind {
    /// Stable identifier used in exposure bindings.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HttpJson => "http_json",
            Self::JsonRpc => "jsonrpc",
            Self::Stdio => "stdio",
            Self::Streaming => "streaming",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = CshError;

    /// Parse an exposure binding, case-insensitively; `-` and `_` are
    /// interchangeable.
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "http_json" | "httpjson" | "http" => Ok(Self::HttpJson),
            "jsonrpc" | "json_rpc" => Ok(Self::JsonRpc),
            "stdio" => Ok(Self::Stdio),
            "streaming" | "stream" => Ok(Self::Streaming),
            other => Err(CshError::configuration(format!(
                "unknown transport binding '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// OutputFragment
// ---------------------------------------------------------------------------

/// One element of a streaming response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "fragment", rename_all = "snake_case")]
pub enum OutputFragment {
    /// One output data entry.
    Entry {
        /// Entry key.
        key: String,
        /// Entry value.
        value: serde_json::Value,
    },
    /// Terminal fragment of a successful stream.
    Complete {
        /// Output metadata bundle.
        metadata: JsonMap,
    },
    /// Terminal fragment of a failed stream.
    Error {
        /// Coarse outcome label.
        status: StatusCategory,
        /// Sanitised message.
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Adapts one transport kind onto the session.
pub struct Dispatcher {
    session: Arc<Session>,
    kind: TransportKind,
    metrics: Arc<MetricsRegistry>,
}

impl Dispatcher {
    /// Create a dispatcher for the given transport kind.
    #[must_use]
    pub fn new(session: Arc<Session>, kind: TransportKind, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            session,
            kind,
            metrics,
        }
    }

    /// The transport kind this dispatcher serves.
    #[must_use]
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Dispatch one envelope and produce the response entity.
    ///
    /// Never returns an error: unexpected failures become
    /// [`ResponseEntity::Error`] with the `execution_failed` category.
    pub async fn dispatch(&self, envelope: RequestEnvelope) -> ResponseEntity {
        let timer = self.metrics.start_request();
        self.metrics.record_component("dispatcher");

        let entity = self.dispatch_inner(envelope).await;
        match entity.status() {
            StatusCategory::Success => timer.success(),
            status => timer.failure(status),
        }
        entity
    }

    async fn dispatch_inner(&self, envelope: RequestEnvelope) -> ResponseEntity {
        debug!(
            target: "csh.dispatch",
            transport = %self.kind,
            request = %envelope.request_id,
            capability = %envelope.capability,
            action = %envelope.action,
            "dispatching"
        );

        let ctx = session_context(&envelope);
        let task = session_task(&envelope);

        match self.session.execute(task, ctx).await {
            Ok(TaskResult::Success { output, metadata }) => ResponseEntity::Ok {
                data: output,
                metadata,
            },
            Ok(TaskResult::Failure {
                status,
                message,
                metadata,
            }) => {
                let detail = metadata
                    .get("cause")
                    .and_then(|v| v.as_str())
                    .map(String::from);
                ResponseEntity::Error {
                    status,
                    message,
                    detail,
                }
            }
            Err(err) => {
                warn!(
                    target: "csh.dispatch",
                    request = %envelope.request_id,
                    error = %err,
                    "session raised"
                );
                ResponseEntity::Error {
                    status: StatusCategory::ExecutionFailed,
                    message: err.message().to_string(),
                    detail: None,
                }
            }
        }
    }

    /// Dispatch one envelope as a stream of [`OutputFragment`]s.
    ///
    /// On success the stream yields one `Entry` per output data entry (in
    /// insertion order) followed by a terminal `Complete`; on failure it
    /// yields a single `Error` fragment.
    #[must_use]
    pub fn dispatch_streaming(
        self: &Arc<Self>,
        envelope: RequestEnvelope,
    ) -> ReceiverStream<OutputFragment> {
        let (tx, rx) = tokio::sync::mpsc::channel(16);
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            match dispatcher.dispatch(envelope).await {
                ResponseEntity::Ok { data, metadata } => {
                    for (key, value) in data {
                        if tx
                            .send(OutputFragment::Entry { key, value })
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    let _ = tx.send(OutputFragment::Complete { metadata }).await;
                }
                ResponseEntity::Error {
                    status, message, ..
                } => {
                    let _ = tx.send(OutputFragment::Error { status, message }).await;
                }
            }
        });
        ReceiverStream::new(rx)
    }
}

/// Derive the session context from the envelope's own context block.
fn session_context(envelope: &RequestEnvelope) -> SessionContext {
    let ctx = &envelope.context;
    SessionContext {
        session_id: ctx.session_id.clone(),
        user_id: ctx.user_id.clone(),
        trace_id: ctx.trace_id.clone(),
        security: ctx.security.clone(),
        attributes: ctx.attributes.clone(),
        now: Utc::now(),
        deadline: ctx.deadline,
    }
}

/// Build the session task from the envelope payload.
fn session_task(envelope: &RequestEnvelope) -> SessionTask {
    let mut data = JsonMap::new();
    data.insert(
        meta::PAYLOAD_DATA.into(),
        serde_json::to_value(envelope.payload.data()).unwrap_or_default(),
    );
    data.insert(
        meta::PAYLOAD_PARAMETERS.into(),
        serde_json::to_value(envelope.payload.parameters()).unwrap_or_default(),
    );

    let mut metadata = envelope.payload.metadata().clone();
    metadata.insert(
        meta::CAPABILITY.into(),
        serde_json::Value::from(envelope.capability.clone()),
    );
    metadata.insert(
        meta::ACTION.into(),
        serde_json::Value::from(envelope.action.clone()),
    );
    if let Some(user) = &envelope.context.user_id {
        metadata.insert(meta::USER_ID.into(), serde_json::Value::from(user.clone()));
    }
    metadata.insert(
        meta::TASK_STARTED_AT.into(),
        serde_json::Value::from(Utc::now().to_rfc3339()),
    );
    metadata.insert(
        meta::DEBUG_CONTEXT.into(),
        serde_json::Value::from(format!(
            "request={} transport={}",
            envelope.request_id, envelope.protocol.transport
        )),
    );

    SessionTask { data, metadata }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_parse_is_case_insensitive() {
        assert_eq!(
            "HTTP_JSON".parse::<TransportKind>().unwrap(),
            TransportKind::HttpJson
        );
        assert_eq!(
            "http-json".parse::<TransportKind>().unwrap(),
            TransportKind::HttpJson
        );
        assert_eq!(
            "JsonRpc".parse::<TransportKind>().unwrap(),
            TransportKind::JsonRpc
        );
        assert_eq!("stdio".parse::<TransportKind>().unwrap(), TransportKind::Stdio);
        assert_eq!(
            "Streaming".parse::<TransportKind>().unwrap(),
            TransportKind::Streaming
        );
    }

    #[test]
    fn unknown_binding_is_a_configuration_error() {
        let err = "carrier-pigeon".parse::<TransportKind>().unwrap_err();
        assert!(err.kind().is_configuration());
    }

    #[test]
    fn session_task_carries_capability_action_and_user() {
        let envelope = RequestEnvelope::builder("blog", "ping")
            .request_id("r1")
            .context(csh_core::RequestContext {
                user_id: Some("alice".into()),
                ..Default::default()
            })
            .build()
            .unwrap();
        let task = session_task(&envelope);
        assert_eq!(
            task.metadata.get(meta::CAPABILITY),
            Some(&serde_json::json!("blog"))
        );
        assert_eq!(
            task.metadata.get(meta::ACTION),
            Some(&serde_json::json!("ping"))
        );
        assert_eq!(
            task.metadata.get(meta::USER_ID),
            Some(&serde_json::json!("alice"))
        );
        assert!(task.metadata.contains_key(meta::TASK_STARTED_AT));
        assert!(task.data.contains_key(meta::PAYLOAD_DATA));
        assert!(task.data.contains_key(meta::PAYLOAD_PARAMETERS));
    }

    #[test]
    fn session_context_derives_identity_from_envelope() {
        let deadline = Utc::now() + chrono::Duration::seconds(5);
        let envelope = RequestEnvelope::builder("blog", "ping")
            .context(csh_core::RequestContext {
                session_id: Some("s-1".into()),
                trace_id: Some("t-1".into()),
                deadline: Some(deadline),
                ..Default::default()
            })
            .build()
            .unwrap();
        let ctx = session_context(&envelope);
        assert_eq!(ctx.session_id.as_deref(), Some("s-1"));
        assert_eq!(ctx.trace_id.as_deref(), Some("t-1"));
        assert_eq!(ctx.deadline, Some(deadline));
    }

    #[test]
    fn fragment_serde_is_tagged() {
        let fragment = OutputFragment::Entry {
            key: "x".into(),
            value: serde_json::json!(1),
        };
        let json = serde_json::to_string(&fragment).unwrap();
        assert!(json.contains("\"fragment\":\"entry\""));
        let back: OutputFragment = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fragment);
    }
}
