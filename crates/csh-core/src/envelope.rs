// SPDX-License-Identifier: MIT OR Apache-2.0
//! Request envelope, protocol metadata, and payload.

use crate::context::RequestContext;
use crate::JsonMap;
use chrono::{DateTime, Utc};
use csh_error::{CshError, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ProtocolMeta
// ---------------------------------------------------------------------------

/// Transport-specific metadata the dispatcher carries through unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProtocolMeta {
    /// Name of the transport that accepted the request.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub transport: String,
    /// Protocol version advertised by the client, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Additional transport attributes (headers, peer address, ...).
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub attributes: JsonMap,
}

// ---------------------------------------------------------------------------
// RequestPayload
// ---------------------------------------------------------------------------

/// Payload kind tag of the no-data sentinel.
pub const NO_DATA_KIND: &str = "none";

/// Payload kind tag for plain JSON payloads.
pub const JSON_KIND: &str = "json";

/// The data portion of a request envelope.
///
/// Maps are snapshotted on construction (the constructors take ownership),
/// so producer-side mutation cannot reach consumers.  Use
/// [`RequestPayload::no_data`] instead of an optional payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RequestPayload {
    kind: String,
    #[serde(default)]
    data: JsonMap,
    #[serde(default)]
    parameters: JsonMap,
    #[serde(default)]
    metadata: JsonMap,
}

impl RequestPayload {
    /// Create a payload with an explicit kind tag.
    pub fn new(kind: impl Into<String>, data: JsonMap, parameters: JsonMap, metadata: JsonMap) -> Self {
        Self {
            kind: kind.into(),
            data,
            parameters,
            metadata,
        }
    }

    /// Create a JSON payload from data entries alone.
    #[must_use]
    pub fn json(data: JsonMap) -> Self {
        Self::new(JSON_KIND, data, JsonMap::new(), JsonMap::new())
    }

    /// The empty-payload sentinel.
    #[must_use]
    pub fn no_data() -> Self {
        Self::new(NO_DATA_KIND, JsonMap::new(), JsonMap::new(), JsonMap::new())
    }

    /// Payload kind tag.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Returns `true` for the no-data sentinel.
    #[must_use]
    pub fn is_no_data(&self) -> bool {
        self.kind == NO_DATA_KIND
    }

    /// Data entries.
    #[must_use]
    pub fn data(&self) -> &JsonMap {
        &self.data
    }

    /// Invocation parameters (querystring-style scalars).
    #[must_use]
    pub fn parameters(&self) -> &JsonMap {
        &self.parameters
    }

    /// Payload-level metadata.
    #[must_use]
    pub fn metadata(&self) -> &JsonMap {
        &self.metadata
    }
}

// ---------------------------------------------------------------------------
// RequestEnvelope
// ---------------------------------------------------------------------------

/// Protocol-agnostic request container.
///
/// Built by transports (through [`EnvelopeBuilder`]) and consumed by a
/// dispatcher.  `request_id`, `capability`, and `action` are always
/// non-empty; `received_at` auto-populates when the builder is not given
/// one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RequestEnvelope {
    /// Opaque correlation identifier.
    pub request_id: String,
    /// Capability the request addresses.
    pub capability: String,
    /// Action within the capability.
    pub action: String,
    /// Transport-specific metadata.
    #[serde(default)]
    pub protocol: ProtocolMeta,
    /// Request payload.
    pub payload: RequestPayload,
    /// Identity / tracing / deadline context.
    #[serde(default)]
    pub context: RequestContext,
    /// When the transport accepted the request.  Auto-populates when the
    /// wire form omits it.
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

impl RequestEnvelope {
    /// Start building an envelope for the given capability and action.
    pub fn builder(capability: impl Into<String>, action: impl Into<String>) -> EnvelopeBuilder {
        EnvelopeBuilder::new(capability, action)
    }
}

/// Fluent builder for [`RequestEnvelope`].
#[derive(Debug, Default)]
pub struct EnvelopeBuilder {
    request_id: Option<String>,
    capability: String,
    action: String,
    protocol: ProtocolMeta,
    payload: Option<RequestPayload>,
    context: Option<RequestContext>,
    received_at: Option<DateTime<Utc>>,
}

impl EnvelopeBuilder {
    /// Create a builder for the given capability and action.
    pub fn new(capability: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
            action: action.into(),
            ..Default::default()
        }
    }

    /// Set an explicit correlation id.  When omitted, a fresh UUID is
    /// assigned at build time.
    #[must_use]
    pub fn request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    /// Set protocol metadata.
    #[must_use]
    pub fn protocol(mut self, protocol: ProtocolMeta) -> Self {
        self.protocol = protocol;
        self
    }

    /// Set the payload.  Defaults to [`RequestPayload::no_data`].
    #[must_use]
    pub fn payload(mut self, payload: RequestPayload) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Set the request context.  Defaults to [`RequestContext::default`].
    #[must_use]
    pub fn context(mut self, context: RequestContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Set an explicit receive timestamp.  Defaults to now.
    #[must_use]
    pub fn received_at(mut self, at: DateTime<Utc>) -> Self {
        self.received_at = Some(at);
        self
    }

    /// Validate and build the envelope.
    ///
    /// # Errors
    ///
    /// Returns a *bad-request* error when the capability, action, or an
    /// explicitly supplied request id is blank.
    pub fn build(self) -> Result<RequestEnvelope> {
        if self.capability.trim().is_empty() {
            return Err(CshError::bad_request("envelope capability must not be blank"));
        }
        if self.action.trim().is_empty() {
            return Err(CshError::bad_request("envelope action must not be blank"));
        }
        let request_id = match self.request_id {
            Some(id) if id.trim().is_empty() => {
                return Err(CshError::bad_request("envelope request id must not be blank"));
            }
            Some(id) => id,
            None => Uuid::new_v4().to_string(),
        };
        Ok(RequestEnvelope {
            request_id,
            capability: self.capability,
            action: self.action,
            protocol: self.protocol,
            payload: self.payload.unwrap_or_else(RequestPayload::no_data),
            context: self.context.unwrap_or_default(),
            received_at: self.received_at.unwrap_or_else(Utc::now),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_fills_defaults() {
        let env = RequestEnvelope::builder("blog", "ping").build().unwrap();
        assert!(!env.request_id.is_empty());
        assert!(env.payload.is_no_data());
        assert!(env.received_at <= Utc::now());
    }

    #[test]
    fn blank_capability_is_rejected() {
        let err = RequestEnvelope::builder("  ", "ping").build().unwrap_err();
        assert!(err.kind().is_bad_request());
    }

    #[test]
    fn blank_action_is_rejected() {
        let err = RequestEnvelope::builder("blog", "").build().unwrap_err();
        assert!(err.kind().is_bad_request());
    }

    #[test]
    fn explicit_blank_request_id_is_rejected() {
        let err = RequestEnvelope::builder("blog", "ping")
            .request_id(" ")
            .build()
            .unwrap_err();
        assert!(err.kind().is_bad_request());
    }

    #[test]
    fn payload_parameters_returns_stored_map() {
        let params = JsonMap::from_iter([("limit".to_string(), json!(10))]);
        let payload = RequestPayload::new(JSON_KIND, JsonMap::new(), params.clone(), JsonMap::new());
        assert_eq!(payload.parameters(), &params);
    }

    #[test]
    fn no_data_sentinel_round_trips() {
        let payload = RequestPayload::no_data();
        assert!(payload.is_no_data());
        let text = serde_json::to_string(&payload).unwrap();
        let back: RequestPayload = serde_json::from_str(&text).unwrap();
        assert!(back.is_no_data());
    }

    #[test]
    fn envelope_serde_roundtrip() {
        let env = RequestEnvelope::builder("blog", "ping")
            .request_id("r1")
            .payload(RequestPayload::json(JsonMap::from_iter([(
                "x".to_string(),
                json!(1),
            )])))
            .build()
            .unwrap();
        let text = serde_json::to_string(&env).unwrap();
        let back: RequestEnvelope = serde_json::from_str(&text).unwrap();
        assert_eq!(back, env);
    }
}
