// SPDX-License-Identifier: MIT OR Apache-2.0
//! Request context and security context.

use crate::JsonMap;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Pass-through security context attached to a request.
///
/// The framework never interprets these fields; user step code decides
/// whether a request is allowed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SecurityContext {
    /// Authenticated principal, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,
    /// Granted roles.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    /// Opaque claims handed through from the transport.
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub claims: JsonMap,
}

impl SecurityContext {
    /// Returns `true` if the context carries the given role.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Identity, tracing, and timing information for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RequestContext {
    /// Logical client session identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// End-user identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Distributed trace correlation identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    /// Pass-through security context.
    #[serde(default)]
    pub security: SecurityContext,
    /// Free-form per-request attributes.
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub attributes: JsonMap,
    /// When the transport accepted the request.  Auto-populates when the
    /// wire form omits it.
    #[serde(default = "Utc::now")]
    pub arrived_at: DateTime<Utc>,
    /// Absolute deadline after which the pipeline must stop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self {
            session_id: None,
            user_id: None,
            trace_id: None,
            security: SecurityContext::default(),
            attributes: JsonMap::new(),
            arrived_at: Utc::now(),
            deadline: None,
        }
    }
}

impl RequestContext {
    /// Returns `true` if a deadline is set and already passed at `now`.
    #[must_use]
    pub fn deadline_exceeded(&self, now: DateTime<Utc>) -> bool {
        self.deadline.is_some_and(|d| now > d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn default_context_has_no_deadline() {
        let ctx = RequestContext::default();
        assert!(ctx.deadline.is_none());
        assert!(!ctx.deadline_exceeded(Utc::now()));
    }

    #[test]
    fn deadline_in_the_past_is_exceeded() {
        let ctx = RequestContext {
            deadline: Some(Utc::now() - Duration::milliseconds(1)),
            ..Default::default()
        };
        assert!(ctx.deadline_exceeded(Utc::now()));
    }

    #[test]
    fn deadline_in_the_future_is_not_exceeded() {
        let ctx = RequestContext {
            deadline: Some(Utc::now() + Duration::seconds(30)),
            ..Default::default()
        };
        assert!(!ctx.deadline_exceeded(Utc::now()));
    }

    #[test]
    fn has_role_checks_exact_names() {
        let sec = SecurityContext {
            principal: Some("alice".into()),
            roles: vec!["reader".into(), "writer".into()],
            claims: JsonMap::new(),
        };
        assert!(sec.has_role("reader"));
        assert!(!sec.has_role("admin"));
    }
}
