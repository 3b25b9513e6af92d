// SPDX-License-Identifier: MIT OR Apache-2.0
//! The shared per-request context bag.
//!
//! One [`PipelineContext`] accompanies one pipeline run.  It carries the
//! request's identity and deadline, the live engine and source handles the
//! session resolved for the capability, and a mutable value bag steps use
//! for cross-step communication.  The value bag is the only mutable part;
//! canonical inputs and outputs stay immutable.

use chrono::{DateTime, Utc};
use csh_core::{JsonMap, SecurityContext};
use csh_engine::{Engine, EngineContext};
use csh_error::{CshError, Result};
use csh_source::Source;
use indexmap::IndexMap;
use std::sync::{Arc, Mutex};

/// Per-run execution context shared by every step of one pipeline run.
pub struct PipelineContext {
    /// Logical client session identifier.
    pub session_id: Option<String>,
    /// End-user identifier.
    pub user_id: Option<String>,
    /// Distributed trace correlation identifier.
    pub trace_id: Option<String>,
    /// Pass-through security context.
    pub security: SecurityContext,
    /// When the session accepted the task.
    pub arrived_at: DateTime<Utc>,
    /// Absolute deadline for the whole run.
    pub deadline: Option<DateTime<Utc>>,
    engine: Option<Arc<dyn Engine>>,
    sources: IndexMap<String, Arc<dyn Source>>,
    values: Mutex<JsonMap>,
}

impl PipelineContext {
    /// Create a context with no identity, no deadline, and no resources.
    #[must_use]
    pub fn new() -> Self {
        Self {
            session_id: None,
            user_id: None,
            trace_id: None,
            security: SecurityContext::default(),
            arrived_at: Utc::now(),
            deadline: None,
            engine: None,
            sources: IndexMap::new(),
            values: Mutex::new(JsonMap::new()),
        }
    }

    /// Attach the engine resolved for the capability.
    #[must_use]
    pub fn with_engine(mut self, engine: Arc<dyn Engine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Attach the sources resolved for the capability.
    #[must_use]
    pub fn with_sources(mut self, sources: IndexMap<String, Arc<dyn Source>>) -> Self {
        self.sources = sources;
        self
    }

    /// Set the run deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Option<DateTime<Utc>>) -> Self {
        self.deadline = deadline;
        self
    }

    /// The engine bound to this run, if the capability declares one.
    #[must_use]
    pub fn engine(&self) -> Option<Arc<dyn Engine>> {
        self.engine.clone()
    }

    /// Look up one of the capability's sources by name.
    #[must_use]
    pub fn source(&self, name: &str) -> Option<Arc<dyn Source>> {
        self.sources.get(name).cloned()
    }

    /// Names of the sources bound to this run, in declaration order.
    #[must_use]
    pub fn source_names(&self) -> Vec<String> {
        self.sources.keys().cloned().collect()
    }

    /// Store a cross-step value.
    pub fn set(&self, key: impl Into<String>, value: serde_json::Value) {
        self.values
            .lock()
            .expect("context values lock poisoned")
            .insert(key.into(), value);
    }

    /// Read back a cross-step value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.values
            .lock()
            .expect("context values lock poisoned")
            .get(key)
            .cloned()
    }

    /// Record a timestamp under `key`, only if one is not already present.
    pub fn mark(&self, key: &str) {
        let mut values = self.values.lock().expect("context values lock poisoned");
        if !values.contains_key(key) {
            values.insert(
                key.to_string(),
                serde_json::Value::from(Utc::now().to_rfc3339()),
            );
        }
    }

    /// Snapshot of the cross-step value bag.
    #[must_use]
    pub fn values(&self) -> JsonMap {
        self.values
            .lock()
            .expect("context values lock poisoned")
            .clone()
    }

    /// Returns `true` when the deadline is set and has passed.
    #[must_use]
    pub fn deadline_exceeded(&self) -> bool {
        self.deadline.is_some_and(|d| Utc::now() > d)
    }

    /// Fail with a *timeout* error when the deadline has passed.
    ///
    /// Steps are expected to call this between units of work; the
    /// framework calls it between steps.
    ///
    /// # Errors
    ///
    /// A *timeout* error naming the deadline.
    pub fn check_deadline(&self) -> Result<()> {
        match self.deadline {
            Some(deadline) if Utc::now() > deadline => Err(CshError::timeout(format!(
                "deadline {deadline} exceeded"
            ))),
            _ => Ok(()),
        }
    }

    /// Project the engine-facing slice of this context.
    #[must_use]
    pub fn engine_context(&self) -> EngineContext {
        EngineContext {
            trace_id: self.trace_id.clone(),
            deadline: self.deadline,
            attributes: self.values(),
        }
    }
}

impl Default for PipelineContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContext")
            .field("session_id", &self.session_id)
            .field("user_id", &self.user_id)
            .field("trace_id", &self.trace_id)
            .field("deadline", &self.deadline)
            .field("sources", &self.source_names())
            .field("has_engine", &self.engine.is_some())
            .finish()
    }
}
