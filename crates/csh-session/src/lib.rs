// SPDX-License-Identifier: MIT OR Apache-2.0
//! The central task executor.
//!
//! A [`Session`] borrows the three managers (it owns none of them) and is
//! the single funnel from task to pipeline execution.  Start and stop are
//! idempotent; start hooks run in registration order, stop hooks in
//! reverse, with stop-side failures swallowed.
//!
//! Failure translation is the session's job: raised errors become
//! [`TaskResult::Failure`] values whose status category a dispatcher
//! forwards unchanged.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use csh_capability::CapabilityManager;
use csh_core::{meta, CanonicalInput, EntryAccess, JsonMap, SecurityContext, StatusCategory, TaskResult};
use csh_engine::QueryEngineManager;
use csh_error::{CshError, Result};
use csh_pipeline::PipelineContext;
use csh_source::SourceProviderManager;
use indexmap::IndexMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Task and context
// ---------------------------------------------------------------------------

/// A protocol-agnostic unit of work handed to the session.
#[derive(Debug, Clone, Default)]
pub struct SessionTask {
    /// Task data entries.
    pub data: JsonMap,
    /// Task metadata; must carry the capability and action keys.
    pub metadata: JsonMap,
}

/// Identity, tracing, and deadline information for one execution.
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// Logical client session identifier.
    pub session_id: Option<String>,
    /// End-user identifier.
    pub user_id: Option<String>,
    /// Distributed trace correlation identifier.
    pub trace_id: Option<String>,
    /// Pass-through security context.
    pub security: SecurityContext,
    /// Free-form attributes.
    pub attributes: JsonMap,
    /// When the dispatcher built this context.
    pub now: DateTime<Utc>,
    /// Absolute execution deadline.
    pub deadline: Option<DateTime<Utc>>,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self {
            session_id: None,
            user_id: None,
            trace_id: None,
            security: SecurityContext::default(),
            attributes: JsonMap::new(),
            now: Utc::now(),
            deadline: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

/// Extension point fired on session start and stop.
#[async_trait::async_trait]
pub trait SessionHook: Send + Sync {
    /// Hook name, used in logs.
    fn name(&self) -> &str;

    /// Fired during [`Session::start`], in registration order.  An error
    /// aborts the start.
    async fn on_start(&self) -> Result<()> {
        Ok(())
    }

    /// Fired during [`Session::stop`], in reverse registration order.
    /// Failures are logged and swallowed.
    async fn on_stop(&self) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// The one place where a task becomes an execution.
pub struct Session {
    started: AtomicBool,
    capabilities: Arc<CapabilityManager>,
    engines: Arc<QueryEngineManager>,
    sources: Arc<SourceProviderManager>,
    hooks: Vec<Arc<dyn SessionHook>>,
}

impl Session {
    /// Create a session over the three managers.
    #[must_use]
    pub fn new(
        capabilities: Arc<CapabilityManager>,
        engines: Arc<QueryEngineManager>,
        sources: Arc<SourceProviderManager>,
    ) -> Self {
        Self {
            started: AtomicBool::new(false),
            capabilities,
            engines,
            sources,
            hooks: Vec::new(),
        }
    }

    /// Append a lifecycle hook.  Hooks fire in registration order on start
    /// and in reverse order on stop.
    #[must_use]
    pub fn with_hook(mut self, hook: Arc<dyn SessionHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Returns `true` while the session accepts work.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Start the session.  Idempotent: a second call is a no-op.
    ///
    /// # Errors
    ///
    /// The first start-hook failure; the session stays stopped.
    pub async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        for hook in &self.hooks {
            if let Err(err) = hook.on_start().await {
                self.started.store(false, Ordering::SeqCst);
                return Err(err.with_context("hook", hook.name().to_string()));
            }
        }
        debug!(target: "csh.session", hooks = self.hooks.len(), "session started");
        Ok(())
    }

    /// Stop the session.  Idempotent: a second call is a no-op.  Stop
    /// hooks run in reverse registration order; individual failures are
    /// logged and swallowed.
    pub async fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        for hook in self.hooks.iter().rev() {
            if let Err(err) = hook.on_stop().await {
                warn!(
                    target: "csh.session",
                    hook = hook.name(),
                    error = %err,
                    "stop hook failed"
                );
            }
        }
        debug!(target: "csh.session", "session stopped");
    }

    /// Execute a task.
    ///
    /// Resolution failures, step errors, and deadline violations all fold
    /// into [`TaskResult::Failure`] with the category from the session's
    /// translation table.
    ///
    /// # Errors
    ///
    /// Only a *lifecycle* error, when the session is not started; every
    /// other failure is a `TaskResult::Failure` value.
    pub async fn execute(&self, task: SessionTask, ctx: SessionContext) -> Result<TaskResult> {
        if !self.is_started() {
            return Err(CshError::lifecycle("session is not started"));
        }
        match self.run(task, ctx).await {
            Ok(result) => Ok(result),
            Err(err) => {
                debug!(target: "csh.session", error = %err, "task failed");
                let status = StatusCategory::from_error_kind(err.kind());
                let mut metadata = JsonMap::new();
                metadata.insert(
                    "cause".into(),
                    serde_json::Value::from(err.message().to_string()),
                );
                for (key, value) in err.context() {
                    metadata.insert(format!("error.{key}"), value.clone());
                }
                Ok(TaskResult::Failure {
                    status,
                    message: err.message().to_string(),
                    metadata,
                })
            }
        }
    }

    async fn run(&self, task: SessionTask, ctx: SessionContext) -> Result<TaskResult> {
        // Resolve the capability and action from task metadata; both are
        // required, typed strings.
        let capability_name = task.metadata.require_str(meta::CAPABILITY)?.to_string();
        let capability = self.capabilities.get(&capability_name)?;
        let action = task.metadata.require_str(meta::ACTION)?.to_string();
        let processor = capability.processor(&action).ok_or_else(|| {
            CshError::bad_request(format!(
                "capability '{capability_name}' has no action '{action}'"
            ))
        })?;

        // Bind the capability's engine and sources for this run.
        let engine = match capability.engine_ref() {
            Some(name) => Some(self.engines.get(name)?),
            None => None,
        };
        let mut sources = IndexMap::new();
        for name in capability.source_refs() {
            sources.insert(name.clone(), self.sources.get(name)?);
        }

        // Canonical input: the payload's data entries become the input
        // data; the metadata bundle carries the capability name and timing
        // marks.  Live handles ride on the pipeline context, not in the
        // metadata map.
        let data = extract_object(&task.data, meta::PAYLOAD_DATA)
            .unwrap_or_else(|| task.data.clone());
        let mut metadata = task.metadata.clone();
        if let Some(parameters) = task.data.get(meta::PAYLOAD_PARAMETERS) {
            metadata.insert(meta::PAYLOAD_PARAMETERS.into(), parameters.clone());
        }
        metadata.insert(
            meta::SESSION_ACCEPTED_AT.into(),
            serde_json::Value::from(Utc::now().to_rfc3339()),
        );
        let input = CanonicalInput::from_parts(processor.input_shape(), data, metadata);

        let mut pctx = PipelineContext::new()
            .with_deadline(ctx.deadline)
            .with_sources(sources);
        if let Some(engine) = engine {
            pctx = pctx.with_engine(engine);
        }
        pctx.session_id = ctx.session_id;
        pctx.user_id = ctx.user_id;
        pctx.trace_id = ctx.trace_id;
        pctx.security = ctx.security;
        pctx.arrived_at = ctx.now;
        for (key, value) in &ctx.attributes {
            pctx.set(key.clone(), value.clone());
        }

        debug!(
            target: "csh.session",
            capability = %capability_name,
            action = %action,
            pipeline = processor.name(),
            "executing"
        );
        let output = processor.execute(input, &pctx).await?;
        let (data, metadata) = output.into_parts();
        Ok(TaskResult::success(data, metadata))
    }
}

/// Pull a nested object entry out of a task data map, as a `JsonMap`.
fn extract_object(map: &JsonMap, key: &str) -> Option<JsonMap> {
    map.get(key).and_then(|value| {
        value
            .as_object()
            .map(|obj| obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    })
}
