// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pipeline step contracts and execution.
//!
//! A pipeline is the pre → exec → post chain bound to one action.  Steps
//! are constructed once from registered constructors, frozen into a
//! [`PipelineProcessor`], and invoked concurrently across requests — a step
//! holding per-instance state must make that state thread-safe.
//!
//! Execution is strictly sequential inside one run: no step ever runs in
//! parallel with another step of the same pipeline.  Post-processors may
//! depend on executor side-effects and pre-processors form a dependency
//! chain; the fold order is a correctness guarantee, not an optimization
//! opportunity.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// The shared per-request context bag.
pub mod context;
/// The frozen pre/exec/post processor.
pub mod processor;
/// Built-in step implementations.
pub mod steps;

pub use context::PipelineContext;
pub use processor::PipelineProcessor;

use csh_core::{CanonicalInput, CanonicalOutput, JsonMap};
use csh_error::{CshError, Result};
use std::fmt;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Step traits
// ---------------------------------------------------------------------------

/// A step that refines the canonical input before execution.
#[async_trait::async_trait]
pub trait PreProcessor: Send + Sync {
    /// Step instance name (from its declaration).
    fn name(&self) -> &str;

    /// Produce the next input from the current one.  Inputs are immutable;
    /// return a copy.  An error aborts the pipeline.
    async fn apply(&self, input: CanonicalInput, ctx: &PipelineContext) -> Result<CanonicalInput>;
}

/// The single step that transforms input shape into output shape.
#[async_trait::async_trait]
pub trait Executor: Send + Sync {
    /// Step instance name (from its declaration).
    fn name(&self) -> &str;

    /// Execute the action.
    async fn apply(&self, input: CanonicalInput, ctx: &PipelineContext) -> Result<CanonicalOutput>;
}

/// A step that refines the canonical output after execution.
#[async_trait::async_trait]
pub trait PostProcessor: Send + Sync {
    /// Step instance name (from its declaration).
    fn name(&self) -> &str;

    /// Produce the next output from the current one.
    async fn apply(&self, output: CanonicalOutput, ctx: &PipelineContext)
    -> Result<CanonicalOutput>;
}

// ---------------------------------------------------------------------------
// Step construction
// ---------------------------------------------------------------------------

/// Which pipeline slot a step implementation may occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Pre-processor slot.
    Pre,
    /// Executor slot.
    Exec,
    /// Post-processor slot.
    Post,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pre => "pre-processor",
            Self::Exec => "executor",
            Self::Post => "post-processor",
        };
        f.write_str(s)
    }
}

/// Configuration handed to a step constructor.
///
/// Every constructor receives the full map; implementations that need
/// nothing simply ignore it.
#[derive(Debug, Clone, Default)]
pub struct StepConfig {
    /// Step instance name.
    pub name: String,
    /// Optional template string (statement, annotation, ...).
    pub template: Option<String>,
    /// Step-specific parameters.
    pub params: JsonMap,
}

/// A constructed step, tagged by the slot it may occupy.
#[derive(Clone)]
pub enum StepInstance {
    /// A pre-processor.
    Pre(Arc<dyn PreProcessor>),
    /// An executor.
    Exec(Arc<dyn Executor>),
    /// A post-processor.
    Post(Arc<dyn PostProcessor>),
}

impl std::fmt::Debug for StepInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple(match self {
            Self::Pre(_) => "Pre",
            Self::Exec(_) => "Exec",
            Self::Post(_) => "Post",
        })
        .field(&self.name())
        .finish()
    }
}

impl StepInstance {
    /// The slot this instance may occupy.
    #[must_use]
    pub fn kind(&self) -> StepKind {
        match self {
            Self::Pre(_) => StepKind::Pre,
            Self::Exec(_) => StepKind::Exec,
            Self::Post(_) => StepKind::Post,
        }
    }

    /// The step instance name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Pre(step) => step.name(),
            Self::Exec(step) => step.name(),
            Self::Post(step) => step.name(),
        }
    }
}

/// Constructor for one step implementation, registered by identifier.
pub type StepConstructor = Box<dyn Fn(&StepConfig) -> Result<StepInstance> + Send + Sync>;

/// Step constructors keyed by implementation identifier.
pub type StepCatalog = indexmap::IndexMap<String, StepConstructor>;

/// The built-in step catalog: identity/validation pre-processors, the echo
/// and engine-query executors, and the annotate post-processor.
#[must_use]
pub fn builtin_steps() -> StepCatalog {
    let identity: StepConstructor = Box::new(|config: &StepConfig| {
        Ok(StepInstance::Pre(Arc::new(steps::IdentityPre::new(config))))
    });
    let validate: StepConstructor = Box::new(|config: &StepConfig| {
        Ok(StepInstance::Pre(Arc::new(steps::ValidateRequiredPre::new(
            config,
        )?)))
    });
    let echo: StepConstructor = Box::new(|config: &StepConfig| {
        Ok(StepInstance::Exec(Arc::new(steps::EchoExecutor::new(config))))
    });
    let engine_query: StepConstructor = Box::new(|config: &StepConfig| {
        Ok(StepInstance::Exec(Arc::new(steps::EngineQueryExecutor::new(
            config,
        ))))
    });
    let annotate: StepConstructor = Box::new(|config: &StepConfig| {
        Ok(StepInstance::Post(Arc::new(steps::AnnotatePost::new(config))))
    });

    let mut catalog = StepCatalog::new();
    catalog.insert(steps::IDENTITY_PRE.to_string(), identity);
    catalog.insert(steps::VALIDATE_REQUIRED.to_string(), validate);
    catalog.insert(steps::ECHO_EXECUTOR.to_string(), echo);
    catalog.insert(steps::ENGINE_QUERY_EXECUTOR.to_string(), engine_query);
    catalog.insert(steps::ANNOTATE_POST.to_string(), annotate);
    catalog
}

/// Instantiate a step through the catalog.
///
/// # Errors
///
/// A *configuration* error when the identifier is unknown or the
/// constructor rejects the config.
pub fn construct_step(
    catalog: &StepCatalog,
    implementation: &str,
    config: &StepConfig,
) -> Result<StepInstance> {
    let constructor = catalog.get(implementation).ok_or_else(|| {
        CshError::configuration(format!(
            "unknown step implementation '{implementation}'"
        ))
    })?;
    constructor(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_contains_all_known_steps() {
        let catalog = builtin_steps();
        for id in [
            steps::IDENTITY_PRE,
            steps::VALIDATE_REQUIRED,
            steps::ECHO_EXECUTOR,
            steps::ENGINE_QUERY_EXECUTOR,
            steps::ANNOTATE_POST,
        ] {
            assert!(catalog.contains_key(id), "missing builtin '{id}'");
        }
    }

    #[test]
    fn constructed_steps_carry_their_declared_kind() {
        let catalog = builtin_steps();
        let config = StepConfig {
            name: "s".into(),
            ..Default::default()
        };
        let pre = construct_step(&catalog, steps::IDENTITY_PRE, &config).unwrap();
        assert_eq!(pre.kind(), StepKind::Pre);
        let exec = construct_step(&catalog, steps::ECHO_EXECUTOR, &config).unwrap();
        assert_eq!(exec.kind(), StepKind::Exec);
        let post = construct_step(&catalog, steps::ANNOTATE_POST, &config).unwrap();
        assert_eq!(post.kind(), StepKind::Post);
    }

    #[test]
    fn unknown_implementation_is_a_configuration_error() {
        let catalog = builtin_steps();
        let err = construct_step(&catalog, "no-such-step", &StepConfig::default()).unwrap_err();
        assert!(err.kind().is_configuration());
    }
}
