// SPDX-License-Identifier: MIT OR Apache-2.0
//! Capability materialization and pipeline assembly.
//!
//! A [`Capability`] groups the actions that share data sources, an engine,
//! an exposure, and a transport.  The [`CapabilityManager`] materializes
//! capabilities from the frozen spec during the capabilities lifecycle
//! phase: it resolves the exposure (missing is fatal) and transport
//! (missing falls back to an empty record with a warning), builds one
//! [`PipelineProcessor`] per action through the registered step
//! constructors, and registers the result.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use csh_config::{CapabilitySpec, ExposureSpec, StepDef, TransportSpec};
use csh_core::ShapeKind;
use csh_error::{CshError, Result};
use csh_lifecycle::LifecycleComponent;
use csh_pipeline::{
    construct_step, Executor, PipelineProcessor, PostProcessor, PreProcessor, StepCatalog,
    StepConfig, StepInstance,
};
use csh_registry::Registry;
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Capability
// ---------------------------------------------------------------------------

/// A materialized capability: resolved exposure/transport plus one frozen
/// pipeline per action.
pub struct Capability {
    name: String,
    description: Option<String>,
    domain: Option<String>,
    exposure: ExposureSpec,
    transport: TransportSpec,
    source_refs: Vec<String>,
    engine_ref: Option<String>,
    pipelines: IndexMap<String, Arc<PipelineProcessor>>,
}

impl Capability {
    /// Capability name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human-readable description, when declared.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Domain grouping label, when declared.
    #[must_use]
    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    /// The resolved exposure.
    #[must_use]
    pub fn exposure(&self) -> &ExposureSpec {
        &self.exposure
    }

    /// The resolved transport (possibly the empty fallback record).
    #[must_use]
    pub fn transport(&self) -> &TransportSpec {
        &self.transport
    }

    /// Names of the sources available to this capability, in declaration
    /// order.
    #[must_use]
    pub fn source_refs(&self) -> &[String] {
        &self.source_refs
    }

    /// Name of the bound engine, when the capability declares one.
    #[must_use]
    pub fn engine_ref(&self) -> Option<&str> {
        self.engine_ref.as_deref()
    }

    /// Action names, in declaration order.
    #[must_use]
    pub fn actions(&self) -> Vec<&str> {
        self.pipelines.keys().map(String::as_str).collect()
    }

    /// The pipeline bound to `action`, if the action exists.
    #[must_use]
    pub fn processor(&self, action: &str) -> Option<Arc<PipelineProcessor>> {
        self.pipelines.get(action).cloned()
    }
}

impl std::fmt::Debug for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capability")
            .field("name", &self.name)
            .field("domain", &self.domain)
            .field("actions", &self.actions())
            .field("sources", &self.source_refs)
            .field("engine", &self.engine_ref)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Materializes and owns every configured capability.
pub struct CapabilityManager {
    capabilities: IndexMap<String, CapabilitySpec>,
    exposures: IndexMap<String, ExposureSpec>,
    transports: IndexMap<String, TransportSpec>,
    steps: Arc<StepCatalog>,
    registry: Registry<Capability>,
}

impl CapabilityManager {
    /// Create a manager over the frozen spec sections and the step catalog.
    #[must_use]
    pub fn new(
        capabilities: IndexMap<String, CapabilitySpec>,
        exposures: IndexMap<String, ExposureSpec>,
        transports: IndexMap<String, TransportSpec>,
        steps: Arc<StepCatalog>,
    ) -> Self {
        Self {
            capabilities,
            exposures,
            transports,
            steps,
            registry: Registry::noop("capabilities"),
        }
    }

    /// Materialize and register every capability.
    ///
    /// # Errors
    ///
    /// The first *configuration* error, tagged with capability (and action)
    /// context; the whole phase fails.
    pub async fn initialize(&self) -> Result<()> {
        for (name, spec) in &self.capabilities {
            let capability = self
                .build_capability(name, spec)
                .map_err(|err| err.with_context("capability", name.clone()))?;
            self.registry
                .register(name.clone(), Arc::new(capability))
                .map_err(|err| CshError::configuration(err.to_string()))?;
            info!(target: "csh.capability", capability = %name, "capability ready");
        }
        Ok(())
    }

    fn build_capability(&self, name: &str, spec: &CapabilitySpec) -> Result<Capability> {
        let exposure = self
            .exposures
            .get(&spec.exposure)
            .cloned()
            .ok_or_else(|| {
                CshError::configuration(format!("exposure '{}' does not exist", spec.exposure))
            })?;
        let transport = match self.transports.get(&spec.transport) {
            Some(transport) => transport.clone(),
            None => {
                warn!(
                    target: "csh.capability",
                    capability = %name,
                    transport = %spec.transport,
                    "transport not found; using empty transport record"
                );
                TransportSpec::default()
            }
        };

        let mut pipelines: IndexMap<String, Arc<PipelineProcessor>> = IndexMap::new();
        for (action, def) in &spec.actions {
            let pipeline_spec = spec.pipelines.get(&def.pipeline).ok_or_else(|| {
                CshError::configuration(format!(
                    "action '{action}' references unknown pipeline '{}'",
                    def.pipeline
                ))
                .with_context("action", action.clone())
            })?;
            let processor = self
                .build_processor(&def.pipeline, pipeline_spec)
                .map_err(|err| err.with_context("action", action.clone()))?;
            pipelines.insert(action.clone(), Arc::new(processor));
        }

        Ok(Capability {
            name: name.to_string(),
            description: spec.description.clone(),
            domain: spec.domain.clone(),
            exposure,
            transport,
            source_refs: spec.sources.clone(),
            engine_ref: spec.engine.clone(),
            pipelines,
        })
    }

    fn build_processor(
        &self,
        pipeline_name: &str,
        spec: &csh_config::PipelineSpec,
    ) -> Result<PipelineProcessor> {
        let input_shape: ShapeKind = spec
            .input
            .parse()
            .map_err(|err: CshError| err.with_context("pipeline", pipeline_name.to_string()))?;
        let output_shape: ShapeKind = spec
            .output
            .parse()
            .map_err(|err: CshError| err.with_context("pipeline", pipeline_name.to_string()))?;

        let mut pre: Vec<Arc<dyn PreProcessor>> = Vec::with_capacity(spec.steps.pre.len());
        for def in &spec.steps.pre {
            match self.instantiate(def)? {
                StepInstance::Pre(step) => pre.push(step),
                other => {
                    return Err(CshError::configuration(format!(
                        "step '{}' is a {} and cannot occupy a pre slot",
                        def.name,
                        other.kind()
                    )));
                }
            }
        }

        let exec_def = spec.steps.execute.as_ref().ok_or_else(|| {
            CshError::configuration(format!(
                "pipeline '{pipeline_name}' declares no executor step"
            ))
        })?;
        let exec: Arc<dyn Executor> = match self.instantiate(exec_def)? {
            StepInstance::Exec(step) => step,
            other => {
                return Err(CshError::configuration(format!(
                    "step '{}' is a {} and cannot occupy the executor slot",
                    exec_def.name,
                    other.kind()
                )));
            }
        };

        let mut post: Vec<Arc<dyn PostProcessor>> = Vec::with_capacity(spec.steps.post.len());
        for def in &spec.steps.post {
            match self.instantiate(def)? {
                StepInstance::Post(step) => post.push(step),
                other => {
                    return Err(CshError::configuration(format!(
                        "step '{}' is a {} and cannot occupy a post slot",
                        def.name,
                        other.kind()
                    )));
                }
            }
        }

        Ok(PipelineProcessor::new(
            pipeline_name,
            input_shape,
            output_shape,
            pre,
            exec,
            post,
        ))
    }

    fn instantiate(&self, def: &StepDef) -> Result<StepInstance> {
        let config = StepConfig {
            name: def.name.clone(),
            template: def.template.clone(),
            params: def.params.clone(),
        };
        construct_step(&self.steps, &def.implementation, &config)
            .map_err(|err| err.with_context("step", def.name.clone()))
    }

    /// Look up a capability by name.
    ///
    /// # Errors
    ///
    /// A *bad-request* error when unknown (request-time lookups).
    pub fn get(&self, name: &str) -> Result<Arc<Capability>> {
        self.registry
            .get(name)
            .map_err(|err| CshError::bad_request(err.to_string()).with_context("capability", name))
    }

    /// The underlying registry.
    #[must_use]
    pub fn registry(&self) -> &Registry<Capability> {
        &self.registry
    }

    /// Drop every capability, in reverse registration order.
    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }
}

#[async_trait::async_trait]
impl LifecycleComponent for CapabilityManager {
    fn name(&self) -> &str {
        "capability-manager"
    }

    async fn initialize(&self) -> Result<()> {
        CapabilityManager::initialize(self).await
    }

    async fn shutdown(&self) -> Result<()> {
        CapabilityManager::shutdown(self).await;
        Ok(())
    }
}
