// SPDX-License-Identifier: MIT OR Apache-2.0
//! Query-engine contracts and lifecycle.
//!
//! An [`Engine`] evaluates logical queries using one or more sources.  It
//! never owns sources: it holds their *names* and resolves them through the
//! source registry at execution time.  The manager enriches each engine's
//! raw configuration with the resolved configurations of its referenced
//! sources, so an engine factory sees a self-contained record.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// The passthrough engine (forwards to a single source).
pub mod passthrough;

use chrono::{DateTime, Utc};
use csh_config::{EngineSpec, SourceSpec};
use csh_core::JsonMap;
use csh_error::{CshError, Result};
use csh_lifecycle::LifecycleComponent;
use csh_registry::Registry;
use csh_source::SourceProviderManager;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

// ---------------------------------------------------------------------------
// Queries and results
// ---------------------------------------------------------------------------

/// A logical query handed to an engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogicalQuery {
    /// Engine-specific statement text.
    pub statement: String,
    /// Named statement parameters.
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub params: JsonMap,
    /// Name of the source to evaluate against, when the engine binds more
    /// than one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl LogicalQuery {
    /// Create a query from a statement with no parameters.
    pub fn new(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            params: JsonMap::new(),
            target: None,
        }
    }
}

/// Result of evaluating a [`LogicalQuery`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineResult {
    /// Result rows, in engine order.
    pub rows: Vec<JsonMap>,
    /// Engine-specific result metadata.
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub metadata: JsonMap,
}

/// Per-call execution context visible to an engine.
#[derive(Debug, Clone, Default)]
pub struct EngineContext {
    /// Distributed trace correlation identifier.
    pub trace_id: Option<String>,
    /// Absolute deadline the engine should observe.
    pub deadline: Option<DateTime<Utc>>,
    /// Free-form attributes.
    pub attributes: JsonMap,
}

// ---------------------------------------------------------------------------
// Typed engine config
// ---------------------------------------------------------------------------

/// Typed configuration an engine factory adapter produces.
///
/// `sources` carries *copies* of the resolved source configurations, so the
/// record is self-contained.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Engine name (the spec key).
    pub name: String,
    /// Config kind tag; must match the factory's declared kind.
    pub kind: String,
    /// Resolved configurations of the referenced sources, by name.
    #[serde(default)]
    pub sources: IndexMap<String, SourceSpec>,
    /// Engine-specific extras.
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub extras: JsonMap,
}

// ---------------------------------------------------------------------------
// Engine contract
// ---------------------------------------------------------------------------

/// Evaluates logical queries against sources it references by name.
///
/// Implementations must be internally thread-safe for reads; `close` is
/// called exactly once by the manager.
#[async_trait::async_trait]
pub trait Engine: Send + Sync {
    /// The engine's name; must equal the spec key it was declared under.
    fn name(&self) -> &str;

    /// Bring the engine up.  Sources are already open when this runs.
    ///
    /// # Errors
    ///
    /// A *connection* error when the engine cannot come up.
    async fn open(&self) -> Result<()>;

    /// Bring the engine down.
    ///
    /// # Errors
    ///
    /// A *connection* error when teardown fails.
    async fn close(&self) -> Result<()>;

    /// Evaluate a query.
    ///
    /// # Errors
    ///
    /// *connection* when a referenced source is unavailable; *execution*
    /// for evaluation failures; *timeout* when the context deadline is
    /// observed to have passed.
    async fn execute(&self, query: LogicalQuery, ctx: &EngineContext) -> Result<EngineResult>;

    /// Cheap syntactic check; `true` when the query is executable.
    fn validate(&self, query: &LogicalQuery) -> bool;

    /// Human-readable evaluation plan.
    fn explain(&self, query: &LogicalQuery) -> String;

    /// Whether [`Engine::execute`] results can be streamed incrementally.
    fn supports_streaming(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// Factory contract
// ---------------------------------------------------------------------------

/// Materializes engines of one kind.
#[async_trait::async_trait]
pub trait QueryEngineFactory: Send + Sync {
    /// Factory identifier referenced from configuration.
    fn id(&self) -> &str;

    /// The config kind tag this factory's adapter produces.
    fn config_kind(&self) -> &str;

    /// Adapt a raw spec entry (enriched with resolved source configs) into
    /// this factory's typed config.
    ///
    /// # Errors
    ///
    /// A *configuration* error for malformed entries.
    fn adapt(
        &self,
        name: &str,
        spec: &EngineSpec,
        resolved_sources: &IndexMap<String, SourceSpec>,
    ) -> Result<EngineConfig>;

    /// Validate an adapted config.
    ///
    /// # Errors
    ///
    /// A *configuration* error describing what is wrong.
    fn validate(&self, config: &EngineConfig) -> Result<()>;

    /// Create an engine from a validated config.
    ///
    /// `sources` is the live source manager the engine uses for name-based
    /// lookups; the engine must not assume ownership.
    ///
    /// # Errors
    ///
    /// A *configuration* or *connection* error.
    async fn create(
        &self,
        config: EngineConfig,
        sources: Arc<SourceProviderManager>,
    ) -> Result<Arc<dyn Engine>>;
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Owns the lifecycle of every configured engine.
pub struct QueryEngineManager {
    specs: IndexMap<String, EngineSpec>,
    source_specs: IndexMap<String, SourceSpec>,
    factories: IndexMap<String, Arc<dyn QueryEngineFactory>>,
    sources: Arc<SourceProviderManager>,
    registry: Registry<dyn Engine>,
}

impl QueryEngineManager {
    /// Create a manager over the configured engine specs, the raw source
    /// specs (for enrichment), the discovered factories, and the live
    /// source manager.
    #[must_use]
    pub fn new(
        specs: IndexMap<String, EngineSpec>,
        source_specs: IndexMap<String, SourceSpec>,
        factories: IndexMap<String, Arc<dyn QueryEngineFactory>>,
        sources: Arc<SourceProviderManager>,
    ) -> Self {
        let registry: Registry<dyn Engine> = Registry::new(
            "engines",
            Box::new(|name, engine: Arc<dyn Engine>| {
                Box::pin(async move {
                    engine
                        .close()
                        .await
                        .map_err(|err| err.with_context("engine", name))
                })
            }),
        );
        Self {
            specs,
            source_specs,
            factories,
            sources,
            registry,
        }
    }

    /// Resolve, enrich, adapt, validate, create, open, and register every
    /// engine.
    ///
    /// # Errors
    ///
    /// The first *configuration* / *connection* error encountered.
    pub async fn initialize(&self) -> Result<()> {
        for (name, spec) in &self.specs {
            let factory = self.factories.get(&spec.factory).ok_or_else(|| {
                CshError::configuration(format!(
                    "engine '{name}': unknown engine factory '{}'",
                    spec.factory
                ))
            })?;

            // Enrich: copy the resolved configuration of every referenced
            // source so the factory sees a self-contained record.
            let mut resolved: IndexMap<String, SourceSpec> = IndexMap::new();
            for source_name in &spec.sources {
                let source_spec = self.source_specs.get(source_name).ok_or_else(|| {
                    CshError::configuration(format!(
                        "engine '{name}': referenced source '{source_name}' does not exist"
                    ))
                })?;
                resolved.insert(source_name.clone(), source_spec.clone());
            }

            let config = factory
                .adapt(name, spec, &resolved)
                .map_err(|err| err.with_context("engine", name.clone()))?;
            if config.kind != factory.config_kind() {
                return Err(CshError::configuration(format!(
                    "engine '{name}': adapter produced config kind '{}', factory '{}' declares '{}'",
                    config.kind,
                    factory.id(),
                    factory.config_kind()
                )));
            }
            factory
                .validate(&config)
                .map_err(|err| err.with_context("engine", name.clone()))?;

            let engine = factory
                .create(config, Arc::clone(&self.sources))
                .await
                .map_err(|err| err.with_context("engine", name.clone()))?;
            if engine.name() != name {
                return Err(CshError::configuration(format!(
                    "engine '{name}': created engine reports name '{}'",
                    engine.name()
                )));
            }
            engine
                .open()
                .await
                .map_err(|err| err.with_context("engine", name.clone()))?;

            self.registry
                .register(engine.name().to_string(), engine)
                .map_err(|err| CshError::configuration(err.to_string()))?;
            info!(target: "csh.engine", engine = %name, factory = %spec.factory, "engine ready");
        }
        Ok(())
    }

    /// Look up an open engine by name.
    ///
    /// # Errors
    ///
    /// An *internal* error when the name is not registered.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Engine>> {
        self.registry
            .get(name)
            .map_err(|err| CshError::internal(err.to_string()))
    }

    /// The underlying registry.
    #[must_use]
    pub fn registry(&self) -> &Registry<dyn Engine> {
        &self.registry
    }

    /// Close every engine in reverse registration order, swallowing
    /// per-engine failures.
    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }
}

#[async_trait::async_trait]
impl LifecycleComponent for QueryEngineManager {
    fn name(&self) -> &str {
        "query-engine-manager"
    }

    async fn initialize(&self) -> Result<()> {
        QueryEngineManager::initialize(self).await
    }

    async fn shutdown(&self) -> Result<()> {
        QueryEngineManager::shutdown(self).await;
        Ok(())
    }
}
