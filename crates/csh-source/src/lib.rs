// SPDX-License-Identifier: MIT OR Apache-2.0
//! Source-provider contracts and lifecycle.
//!
//! A [`Source`] is a data-access component that owns its connections
//! outright; the framework never touches pool internals.  Sources are
//! materialized by [`SourceProviderFactory`] implementations declared in
//! configuration, opened during the source-providers lifecycle phase,
//! registered by name, and closed in reverse registration order on
//! shutdown.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// The in-memory provider (tables of JSON rows).
pub mod memory;

use csh_config::{PoolSpec, SourceSpec};
use csh_core::JsonMap;
use csh_error::{CshError, Result};
use csh_lifecycle::LifecycleComponent;
use csh_registry::Registry;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

// ---------------------------------------------------------------------------
// Queries and results
// ---------------------------------------------------------------------------

/// A query handed to a source for execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceQuery {
    /// Provider-specific statement text.
    pub statement: String,
    /// Named statement parameters.
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub params: JsonMap,
}

impl SourceQuery {
    /// Create a query from a statement with no parameters.
    pub fn new(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            params: JsonMap::new(),
        }
    }
}

/// Result of executing a [`SourceQuery`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceResult {
    /// Result rows, in source order.
    pub rows: Vec<JsonMap>,
    /// Number of rows affected by a mutating statement.
    pub affected: u64,
    /// Provider-specific result metadata.
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub metadata: JsonMap,
}

// ---------------------------------------------------------------------------
// Typed source config
// ---------------------------------------------------------------------------

/// Typed configuration a factory adapter produces from a raw [`SourceSpec`].
///
/// The `kind` tag must match the factory's declared config kind; the
/// manager rejects mismatches before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Source name (the spec key).
    pub name: String,
    /// Config kind tag.
    pub kind: String,
    /// Connection options.
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub connection: JsonMap,
    /// Pool tuning, when the provider pools connections.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool: Option<PoolSpec>,
    /// Provider-specific extras.
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub extras: JsonMap,
}

// ---------------------------------------------------------------------------
// Source contract
// ---------------------------------------------------------------------------

/// A data-access component owning its connections.
///
/// Implementations must be internally thread-safe: engines and pipeline
/// steps invoke the same source concurrently from many request workers.
#[async_trait::async_trait]
pub trait Source: Send + Sync {
    /// Open the source, blocking until it is ready.  Idempotent.
    ///
    /// # Errors
    ///
    /// A *connection* error when the source cannot come up.
    async fn open(&self) -> Result<()>;

    /// Close the source and release all pooled resources.  Idempotent.
    ///
    /// # Errors
    ///
    /// A *connection* error when teardown fails.
    async fn close(&self) -> Result<()>;

    /// Returns `true` while the source is open.
    fn is_open(&self) -> bool;

    /// The typed configuration this source was created from.
    fn config(&self) -> &SourceConfig;

    /// Execute a query.
    ///
    /// # Errors
    ///
    /// A *connection* error when the source is closed; provider-specific
    /// errors otherwise.
    async fn execute(&self, query: SourceQuery) -> Result<SourceResult>;
}

impl std::fmt::Debug for dyn Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Source").field(self.config()).finish()
    }
}

// ---------------------------------------------------------------------------
// Factory contract
// ---------------------------------------------------------------------------

/// Materializes sources of one provider kind.
#[async_trait::async_trait]
pub trait SourceProviderFactory: Send + Sync {
    /// Factory identifier referenced from configuration.
    fn id(&self) -> &str;

    /// The config kind tag this factory's adapter produces.
    fn config_kind(&self) -> &str;

    /// Adapt a raw spec entry into this factory's typed config.
    ///
    /// # Errors
    ///
    /// A *configuration* error for malformed entries.
    fn adapt(&self, name: &str, spec: &SourceSpec) -> Result<SourceConfig>;

    /// Validate an adapted config.
    ///
    /// # Errors
    ///
    /// A *configuration* error describing what is wrong.
    fn validate(&self, config: &SourceConfig) -> Result<()>;

    /// Create a source from a validated config.  The source is not yet
    /// open.
    ///
    /// # Errors
    ///
    /// A *configuration* or *connection* error.
    async fn create(&self, config: SourceConfig) -> Result<Arc<dyn Source>>;
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Owns the lifecycle of every configured source.
pub struct SourceProviderManager {
    specs: IndexMap<String, SourceSpec>,
    factories: IndexMap<String, Arc<dyn SourceProviderFactory>>,
    registry: Registry<dyn Source>,
}

impl SourceProviderManager {
    /// Create a manager over the configured source specs and the discovered
    /// provider factories.
    #[must_use]
    pub fn new(
        specs: IndexMap<String, SourceSpec>,
        factories: IndexMap<String, Arc<dyn SourceProviderFactory>>,
    ) -> Self {
        let registry: Registry<dyn Source> = Registry::new(
            "sources",
            Box::new(|name, source: Arc<dyn Source>| {
                Box::pin(async move {
                    source
                        .close()
                        .await
                        .map_err(|err| err.with_context("source", name))
                })
            }),
        );
        Self {
            specs,
            factories,
            registry,
        }
    }

    /// Resolve, adapt, validate, create, open, and register every source.
    ///
    /// # Errors
    ///
    /// The first *configuration* / *connection* error encountered; the
    /// whole phase fails.
    pub async fn initialize(&self) -> Result<()> {
        for (name, spec) in &self.specs {
            let factory = self.factories.get(&spec.factory).ok_or_else(|| {
                CshError::configuration(format!(
                    "source '{name}': unknown provider factory '{}'",
                    spec.factory
                ))
            })?;

            let config = factory
                .adapt(name, spec)
                .map_err(|err| err.with_context("source", name.clone()))?;
            if config.kind != factory.config_kind() {
                return Err(CshError::configuration(format!(
                    "source '{name}': adapter produced config kind '{}', factory '{}' declares '{}'",
                    config.kind,
                    factory.id(),
                    factory.config_kind()
                )));
            }
            factory
                .validate(&config)
                .map_err(|err| err.with_context("source", name.clone()))?;

            let source = factory
                .create(config)
                .await
                .map_err(|err| err.with_context("source", name.clone()))?;
            source
                .open()
                .await
                .map_err(|err| err.with_context("source", name.clone()))?;

            self.registry
                .register(name.clone(), source)
                .map_err(|err| CshError::configuration(err.to_string()))?;
            info!(target: "csh.source", source = %name, factory = %spec.factory, "source ready");
        }
        Ok(())
    }

    /// Look up an open source by name.
    ///
    /// # Errors
    ///
    /// An *internal* error when the name is not registered (configuration
    /// validation guarantees referenced names exist).
    pub fn get(&self, name: &str) -> Result<Arc<dyn Source>> {
        self.registry
            .get(name)
            .map_err(|err| CshError::internal(err.to_string()))
    }

    /// The underlying registry.
    #[must_use]
    pub fn registry(&self) -> &Registry<dyn Source> {
        &self.registry
    }

    /// Close every source in reverse registration order, swallowing
    /// per-source failures.
    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }
}

#[async_trait::async_trait]
impl LifecycleComponent for SourceProviderManager {
    fn name(&self) -> &str {
        "source-provider-manager"
    }

    async fn initialize(&self) -> Result<()> {
        SourceProviderManager::initialize(self).await
    }

    async fn shutdown(&self) -> Result<()> {
        SourceProviderManager::shutdown(self).await;
        Ok(())
    }
}
