// SPDX-License-Identifier: MIT OR Apache-2.0
//! Plug-in discovery.
//!
//! Factories publish themselves into a [`PluginCatalog`] once, at process
//! start, keyed by the identifier configuration refers to them by.  After
//! assembly the catalog is read-only and lookups are pure map reads — the
//! managers receive the slice of the catalog they need and never register
//! anything themselves.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use csh_dispatch::server::{ChannelHub, ChannelServerFactory, ServerFactory};
use csh_engine::passthrough::PassthroughEngineFactory;
use csh_engine::QueryEngineFactory;
use csh_error::{CshError, Result};
use csh_pipeline::{builtin_steps, StepCatalog, StepConstructor};
use csh_source::memory::MemorySourceFactory;
use csh_source::SourceProviderFactory;
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::debug;

/// Registry of every factory implementation, keyed by identifier.
pub struct PluginCatalog {
    sources: IndexMap<String, Arc<dyn SourceProviderFactory>>,
    engines: IndexMap<String, Arc<dyn QueryEngineFactory>>,
    servers: IndexMap<String, Arc<dyn ServerFactory>>,
    steps: StepCatalog,
}

impl PluginCatalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sources: IndexMap::new(),
            engines: IndexMap::new(),
            servers: IndexMap::new(),
            steps: StepCatalog::new(),
        }
    }

    /// Create a catalog pre-loaded with every built-in implementation: the
    /// `memory` source provider, the `passthrough` engine, the `channel`
    /// server (attached to the given hub), and the built-in steps.
    #[must_use]
    pub fn with_builtins(hub: Arc<ChannelHub>) -> Self {
        let mut catalog = Self::new();
        catalog
            .register_source_factory(Arc::new(MemorySourceFactory))
            .expect("builtin source factory ids are unique");
        catalog
            .register_engine_factory(Arc::new(PassthroughEngineFactory))
            .expect("builtin engine factory ids are unique");
        catalog
            .register_server_factory(Arc::new(ChannelServerFactory::new(hub)))
            .expect("builtin server factory ids are unique");
        for (id, constructor) in builtin_steps() {
            catalog
                .register_step(id, constructor)
                .expect("builtin step ids are unique");
        }
        catalog
    }

    /// Register a source-provider factory under its declared id.
    ///
    /// # Errors
    ///
    /// A *configuration* error on a duplicate id.
    pub fn register_source_factory(
        &mut self,
        factory: Arc<dyn SourceProviderFactory>,
    ) -> Result<()> {
        let id = factory.id().to_string();
        if self.sources.contains_key(&id) {
            return Err(CshError::configuration(format!(
                "source factory '{id}' is already registered"
            )));
        }
        debug!(target: "csh.plugin", kind = "source", id = %id, "factory registered");
        self.sources.insert(id, factory);
        Ok(())
    }

    /// Register a query-engine factory under its declared id.
    ///
    /// # Errors
    ///
    /// A *configuration* error on a duplicate id.
    pub fn register_engine_factory(&mut self, factory: Arc<dyn QueryEngineFactory>) -> Result<()> {
        let id = factory.id().to_string();
        if self.engines.contains_key(&id) {
            return Err(CshError::configuration(format!(
                "engine factory '{id}' is already registered"
            )));
        }
        debug!(target: "csh.plugin", kind = "engine", id = %id, "factory registered");
        self.engines.insert(id, factory);
        Ok(())
    }

    /// Register a server factory under its declared id.
    ///
    /// # Errors
    ///
    /// A *configuration* error on a duplicate id.
    pub fn register_server_factory(&mut self, factory: Arc<dyn ServerFactory>) -> Result<()> {
        let id = factory.id().to_string();
        if self.servers.contains_key(&id) {
            return Err(CshError::configuration(format!(
                "server factory '{id}' is already registered"
            )));
        }
        debug!(target: "csh.plugin", kind = "server", id = %id, "factory registered");
        self.servers.insert(id, factory);
        Ok(())
    }

    /// Register a pipeline step constructor under an implementation id.
    ///
    /// # Errors
    ///
    /// A *configuration* error on a duplicate id.
    pub fn register_step(
        &mut self,
        id: impl Into<String>,
        constructor: StepConstructor,
    ) -> Result<()> {
        let id = id.into();
        if self.steps.contains_key(&id) {
            return Err(CshError::configuration(format!(
                "step implementation '{id}' is already registered"
            )));
        }
        debug!(target: "csh.plugin", kind = "step", id = %id, "constructor registered");
        self.steps.insert(id, constructor);
        Ok(())
    }

    /// Source-provider factories, by id.
    #[must_use]
    pub fn source_factories(&self) -> IndexMap<String, Arc<dyn SourceProviderFactory>> {
        self.sources.clone()
    }

    /// Query-engine factories, by id.
    #[must_use]
    pub fn engine_factories(&self) -> IndexMap<String, Arc<dyn QueryEngineFactory>> {
        self.engines.clone()
    }

    /// Server factories, by id.
    #[must_use]
    pub fn server_factories(&self) -> IndexMap<String, Arc<dyn ServerFactory>> {
        self.servers.clone()
    }

    /// Look up a server factory by id.
    #[must_use]
    pub fn server_factory(&self, id: &str) -> Option<Arc<dyn ServerFactory>> {
        self.servers.get(id).cloned()
    }

    /// Take the step catalog for the capability manager.
    #[must_use]
    pub fn into_steps(self) -> StepCatalog {
        self.steps
    }

    /// Split the catalog into the pieces the managers consume.
    #[must_use]
    pub fn split(
        self,
    ) -> (
        IndexMap<String, Arc<dyn SourceProviderFactory>>,
        IndexMap<String, Arc<dyn QueryEngineFactory>>,
        IndexMap<String, Arc<dyn ServerFactory>>,
        StepCatalog,
    ) {
        (self.sources, self.engines, self.servers, self.steps)
    }
}

impl Default for PluginCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_all_present() {
        let catalog = PluginCatalog::with_builtins(Arc::new(ChannelHub::new()));
        assert!(catalog.sources.contains_key("memory"));
        assert!(catalog.engines.contains_key("passthrough"));
        assert!(catalog.servers.contains_key("channel"));
        assert!(catalog.steps.contains_key("echo"));
        assert!(catalog.steps.contains_key("identity-pre"));
    }

    #[test]
    fn duplicate_source_factory_is_rejected() {
        let mut catalog = PluginCatalog::new();
        catalog
            .register_source_factory(Arc::new(MemorySourceFactory))
            .unwrap();
        let err = catalog
            .register_source_factory(Arc::new(MemorySourceFactory))
            .unwrap_err();
        assert!(err.kind().is_configuration());
    }

    #[test]
    fn duplicate_step_is_rejected() {
        let mut catalog = PluginCatalog::new();
        for (id, constructor) in builtin_steps() {
            catalog.register_step(id, constructor).unwrap();
        }
        let extra: StepConstructor = Box::new(|config| {
            Ok(csh_pipeline::StepInstance::Pre(Arc::new(
                csh_pipeline::steps::IdentityPre::new(config),
            )))
        });
        let err = catalog.register_step("echo", extra).unwrap_err();
        assert!(err.kind().is_configuration());
    }

    #[test]
    fn split_hands_out_every_slice() {
        let catalog = PluginCatalog::with_builtins(Arc::new(ChannelHub::new()));
        let (sources, engines, servers, steps) = catalog.split();
        assert_eq!(sources.len(), 1);
        assert_eq!(engines.len(), 1);
        assert_eq!(servers.len(), 1);
        assert!(steps.len() >= 5);
    }
}
