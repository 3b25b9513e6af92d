// SPDX-License-Identifier: MIT OR Apache-2.0
//! The assembled core value.
//!
//! Exactly one [`Core`] exists per process.  It is constructed in `main`
//! and threaded explicitly through whatever needs it — there are no
//! implicit globals.  The core wires the frozen configuration, the three
//! managers (registered on their lifecycle phases, in order), the session,
//! and the runtime.

use crate::{Runtime, RuntimeState};
use csh_capability::CapabilityManager;
use csh_config::ConfigurationManager;
use csh_engine::QueryEngineManager;
use csh_error::Result;
use csh_health::{HealthMonitor, HealthState, MetricsRegistry, Severity};
use csh_lifecycle::{LifecycleComponent, LifecycleCoordinator, Phase};
use csh_plugin::PluginCatalog;
use csh_session::Session;
use csh_source::SourceProviderManager;
use std::sync::Arc;
use tracing::{error, info};

/// The single per-process assembly of every core component.
pub struct Core {
    config: Arc<ConfigurationManager>,
    coordinator: Arc<LifecycleCoordinator>,
    sources: Arc<SourceProviderManager>,
    engines: Arc<QueryEngineManager>,
    capabilities: Arc<CapabilityManager>,
    session: Arc<Session>,
    runtime: Arc<Runtime>,
    health: Arc<HealthMonitor>,
    metrics: Arc<MetricsRegistry>,
}

impl Core {
    /// Wire managers, session, and runtime from a frozen configuration and
    /// a plugin catalog.  Nothing is started yet.
    ///
    /// # Errors
    ///
    /// A *lifecycle* error if phase registration fails (cannot happen on a
    /// fresh coordinator).
    pub fn bootstrap(config: ConfigurationManager, catalog: PluginCatalog) -> Result<Self> {
        let spec = config.spec();
        let (source_factories, engine_factories, server_factories, steps) = catalog.split();

        let sources = Arc::new(SourceProviderManager::new(
            spec.sources.clone(),
            source_factories,
        ));
        let engines = Arc::new(QueryEngineManager::new(
            spec.engines.clone(),
            spec.sources,
            engine_factories,
            Arc::clone(&sources),
        ));
        let capabilities = Arc::new(CapabilityManager::new(
            spec.capabilities,
            spec.exposures,
            spec.transports,
            Arc::new(steps),
        ));

        // Phase registration order doubles as shutdown order (reversed).
        let coordinator = Arc::new(LifecycleCoordinator::new());
        coordinator.register(Phase::SourceProviders, Arc::clone(&sources) as Arc<dyn LifecycleComponent>)?;
        coordinator.register(Phase::QueryEngines, Arc::clone(&engines) as Arc<dyn LifecycleComponent>)?;
        coordinator.register(Phase::Capabilities, Arc::clone(&capabilities) as Arc<dyn LifecycleComponent>)?;

        let session = Arc::new(Session::new(
            Arc::clone(&capabilities),
            Arc::clone(&engines),
            Arc::clone(&sources),
        ));
        let health = Arc::new(HealthMonitor::new());
        let metrics = Arc::new(MetricsRegistry::new());
        let runtime = Runtime::expose(
            Arc::clone(&session),
            Arc::clone(&capabilities),
            server_factories,
            Arc::clone(&metrics),
            Arc::clone(&health),
        );

        Ok(Self {
            config: Arc::new(config),
            coordinator,
            sources,
            engines,
            capabilities,
            session,
            runtime,
            health,
            metrics,
        })
    }

    /// Bring the whole system up: lifecycle phases first, then the
    /// runtime.
    ///
    /// # Errors
    ///
    /// The first initialization failure; the health monitor records it and
    /// ends up `Failed`.
    pub async fn start(&self) -> Result<()> {
        self.health.transition(HealthState::Starting, "starting")?;
        if let Err(err) = self.coordinator.initialize().await {
            error!(target: "csh.core", error = %err, "lifecycle initialization failed");
            self.health
                .record(Severity::Critical, "lifecycle initialization failed", Some(&err));
            return Err(err);
        }
        if let Err(err) = self.runtime.start().await {
            error!(target: "csh.core", error = %err, "runtime start failed");
            self.health
                .record(Severity::Critical, "runtime start failed", Some(&err));
            return Err(err);
        }
        self.health.transition(HealthState::Running, "running")?;
        info!(target: "csh.core", "core running");
        Ok(())
    }

    /// Bring the whole system down: runtime (servers, session) first, then
    /// the lifecycle phases in reverse.  Failures are logged; teardown
    /// always runs to completion.
    pub async fn stop(&self) {
        let _ = self.health.transition(HealthState::Stopping, "stopping");
        if let Err(err) = self.runtime.stop().await {
            error!(target: "csh.core", error = %err, "runtime stop failed");
        }
        if let Err(err) = self.coordinator.shutdown().await {
            error!(target: "csh.core", error = %err, "lifecycle shutdown failed");
        }
        let _ = self.health.transition(HealthState::Stopped, "stopped");
        info!(target: "csh.core", "core stopped");
    }

    /// Block until the runtime terminates.
    pub async fn await_termination(&self) -> RuntimeState {
        self.runtime.await_termination().await
    }

    /// The frozen configuration.
    #[must_use]
    pub fn config(&self) -> &ConfigurationManager {
        &self.config
    }

    /// The source-provider manager.
    #[must_use]
    pub fn sources(&self) -> Arc<SourceProviderManager> {
        Arc::clone(&self.sources)
    }

    /// The query-engine manager.
    #[must_use]
    pub fn engines(&self) -> Arc<QueryEngineManager> {
        Arc::clone(&self.engines)
    }

    /// The capability manager.
    #[must_use]
    pub fn capabilities(&self) -> Arc<CapabilityManager> {
        Arc::clone(&self.capabilities)
    }

    /// The session.
    #[must_use]
    pub fn session(&self) -> Arc<Session> {
        Arc::clone(&self.session)
    }

    /// The runtime.
    #[must_use]
    pub fn runtime(&self) -> Arc<Runtime> {
        Arc::clone(&self.runtime)
    }

    /// The health monitor.
    #[must_use]
    pub fn health(&self) -> Arc<HealthMonitor> {
        Arc::clone(&self.health)
    }

    /// The metrics registry.
    #[must_use]
    pub fn metrics(&self) -> Arc<MetricsRegistry> {
        Arc::clone(&self.metrics)
    }
}
