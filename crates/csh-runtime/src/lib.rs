// SPDX-License-Identifier: MIT OR Apache-2.0
//! Process runtime.
//!
//! The [`Runtime`] owns the server transports: one [`Server`] per
//! capability, created from the server factory its transport names.
//! Startup fans server creation and start out concurrently and fails fast;
//! stop forks server stops and the session stop, waits under a bounded
//! deadline, drains in-flight requests under a shorter one, and then
//! releases anyone blocked in [`Runtime::await_termination`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// The assembled core value.
pub mod core;

pub use self::core::Core;

use csh_capability::{Capability, CapabilityManager};
use csh_dispatch::server::{Server, ServerFactory};
use csh_dispatch::{Dispatcher, TransportKind};
use csh_error::{CshError, Result};
use csh_health::{HealthMonitor, MetricsRegistry, Severity};
use csh_session::Session;
use indexmap::IndexMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Process-level runtime state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    /// Constructed, not started.
    New,
    /// Startup in flight.
    Starting,
    /// Serving requests.
    Running,
    /// Shutdown in flight.
    Stopping,
    /// Shut down.
    Stopped,
    /// Startup failed; terminal.
    Failed,
}

impl fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Default bound on the stop fan-out.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound on the in-flight request drain that follows.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

type ReadyHook = Box<dyn FnOnce() + Send>;

/// Owns server transports and supervises overall process state.
pub struct Runtime {
    session: Arc<Session>,
    capabilities: Arc<CapabilityManager>,
    server_factories: IndexMap<String, Arc<dyn ServerFactory>>,
    metrics: Arc<MetricsRegistry>,
    health: Arc<HealthMonitor>,
    state: Mutex<RuntimeState>,
    state_tx: watch::Sender<RuntimeState>,
    servers: RwLock<Vec<(String, Arc<dyn Server>)>>,
    ready_hooks: Mutex<Vec<ReadyHook>>,
    stop_timeout: Duration,
    drain_timeout: Duration,
}

impl Runtime {
    /// Expose a session as a runtime.
    #[must_use]
    pub fn expose(
        session: Arc<Session>,
        capabilities: Arc<CapabilityManager>,
        server_factories: IndexMap<String, Arc<dyn ServerFactory>>,
        metrics: Arc<MetricsRegistry>,
        health: Arc<HealthMonitor>,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(RuntimeState::New);
        Arc::new(Self {
            session,
            capabilities,
            server_factories,
            metrics,
            health,
            state: Mutex::new(RuntimeState::New),
            state_tx,
            servers: RwLock::new(Vec::new()),
            ready_hooks: Mutex::new(Vec::new()),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        })
    }

    /// Current runtime state.
    #[must_use]
    pub fn state(&self) -> RuntimeState {
        *self.state.lock().expect("state lock poisoned")
    }

    /// The shared metrics registry.
    #[must_use]
    pub fn metrics(&self) -> Arc<MetricsRegistry> {
        Arc::clone(&self.metrics)
    }

    /// The session this runtime exposes.
    #[must_use]
    pub fn session(&self) -> Arc<Session> {
        Arc::clone(&self.session)
    }

    /// Names of capabilities that currently have a running server.
    #[must_use]
    pub fn served_capabilities(&self) -> Vec<String> {
        self.servers
            .read()
            .expect("servers lock poisoned")
            .iter()
            .filter(|(_, server)| server.is_running())
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn transition(&self, from: &[RuntimeState], to: RuntimeState) -> Result<()> {
        let mut state = self.state.lock().expect("state lock poisoned");
        if !from.contains(&*state) {
            return Err(CshError::lifecycle(format!(
                "invalid runtime transition from {state} to {to}"
            )));
        }
        *state = to;
        let _ = self.state_tx.send(to);
        Ok(())
    }

    /// Start the session and one server per capability, concurrently,
    /// fail-fast.  On success the runtime is `Running`, listeners are
    /// notified, and ready hooks fire.  Idempotent: starting a running
    /// runtime is a no-op.
    ///
    /// # Errors
    ///
    /// A *lifecycle* error when already stopped; a *configuration* error
    /// for unknown bindings or factories; the first server failure
    /// otherwise.  Any failure leaves the runtime `Failed`.
    pub async fn start(&self) -> Result<()> {
        if matches!(self.state(), RuntimeState::Running | RuntimeState::Starting) {
            return Ok(());
        }
        self.transition(&[RuntimeState::New], RuntimeState::Starting)?;
        match self.start_all().await {
            Ok(()) => {
                self.transition(&[RuntimeState::Starting], RuntimeState::Running)?;
                info!(
                    target: "csh.runtime",
                    capabilities = self.servers.read().expect("servers lock poisoned").len(),
                    "runtime running"
                );
                self.fire_ready_hooks();
                Ok(())
            }
            Err(err) => {
                {
                    let mut state = self.state.lock().expect("state lock poisoned");
                    *state = RuntimeState::Failed;
                }
                let _ = self.state_tx.send(RuntimeState::Failed);
                self.health
                    .record(Severity::Error, "runtime startup failed", Some(&err));
                Err(err)
            }
        }
    }

    /// Start servers for a single capability (the rest untouched).
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Runtime::start`], restricted to one
    /// capability, without state transitions.
    pub async fn start_capability(&self, name: &str) -> Result<()> {
        let capability = self.capabilities.get(name)?;
        if let Some(server) = self.build_server(&capability)? {
            server.init().await?;
            server.start().await?;
            self.servers
                .write()
                .expect("servers lock poisoned")
                .push((name.to_string(), server));
        }
        Ok(())
    }

    async fn start_all(&self) -> Result<()> {
        self.session.start().await?;

        // Create every server first so configuration errors surface before
        // anything listens.
        let mut pending: Vec<(String, Arc<dyn Server>)> = Vec::new();
        for (name, capability) in self.capabilities.registry().snapshot() {
            if let Some(server) = self.build_server(&capability)? {
                pending.push((name, server));
            }
        }

        // Fork every server start; wait for all; fail on the first error.
        let handles: Vec<_> = pending
            .iter()
            .map(|(name, server)| {
                let name = name.clone();
                let server = Arc::clone(server);
                tokio::spawn(async move {
                    server.init().await?;
                    server.start().await?;
                    Ok::<String, CshError>(name)
                })
            })
            .collect();

        let mut first_failure: Option<CshError> = None;
        for handle in handles {
            match handle.await {
                Ok(Ok(name)) => {
                    info!(target: "csh.runtime", capability = %name, "server started");
                }
                Ok(Err(err)) => {
                    if first_failure.is_none() {
                        first_failure = Some(err);
                    }
                }
                Err(join_err) => {
                    if first_failure.is_none() {
                        first_failure = Some(
                            CshError::internal("server start task panicked").with_source(join_err),
                        );
                    }
                }
            }
        }
        if let Some(err) = first_failure {
            return Err(err);
        }

        *self.servers.write().expect("servers lock poisoned") = pending;
        Ok(())
    }

    fn build_server(&self, capability: &Arc<Capability>) -> Result<Option<Arc<dyn Server>>> {
        let binding: TransportKind = capability
            .exposure()
            .binding
            .parse()
            .map_err(|err: CshError| {
                err.with_context("capability", capability.name().to_string())
            })?;

        let factory_id = capability.transport().factory.as_str();
        if factory_id.is_empty() {
            warn!(
                target: "csh.runtime",
                capability = capability.name(),
                "no transport factory; capability reachable only through direct dispatch"
            );
            return Ok(None);
        }
        let factory = self.server_factories.get(factory_id).ok_or_else(|| {
            CshError::configuration(format!(
                "capability '{}': unknown server factory '{factory_id}'",
                capability.name()
            ))
        })?;

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&self.session),
            binding,
            Arc::clone(&self.metrics),
        ));
        factory
            .create(Arc::clone(capability), binding, dispatcher)
            .map(Some)
    }

    /// Stop every server and the session concurrently, bounded by the stop
    /// deadline; then drain in-flight requests under the drain deadline,
    /// transition to `Stopped`, and release [`Runtime::await_termination`]
    /// waiters.  Per-server failures are logged, never propagated.  A
    /// second call is a no-op.
    ///
    /// # Errors
    ///
    /// A *lifecycle* error when called before [`Runtime::start`].
    pub async fn stop(&self) -> Result<()> {
        match self.state() {
            RuntimeState::Stopped | RuntimeState::Stopping => return Ok(()),
            RuntimeState::New => {
                return Err(CshError::lifecycle("runtime was never started"));
            }
            _ => {}
        }
        self.transition(
            &[
                RuntimeState::Running,
                RuntimeState::Starting,
                RuntimeState::Failed,
            ],
            RuntimeState::Stopping,
        )?;

        let servers: Vec<(String, Arc<dyn Server>)> = self
            .servers
            .write()
            .expect("servers lock poisoned")
            .drain(..)
            .collect();

        let session = Arc::clone(&self.session);
        let stop_fanout = async {
            let mut handles: Vec<_> = servers
                .iter()
                .map(|(name, server)| {
                    let name = name.clone();
                    let server = Arc::clone(server);
                    tokio::spawn(async move {
                        if let Err(err) = server.stop().await {
                            warn!(
                                target: "csh.runtime",
                                capability = %name,
                                error = %err,
                                "server stop failed"
                            );
                        }
                    })
                })
                .collect();
            handles.push(tokio::spawn(async move { session.stop().await }));
            for handle in handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(self.stop_timeout, stop_fanout)
            .await
            .is_err()
        {
            warn!(
                target: "csh.runtime",
                timeout_ms = self.stop_timeout.as_millis() as u64,
                "stop fan-out timed out; forcing termination"
            );
        }

        // Drain: wait for in-flight requests to finish, bounded.
        let metrics = Arc::clone(&self.metrics);
        let drained = tokio::time::timeout(self.drain_timeout, async move {
            while metrics.in_progress() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                target: "csh.runtime",
                in_progress = self.metrics.in_progress(),
                "drain deadline reached with requests still in flight"
            );
        }

        self.transition(&[RuntimeState::Stopping], RuntimeState::Stopped)?;
        info!(target: "csh.runtime", "runtime stopped");
        Ok(())
    }

    /// Block until the runtime reaches `Stopped` or `Failed`.
    pub async fn await_termination(&self) -> RuntimeState {
        let mut rx = self.state_tx.subscribe();
        loop {
            let current = *rx.borrow_and_update();
            if matches!(current, RuntimeState::Stopped | RuntimeState::Failed) {
                return current;
            }
            if rx.changed().await.is_err() {
                return self.state();
            }
        }
    }

    /// Run `hook` once the runtime is running — immediately when it
    /// already is, otherwise exactly once on the `Running` transition.
    pub fn on_ready(&self, hook: impl FnOnce() + Send + 'static) {
        let run_now = {
            let state = self.state.lock().expect("state lock poisoned");
            if *state == RuntimeState::Running {
                true
            } else {
                self.ready_hooks
                    .lock()
                    .expect("ready hooks lock poisoned")
                    .push(Box::new(hook));
                return;
            }
        };
        if run_now {
            hook();
        }
    }

    fn fire_ready_hooks(&self) {
        let hooks: Vec<ReadyHook> = self
            .ready_hooks
            .lock()
            .expect("ready hooks lock poisoned")
            .drain(..)
            .collect();
        for hook in hooks {
            hook();
        }
    }
}
