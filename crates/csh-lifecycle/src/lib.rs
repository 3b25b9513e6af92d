// SPDX-License-Identifier: MIT OR Apache-2.0
//! Phased lifecycle coordination.
//!
//! A [`LifecycleCoordinator`] brings a set of [`LifecycleComponent`]s up in
//! dependency-correct phases and down again in reverse registration order.
//! Phases run sequentially in ascending order; the components *within* one
//! phase are forked in parallel and joined fail-fast.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use csh_error::{CshError, Result};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// Initialization phases, in ascending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Before anything else.
    PreInit,
    /// Process-level bootstrap (logging, discovery).
    Bootstrap,
    /// Data-source providers come up.
    SourceProviders,
    /// Query engines come up (sources are available).
    QueryEngines,
    /// Capabilities materialize (engines are available).
    Capabilities,
    /// Pipeline warm-up.
    Pipelines,
    /// After everything else.
    PostInit,
}

impl Phase {
    /// Numeric order of this phase; lower runs first.
    #[must_use]
    pub fn order(&self) -> u32 {
        match self {
            Self::PreInit => 0,
            Self::Bootstrap => 10,
            Self::SourceProviders => 20,
            Self::QueryEngines => 30,
            Self::Capabilities => 40,
            Self::Pipelines => 50,
            Self::PostInit => 100,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PreInit => "pre-init",
            Self::Bootstrap => "bootstrap",
            Self::SourceProviders => "source-providers",
            Self::QueryEngines => "query-engines",
            Self::Capabilities => "capabilities",
            Self::Pipelines => "pipelines",
            Self::PostInit => "post-init",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Coordinator state
// ---------------------------------------------------------------------------

/// Lifecycle state of the coordinator itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// Constructed, nothing initialized.
    New,
    /// `initialize` is in flight.
    Starting,
    /// All phases completed.
    Running,
    /// `shutdown` is in flight.
    Stopping,
    /// Shutdown completed.
    Stopped,
    /// A phase failed; terminal.
    Failed,
}

impl fmt::Display for CoordinatorState {
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

// ---------------------------------------------------------------------------
// Component trait
// ---------------------------------------------------------------------------

/// A component the coordinator brings up and down.
#[async_trait::async_trait]
pub trait LifecycleComponent: Send + Sync {
    /// Component name, used in phase logs and error context.
    fn name(&self) -> &str;

    /// Bring the component up.  Called once, inside the component's phase.
    async fn initialize(&self) -> Result<()>;

    /// Bring the component down.  Called once, in reverse registration
    /// order; failures are logged but do not abort the sequence.
    async fn shutdown(&self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Default grace period allowed for component shutdown.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Brings registered components up in phases and down in reverse order.
pub struct LifecycleCoordinator {
    state: Mutex<CoordinatorState>,
    components: Mutex<Vec<(Phase, Arc<dyn LifecycleComponent>)>>,
    grace: Duration,
}

impl Default for LifecycleCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleCoordinator {
    /// Create a coordinator with the default shutdown grace period.
    #[must_use]
    pub fn new() -> Self {
        Self::with_grace(DEFAULT_SHUTDOWN_GRACE)
    }

    /// Create a coordinator with an explicit shutdown grace period.
    #[must_use]
    pub fn with_grace(grace: Duration) -> Self {
        Self {
            state: Mutex::new(CoordinatorState::New),
            components: Mutex::new(Vec::new()),
            grace,
        }
    }

    /// Current coordinator state.
    #[must_use]
    pub fn state(&self) -> CoordinatorState {
        *self.state.lock().expect("state lock poisoned")
    }

    /// Register a component against a phase.
    ///
    /// Registration order is significant: it decides shutdown order and
    /// breaks ties within a phase.
    ///
    /// # Errors
    ///
    /// Fails with a *lifecycle* error once initialization has begun.
    pub fn register(&self, phase: Phase, component: Arc<dyn LifecycleComponent>) -> Result<()> {
        let state = self.state();
        if state != CoordinatorState::New {
            return Err(CshError::lifecycle(format!(
                "cannot register components while {state}"
            )));
        }
        debug!(
            target: "csh.lifecycle",
            phase = %phase,
            component = component.name(),
            "registered"
        );
        self.components
            .lock()
            .expect("components lock poisoned")
            .push((phase, component));
        Ok(())
    }

    fn transition(&self, from: &[CoordinatorState], to: CoordinatorState) -> Result<()> {
        let mut state = self.state.lock().expect("state lock poisoned");
        if !from.contains(&*state) {
            return Err(CshError::lifecycle(format!(
                "invalid coordinator transition from {state} to {to}"
            )));
        }
        *state = to;
        Ok(())
    }

    /// Run all phases in ascending order.
    ///
    /// Components within one phase are forked in parallel; the coordinator
    /// waits for all of them, and if any failed it transitions to
    /// [`CoordinatorState::Failed`] and re-raises the first failure.
    ///
    /// # Errors
    ///
    /// A *lifecycle* error when called in any state but `New`, or the first
    /// component failure.
    pub async fn initialize(&self) -> Result<()> {
        self.transition(&[CoordinatorState::New], CoordinatorState::Starting)?;

        // Stable grouping: phases ascending, registration order within one.
        let components = self
            .components
            .lock()
            .expect("components lock poisoned")
            .clone();
        let mut phases: Vec<u32> = components.iter().map(|(p, _)| p.order()).collect();
        phases.sort_unstable();
        phases.dedup();

        for order in phases {
            let batch: Vec<Arc<dyn LifecycleComponent>> = components
                .iter()
                .filter(|(p, _)| p.order() == order)
                .map(|(_, c)| Arc::clone(c))
                .collect();
            let names: Vec<&str> = batch.iter().map(|c| c.name()).collect();
            info!(target: "csh.lifecycle", phase = order, components = ?names, "phase starting");

            let handles: Vec<_> = batch
                .into_iter()
                .map(|component| {
                    tokio::spawn(async move {
                        let name = component.name().to_string();
                        component.initialize().await.map_err(|err| (name, err))
                    })
                })
                .collect();

            let mut first_failure: Option<CshError> = None;
            for handle in handles {
                match handle.await {
                    Ok(Ok(())) => {}
                    Ok(Err((name, err))) => {
                        error!(
                            target: "csh.lifecycle",
                            component = %name,
                            error = %err,
                            "component initialization failed"
                        );
                        if first_failure.is_none() {
                            first_failure =
                                Some(err.with_context("component", name.clone()));
                        }
                    }
                    Err(join_err) => {
                        if first_failure.is_none() {
                            first_failure = Some(
                                CshError::internal("component initialization task panicked")
                                    .with_source(join_err),
                            );
                        }
                    }
                }
            }
            if let Some(err) = first_failure {
                let mut state = self.state.lock().expect("state lock poisoned");
                *state = CoordinatorState::Failed;
                return Err(err);
            }
            info!(target: "csh.lifecycle", phase = order, "phase complete");
        }

        self.transition(&[CoordinatorState::Starting], CoordinatorState::Running)?;
        Ok(())
    }

    /// Shut every component down in reverse registration order.
    ///
    /// Each component gets at most the configured grace period; on timeout
    /// its shutdown is abandoned and the sequence continues.  Individual
    /// failures are logged, never propagated.  Calling this on an already
    /// stopped coordinator is a no-op.
    ///
    /// # Errors
    ///
    /// A *lifecycle* error when the coordinator was never initialized.
    pub async fn shutdown(&self) -> Result<()> {
        if self.state() == CoordinatorState::Stopped {
            return Ok(());
        }
        self.transition(
            &[CoordinatorState::Running, CoordinatorState::Failed],
            CoordinatorState::Stopping,
        )?;

        let components = self
            .components
            .lock()
            .expect("components lock poisoned")
            .clone();
        for (phase, component) in components.into_iter().rev() {
            let name = component.name().to_string();
            debug!(target: "csh.lifecycle", phase = %phase, component = %name, "shutting down");
            match tokio::time::timeout(self.grace, component.shutdown()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(
                        target: "csh.lifecycle",
                        component = %name,
                        error = %err,
                        "component shutdown failed"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "csh.lifecycle",
                        component = %name,
                        grace_ms = self.grace.as_millis() as u64,
                        "component shutdown timed out; abandoning"
                    );
                }
            }
        }

        self.transition(&[CoordinatorState::Stopping], CoordinatorState::Stopped)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Probe {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
        fail_init: bool,
        init_delay: Duration,
        ticket: Arc<AtomicU32>,
        started_at: Mutex<Option<u32>>,
    }

    impl Probe {
        fn new(name: &str, log: &Arc<Mutex<Vec<String>>>, ticket: &Arc<AtomicU32>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                log: Arc::clone(log),
                fail_init: false,
                init_delay: Duration::ZERO,
                ticket: Arc::clone(ticket),
                started_at: Mutex::new(None),
            })
        }

        fn failing(name: &str, log: &Arc<Mutex<Vec<String>>>, ticket: &Arc<AtomicU32>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                log: Arc::clone(log),
                fail_init: true,
                init_delay: Duration::ZERO,
                ticket: Arc::clone(ticket),
                started_at: Mutex::new(None),
            })
        }
    }

    #[async_trait::async_trait]
    impl LifecycleComponent for Probe {
        fn name(&self) -> &str {
            &self.name
        }

        async fn initialize(&self) -> Result<()> {
            *self.started_at.lock().unwrap() = Some(self.ticket.fetch_add(1, Ordering::SeqCst));
            if !self.init_delay.is_zero() {
                tokio::time::sleep(self.init_delay).await;
            }
            self.log.lock().unwrap().push(format!("init:{}", self.name));
            if self.fail_init {
                return Err(CshError::connection(format!("{} refused", self.name)));
            }
            Ok(())
        }

        async fn shutdown(&self) -> Result<()> {
            self.log.lock().unwrap().push(format!("stop:{}", self.name));
            Ok(())
        }
    }

    fn fixtures() -> (Arc<Mutex<Vec<String>>>, Arc<AtomicU32>) {
        (Arc::new(Mutex::new(Vec::new())), Arc::new(AtomicU32::new(0)))
    }

    #[tokio::test]
    async fn phases_run_in_ascending_order() {
        let (log, ticket) = fixtures();
        let coordinator = LifecycleCoordinator::new();
        // Register out of phase order on purpose.
        coordinator
            .register(Phase::Capabilities, Probe::new("caps", &log, &ticket))
            .unwrap();
        coordinator
            .register(Phase::SourceProviders, Probe::new("sources", &log, &ticket))
            .unwrap();
        coordinator
            .register(Phase::QueryEngines, Probe::new("engines", &log, &ticket))
            .unwrap();

        coordinator.initialize().await.unwrap();
        assert_eq!(coordinator.state(), CoordinatorState::Running);
        assert_eq!(
            *log.lock().unwrap(),
            ["init:sources", "init:engines", "init:caps"]
        );
    }

    #[tokio::test]
    async fn next_phase_waits_for_every_component_of_previous_phase() {
        let (log, ticket) = fixtures();
        let slow = Arc::new(Probe {
            name: "slow-source".into(),
            log: Arc::clone(&log),
            fail_init: false,
            init_delay: Duration::from_millis(50),
            ticket: Arc::clone(&ticket),
            started_at: Mutex::new(None),
        });
        let fast = Probe::new("fast-source", &log, &ticket);
        let engine = Probe::new("engine", &log, &ticket);

        let coordinator = LifecycleCoordinator::new();
        coordinator
            .register(Phase::SourceProviders, slow.clone())
            .unwrap();
        coordinator.register(Phase::SourceProviders, fast).unwrap();
        coordinator
            .register(Phase::QueryEngines, engine.clone())
            .unwrap();

        coordinator.initialize().await.unwrap();
        let entries = log.lock().unwrap().clone();
        let engine_pos = entries.iter().position(|e| e == "init:engine").unwrap();
        assert!(entries[..engine_pos].contains(&"init:slow-source".to_string()));
        assert!(entries[..engine_pos].contains(&"init:fast-source".to_string()));
    }

    #[tokio::test]
    async fn failure_in_a_phase_transitions_to_failed() {
        let (log, ticket) = fixtures();
        let coordinator = LifecycleCoordinator::new();
        coordinator
            .register(Phase::SourceProviders, Probe::failing("bad", &log, &ticket))
            .unwrap();
        coordinator
            .register(Phase::QueryEngines, Probe::new("engine", &log, &ticket))
            .unwrap();

        let err = coordinator.initialize().await.unwrap_err();
        assert!(err.to_string().contains("bad refused"));
        assert_eq!(coordinator.state(), CoordinatorState::Failed);
        // Later phases never started.
        assert!(!log.lock().unwrap().contains(&"init:engine".to_string()));
    }

    #[tokio::test]
    async fn shutdown_reverses_registration_order() {
        let (log, ticket) = fixtures();
        let coordinator = LifecycleCoordinator::new();
        coordinator
            .register(Phase::SourceProviders, Probe::new("a", &log, &ticket))
            .unwrap();
        coordinator
            .register(Phase::QueryEngines, Probe::new("b", &log, &ticket))
            .unwrap();
        coordinator
            .register(Phase::Capabilities, Probe::new("c", &log, &ticket))
            .unwrap();

        coordinator.initialize().await.unwrap();
        coordinator.shutdown().await.unwrap();
        assert_eq!(coordinator.state(), CoordinatorState::Stopped);

        let entries = log.lock().unwrap().clone();
        let stops: Vec<&String> = entries.iter().filter(|e| e.starts_with("stop:")).collect();
        assert_eq!(stops, ["stop:c", "stop:b", "stop:a"]);
    }

    #[tokio::test]
    async fn double_initialize_is_a_lifecycle_error() {
        let coordinator = LifecycleCoordinator::new();
        coordinator.initialize().await.unwrap();
        let err = coordinator.initialize().await.unwrap_err();
        assert!(err.kind().is_lifecycle());
    }

    #[tokio::test]
    async fn second_shutdown_is_a_noop() {
        let (log, ticket) = fixtures();
        let coordinator = LifecycleCoordinator::new();
        coordinator
            .register(Phase::SourceProviders, Probe::new("a", &log, &ticket))
            .unwrap();
        coordinator.initialize().await.unwrap();
        coordinator.shutdown().await.unwrap();
        coordinator.shutdown().await.unwrap();
        let stops = log
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.starts_with("stop:"))
            .count();
        assert_eq!(stops, 1);
    }

    #[tokio::test]
    async fn register_after_initialize_is_rejected() {
        let (log, ticket) = fixtures();
        let coordinator = LifecycleCoordinator::new();
        coordinator.initialize().await.unwrap();
        let err = coordinator
            .register(Phase::PostInit, Probe::new("late", &log, &ticket))
            .unwrap_err();
        assert!(err.kind().is_lifecycle());
    }

    #[test]
    fn phase_orders_are_ascending() {
        let phases = [
            Phase::PreInit,
            Phase::Bootstrap,
            Phase::SourceProviders,
            Phase::QueryEngines,
            Phase::Capabilities,
            Phase::Pipelines,
            Phase::PostInit,
        ];
        for pair in phases.windows(2) {
            assert!(pair[0].order() < pair[1].order());
        }
    }
}
