// SPDX-License-Identifier: MIT OR Apache-2.0
//! The health state machine and event ring.
//!
//! Transitions follow `STOPPED → STARTING → RUNNING ⇄ DEGRADED → STOPPING →
//! STOPPED`, with `FAILED` reachable from any state.  A late
//! `STARTING → RUNNING` signal arriving after `STOPPING` is silently
//! ignored: a zombie startup thread must not resurrect a stopping process.

use chrono::{DateTime, Utc};
use csh_error::{CshError, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::RwLock;
use std::time::Instant;
use tracing::warn;

/// Capacity of the event ring; eviction is oldest-first.
pub const EVENT_BUFFER_CAPACITY: usize = 1000;

// ---------------------------------------------------------------------------
// State and severity
// ---------------------------------------------------------------------------

/// Health state of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// Not running.
    Stopped,
    /// Startup in progress.
    Starting,
    /// Fully operational.
    Running,
    /// Operational with degraded service.
    Degraded,
    /// Shutdown in progress.
    Stopping,
    /// Unrecoverable; terminal.
    Failed,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Degraded => "degraded",
            Self::Stopping => "stopping",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Severity of a recorded health event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Routine information.
    Info,
    /// Something deserves attention but service is unaffected.
    Warning,
    /// A request-scoped or component-scoped failure.
    Error,
    /// The process cannot continue.
    Critical,
}

/// One recorded health event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthEvent {
    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,
    /// Human-readable message.
    pub message: String,
    /// Recorded severity (possibly escalated).
    pub severity: Severity,
    /// Stringified cause, when one was attached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

struct MonitorInner {
    state: HealthState,
    message: String,
    last_transition: Option<(HealthState, HealthState)>,
    transitioned_at: DateTime<Utc>,
    events: VecDeque<HealthEvent>,
}

/// Tracks process health: state machine plus a bounded event ring.
///
/// Transitions take the write lock; snapshots take the read lock.
pub struct HealthMonitor {
    inner: RwLock<MonitorInner>,
    started: Instant,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthMonitor {
    /// Create a monitor in the [`HealthState::Stopped`] state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MonitorInner {
                state: HealthState::Stopped,
                message: String::new(),
                last_transition: None,
                transitioned_at: Utc::now(),
                events: VecDeque::with_capacity(64),
            }),
            started: Instant::now(),
        }
    }

    /// Current health state.
    #[must_use]
    pub fn state(&self) -> HealthState {
        self.inner.read().expect("health lock poisoned").state
    }

    fn transition_allowed(from: HealthState, to: HealthState) -> bool {
        if to == HealthState::Failed {
            return true;
        }
        matches!(
            (from, to),
            (HealthState::Stopped, HealthState::Starting)
                | (HealthState::Starting, HealthState::Running)
                | (HealthState::Running, HealthState::Degraded)
                | (HealthState::Degraded, HealthState::Running)
                | (HealthState::Running, HealthState::Stopping)
                | (HealthState::Degraded, HealthState::Stopping)
                | (HealthState::Starting, HealthState::Stopping)
                | (HealthState::Stopping, HealthState::Stopped)
        )
    }

    /// Attempt a state transition.
    ///
    /// A late `Starting → Running` signal after the monitor has begun (or
    /// finished) stopping is silently ignored.  Every other invalid
    /// transition raises a *lifecycle* error and leaves the state
    /// unchanged.
    ///
    /// # Errors
    ///
    /// A *lifecycle* error for invalid transitions.
    pub fn transition(&self, to: HealthState, message: impl Into<String>) -> Result<()> {
        let mut inner = self.inner.write().expect("health lock poisoned");
        let from = inner.state;
        if from == to {
            return Ok(());
        }
        if to == HealthState::Running
            && matches!(from, HealthState::Stopping | HealthState::Stopped)
        {
            warn!(
                target: "csh.health",
                from = %from,
                "ignoring late running signal after stop"
            );
            return Ok(());
        }
        if !Self::transition_allowed(from, to) {
            return Err(CshError::lifecycle(format!(
                "invalid health transition from {from} to {to}"
            )));
        }
        inner.state = to;
        inner.message = message.into();
        inner.last_transition = Some((from, to));
        inner.transitioned_at = Utc::now();
        Ok(())
    }

    /// Record an event.
    ///
    /// A catastrophic cause escalates the severity to
    /// [`Severity::Critical`] regardless of what the caller asked for.
    /// Side-effects: `Critical` forces [`HealthState::Failed`];
    /// `Error` while running degrades the process.
    pub fn record(&self, severity: Severity, message: impl Into<String>, cause: Option<&CshError>) {
        let severity = match cause {
            Some(err) if err.kind().is_catastrophic() => Severity::Critical,
            _ => severity,
        };
        let message = message.into();

        let mut inner = self.inner.write().expect("health lock poisoned");
        if inner.events.len() == EVENT_BUFFER_CAPACITY {
            inner.events.pop_front();
        }
        inner.events.push_back(HealthEvent {
            timestamp: Utc::now(),
            message: message.clone(),
            severity,
            cause: cause.map(ToString::to_string),
        });

        match severity {
            Severity::Critical => {
                if inner.state != HealthState::Failed {
                    let from = inner.state;
                    inner.state = HealthState::Failed;
                    inner.message = message;
                    inner.last_transition = Some((from, HealthState::Failed));
                    inner.transitioned_at = Utc::now();
                }
            }
            Severity::Error => {
                if inner.state == HealthState::Running {
                    inner.state = HealthState::Degraded;
                    inner.message = message;
                    inner.last_transition =
                        Some((HealthState::Running, HealthState::Degraded));
                    inner.transitioned_at = Utc::now();
                }
            }
            Severity::Info | Severity::Warning => {}
        }
    }

    /// Consistent point-in-time view of the monitor.
    #[must_use]
    pub fn snapshot(&self) -> HealthSnapshot {
        let inner = self.inner.read().expect("health lock poisoned");
        HealthSnapshot {
            status: inner.state,
            message: inner.message.clone(),
            last_transition: inner
                .last_transition
                .map(|(from, to)| format!("{from} -> {to}")),
            timestamp: inner.transitioned_at,
            overall_healthy: matches!(inner.state, HealthState::Running),
            uptime_ms: self.started.elapsed().as_millis() as u64,
            recent: inner.events.iter().cloned().collect(),
        }
    }
}

/// JSON-serializable view of a [`HealthMonitor`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// Current state.
    pub status: HealthState,
    /// Message attached to the last transition.
    pub message: String,
    /// `from -> to` of the last transition, when any occurred.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition: Option<String>,
    /// When the last transition occurred.
    pub timestamp: DateTime<Utc>,
    /// `true` only in [`HealthState::Running`].
    pub overall_healthy: bool,
    /// Milliseconds since the monitor was created.
    pub uptime_ms: u64,
    /// Recent events, oldest first.
    pub recent: Vec<HealthEvent>,
}
