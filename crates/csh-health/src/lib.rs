// SPDX-License-Identifier: MIT OR Apache-2.0
//! Health state machine and lock-free request metrics.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// The health state machine and event ring.
pub mod health;
/// Lock-free request counters and the request timer guard.
pub mod metrics;

pub use health::{HealthEvent, HealthMonitor, HealthSnapshot, HealthState, Severity};
pub use metrics::{MemoryView, MetricsRegistry, MetricsSnapshot, RequestTimer};
