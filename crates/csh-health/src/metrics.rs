// SPDX-License-Identifier: MIT OR Apache-2.0
//! Lock-free request counters and the request timer guard.

use csh_core::StatusCategory;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::sync::{Arc, RwLock};
use std::time::Instant;

// ---------------------------------------------------------------------------
// MetricsRegistry
// ---------------------------------------------------------------------------

/// Atomic request-level metrics shared across workers.
///
/// Invariant: `total = successful + failed + in_progress` at every instant.
/// `total` and `in_progress` move together when a [`RequestTimer`] starts;
/// the timer's drop moves `in_progress` into exactly one of `successful`
/// or `failed`.
pub struct MetricsRegistry {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    in_progress: AtomicU64,
    duration_sum_ms: AtomicU64,
    duration_min_ms: AtomicU64,
    duration_max_ms: AtomicU64,
    by_category: [AtomicU64; StatusCategory::COUNT],
    components: RwLock<BTreeMap<String, Arc<AtomicU64>>>,
    started: Instant,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    /// Create a zeroed registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            successful: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            in_progress: AtomicU64::new(0),
            duration_sum_ms: AtomicU64::new(0),
            duration_min_ms: AtomicU64::new(u64::MAX),
            duration_max_ms: AtomicU64::new(0),
            by_category: std::array::from_fn(|_| AtomicU64::new(0)),
            components: RwLock::new(BTreeMap::new()),
            started: Instant::now(),
        }
    }

    /// Begin timing one request.  Increments `total` and `in_progress`.
    #[must_use]
    pub fn start_request(self: &Arc<Self>) -> RequestTimer {
        self.total.fetch_add(1, Relaxed);
        self.in_progress.fetch_add(1, Relaxed);
        RequestTimer {
            registry: Arc::clone(self),
            start: Instant::now(),
            outcome: None,
        }
    }

    /// Current in-progress gauge.
    #[must_use]
    pub fn in_progress(&self) -> u64 {
        self.in_progress.load(Relaxed)
    }

    /// Total requests observed.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total.load(Relaxed)
    }

    /// Bump a named per-component counter.
    pub fn record_component(&self, component: &str) {
        if let Some(counter) = self
            .components
            .read()
            .expect("components lock poisoned")
            .get(component)
        {
            counter.fetch_add(1, Relaxed);
            return;
        }
        self.components
            .write()
            .expect("components lock poisoned")
            .entry(component.to_string())
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .fetch_add(1, Relaxed);
    }

    fn finish(&self, duration_ms: u64, outcome: StatusCategory) {
        self.duration_sum_ms.fetch_add(duration_ms, Relaxed);
        self.duration_min_ms.fetch_min(duration_ms, Relaxed);
        self.duration_max_ms.fetch_max(duration_ms, Relaxed);
        self.by_category[outcome.index()].fetch_add(1, Relaxed);
        if outcome == StatusCategory::Success {
            self.successful.fetch_add(1, Relaxed);
        } else {
            self.failed.fetch_add(1, Relaxed);
        }
        self.in_progress.fetch_sub(1, Relaxed);
    }

    /// Point-in-time snapshot of every counter.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let total = self.total.load(Relaxed);
        let successful = self.successful.load(Relaxed);
        let failed = self.failed.load(Relaxed);
        let sum = self.duration_sum_ms.load(Relaxed);
        let min = self.duration_min_ms.load(Relaxed);
        let completed = successful + failed;

        let mut categories = BTreeMap::new();
        for category in StatusCategory::all() {
            let count = self.by_category[category.index()].load(Relaxed);
            if count > 0 {
                categories.insert(category.as_str().to_string(), count);
            }
        }
        let components = self
            .components
            .read()
            .expect("components lock poisoned")
            .iter()
            .map(|(name, counter)| (name.clone(), counter.load(Relaxed)))
            .collect();

        MetricsSnapshot {
            total_requests: total,
            successful_requests: successful,
            failed_requests: failed,
            in_progress_requests: self.in_progress.load(Relaxed),
            duration_sum_ms: sum,
            duration_min_ms: if min == u64::MAX { None } else { Some(min) },
            duration_max_ms: self.duration_max_ms.load(Relaxed),
            average_duration_ms: if completed == 0 { 0 } else { sum / completed },
            categories,
            components,
            uptime_ms: self.started.elapsed().as_millis() as u64,
            memory: MemoryView::current(),
        }
    }
}

// ---------------------------------------------------------------------------
// RequestTimer
// ---------------------------------------------------------------------------

/// Scope guard for one request.
///
/// Report the outcome with [`RequestTimer::success`] or
/// [`RequestTimer::failure`]; a guard dropped without a report records a
/// success, so the in-progress gauge can never leak.
pub struct RequestTimer {
    registry: Arc<MetricsRegistry>,
    start: Instant,
    outcome: Option<StatusCategory>,
}

impl RequestTimer {
    /// Record a successful request.
    pub fn success(mut self) {
        self.outcome = Some(StatusCategory::Success);
    }

    /// Record a failed request under the given category.
    pub fn failure(mut self, category: StatusCategory) {
        self.outcome = Some(if category == StatusCategory::Success {
            StatusCategory::ExecutionFailed
        } else {
            category
        });
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        let duration_ms = self.start.elapsed().as_millis() as u64;
        let outcome = self.outcome.take().unwrap_or(StatusCategory::Success);
        self.registry.finish(duration_ms, outcome);
    }
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// Process memory view.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MemoryView {
    /// Resident set size in bytes, when the platform exposes it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resident_bytes: Option<u64>,
}

impl MemoryView {
    /// Sample the current process.
    #[must_use]
    pub fn current() -> Self {
        Self {
            resident_bytes: read_resident_bytes(),
        }
    }
}

#[cfg(target_os = "linux")]
fn read_resident_bytes() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(pages * 4096)
}

#[cfg(not(target_os = "linux"))]
fn read_resident_bytes() -> Option<u64> {
    None
}

/// Non-atomic, serializable snapshot of a [`MetricsRegistry`].
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Requests started.
    pub total_requests: u64,
    /// Requests that completed successfully.
    pub successful_requests: u64,
    /// Requests that completed with a failure.
    pub failed_requests: u64,
    /// Requests currently executing.
    pub in_progress_requests: u64,
    /// Sum of completed request durations.
    pub duration_sum_ms: u64,
    /// Fastest completed request, if any completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_min_ms: Option<u64>,
    /// Slowest completed request.
    pub duration_max_ms: u64,
    /// Mean completed request duration.
    pub average_duration_ms: u64,
    /// Completed requests by status category (zero entries omitted).
    pub categories: BTreeMap<String, u64>,
    /// Named per-component counters.
    pub components: BTreeMap<String, u64>,
    /// Milliseconds since the registry was created.
    pub uptime_ms: u64,
    /// Process memory view.
    pub memory: MemoryView,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conservation_holds(registry: &MetricsRegistry) -> bool {
        let snap = registry.snapshot();
        snap.total_requests
            == snap.successful_requests + snap.failed_requests + snap.in_progress_requests
    }

    #[test]
    fn timer_success_moves_in_progress_to_successful() {
        let registry = Arc::new(MetricsRegistry::new());
        let timer = registry.start_request();
        assert_eq!(registry.in_progress(), 1);
        assert!(conservation_holds(&registry));

        timer.success();
        assert_eq!(registry.in_progress(), 0);
        let snap = registry.snapshot();
        assert_eq!(snap.successful_requests, 1);
        assert_eq!(snap.total_requests, 1);
        assert!(conservation_holds(&registry));
    }

    #[test]
    fn timer_failure_records_category() {
        let registry = Arc::new(MetricsRegistry::new());
        registry.start_request().failure(StatusCategory::BadRequest);
        registry
            .start_request()
            .failure(StatusCategory::ServiceUnavailable);
        let snap = registry.snapshot();
        assert_eq!(snap.failed_requests, 2);
        assert_eq!(snap.categories.get("bad_request"), Some(&1));
        assert_eq!(snap.categories.get("service_unavailable"), Some(&1));
        assert!(conservation_holds(&registry));
    }

    #[test]
    fn unreported_timer_defaults_to_success() {
        let registry = Arc::new(MetricsRegistry::new());
        {
            let _timer = registry.start_request();
            // Dropped without reporting.
        }
        let snap = registry.snapshot();
        assert_eq!(snap.in_progress_requests, 0);
        assert_eq!(snap.successful_requests, 1);
        assert!(conservation_holds(&registry));
    }

    #[test]
    fn in_progress_returns_to_prior_value() {
        let registry = Arc::new(MetricsRegistry::new());
        registry.start_request().success();
        let before = registry.in_progress();
        let timer = registry.start_request();
        assert_eq!(registry.in_progress(), before + 1);
        timer.failure(StatusCategory::ExecutionFailed);
        assert_eq!(registry.in_progress(), before);
    }

    #[test]
    fn duration_extremes_are_tracked() {
        let registry = Arc::new(MetricsRegistry::new());
        registry.start_request().success();
        let snap = registry.snapshot();
        assert!(snap.duration_min_ms.is_some());
        assert!(snap.duration_max_ms >= snap.duration_min_ms.unwrap());
    }

    #[test]
    fn component_counters_accumulate() {
        let registry = MetricsRegistry::new();
        registry.record_component("dispatcher");
        registry.record_component("dispatcher");
        registry.record_component("session");
        let snap = registry.snapshot();
        assert_eq!(snap.components.get("dispatcher"), Some(&2));
        assert_eq!(snap.components.get("session"), Some(&1));
    }

    #[test]
    fn failure_with_success_category_is_coerced() {
        let registry = Arc::new(MetricsRegistry::new());
        registry.start_request().failure(StatusCategory::Success);
        let snap = registry.snapshot();
        assert_eq!(snap.failed_requests, 1);
        assert_eq!(snap.categories.get("execution_failed"), Some(&1));
    }

    #[test]
    fn snapshot_is_json_serializable() {
        let registry = Arc::new(MetricsRegistry::new());
        registry.start_request().success();
        let json = serde_json::to_string(&registry.snapshot()).unwrap();
        assert!(json.contains("total_requests"));
    }
}
