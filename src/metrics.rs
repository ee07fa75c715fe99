//! Observability hooks.
//!
//! The engine reports selections, updates, full recomputations and condition
//! estimates through [`EngineMetrics`]. Wire it to whatever metrics facade the
//! host service uses; [`NoopMetrics`] is the default and [`InMemoryMetrics`]
//! keeps plain counters (handy for tests and debug endpoints).

use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::SkipReason;

/// Why an arm's inverse was rebuilt from scratch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(serde::Serialize, serde::Deserialize)]
pub enum RecomputeCause {
    /// `updates % recompute_interval == 0`.
    Periodic,
    /// Condition estimate exceeded the configured threshold.
    ConditionNumber,
    /// Sherman–Morrison denominator was non-positive.
    DegenerateUpdate,
}

/// Sink for engine counters and gauges.
///
/// Every method has a no-op default, so implementors only override what they
/// export. Calls happen on the caller's thread; keep them cheap.
pub trait EngineMetrics: Send + Sync {
    /// `arm` was returned by a selection call.
    fn record_selection(&self, _arm: &str) {}

    /// A reward observation was folded into `arm`.
    fn record_update(&self, _arm: &str) {}

    /// `arm`'s inverse was rebuilt by full inversion.
    fn record_recompute(&self, _arm: &str, _cause: RecomputeCause) {}

    /// Condition estimate for `arm`, sampled after an update.
    fn record_condition_number(&self, _arm: &str, _cond: f64) {}

    /// A persisted record for `arm` was skipped during restore.
    fn record_restore_skip(&self, _arm: &str, _reason: SkipReason) {}
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl EngineMetrics for NoopMetrics {}

/// Point-in-time copy of [`InMemoryMetrics`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub selections: BTreeMap<String, u64>,
    pub updates: BTreeMap<String, u64>,
    pub recomputes: BTreeMap<RecomputeCause, u64>,
    /// Last sampled condition estimate per arm.
    pub condition: BTreeMap<String, f64>,
    pub restore_skips: u64,
}

impl MetricsSnapshot {
    pub fn total_selections(&self) -> u64 {
        self.selections.values().sum()
    }

    pub fn total_recomputes(&self) -> u64 {
        self.recomputes.values().sum()
    }
}

/// Mutex-guarded counters.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    inner: Mutex<MetricsSnapshot>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().clone()
    }

    pub fn recomputes(&self, cause: RecomputeCause) -> u64 {
        self.inner.lock().recomputes.get(&cause).copied().unwrap_or(0)
    }
}

impl EngineMetrics for InMemoryMetrics {
    fn record_selection(&self, arm: &str) {
        *self.inner.lock().selections.entry(arm.to_string()).or_insert(0) += 1;
    }

    fn record_update(&self, arm: &str) {
        *self.inner.lock().updates.entry(arm.to_string()).or_insert(0) += 1;
    }

    fn record_recompute(&self, _arm: &str, cause: RecomputeCause) {
        *self.inner.lock().recomputes.entry(cause).or_insert(0) += 1;
    }

    fn record_condition_number(&self, arm: &str, cond: f64) {
        self.inner.lock().condition.insert(arm.to_string(), cond);
    }

    fn record_restore_skip(&self, _arm: &str, _reason: SkipReason) {
        self.inner.lock().restore_skips += 1;
    }
}
