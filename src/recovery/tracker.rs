//! Consecutive-failure counters per feature.
//!
//! Each feature runs its own small automaton:
//!
//! ```text
//! Clean ──failure──> Failing(n) ──n reaches max──> Escalated
//!   ▲                    │                             │
//!   └──── success / skip / replan reset ───────────────┘
//! ```
//!
//! The tracker knows nothing about strategies; it only counts.

use super::Failure;
use crate::plan::FeatureId;
use std::collections::HashMap;

/// Where a feature stands relative to its retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureHealth {
    /// No failures since the last reset
    Clean,
    /// Failing with retries left
    Failing(u32),
    /// Retry budget used up
    Escalated,
}

#[derive(Debug, Default)]
struct Entry {
    count: u32,
    log: Vec<Failure>,
}

/// Per-feature failure counters and logs.
#[derive(Debug, Default)]
pub struct FailureTracker {
    entries: HashMap<FeatureId, Entry>,
}

impl FailureTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure against its feature and return the new count.
    pub fn record(&mut self, failure: Failure) -> u32 {
        let entry = self.entries.entry(failure.feature_id).or_default();
        entry.count = entry.count.saturating_add(1);
        entry.log.push(failure);
        entry.count
    }

    /// Consecutive failures for a feature.
    #[must_use]
    pub fn count(&self, feature_id: FeatureId) -> u32 {
        self.entries.get(&feature_id).map_or(0, |e| e.count)
    }

    /// Failures since the last reset, oldest first.
    #[must_use]
    pub fn failures(&self, feature_id: FeatureId) -> &[Failure] {
        self.entries
            .get(&feature_id)
            .map(|e| e.log.as_slice())
            .unwrap_or_default()
    }

    /// Clear a feature's counter and log.
    pub fn reset(&mut self, feature_id: FeatureId) {
        self.entries.remove(&feature_id);
    }

    /// Clear every feature.
    pub fn reset_all(&mut self) {
        self.entries.clear();
    }

    /// Escalation state against a retry budget.
    #[must_use]
    pub fn health(&self, feature_id: FeatureId, max_retries: u32) -> FeatureHealth {
        match self.count(feature_id) {
            0 => FeatureHealth::Clean,
            n if n < max_retries => FeatureHealth::Failing(n),
            _ => FeatureHealth::Escalated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::FailureKind;

    fn failure(feature_id: FeatureId) -> Failure {
        Failure::new(FailureKind::Test, "boom", feature_id, 1)
    }

    #[test]
    fn test_record_increments_count() {
        let mut tracker = FailureTracker::new();
        assert_eq!(tracker.record(failure(1)), 1);
        assert_eq!(tracker.record(failure(1)), 2);
        assert_eq!(tracker.count(1), 2);
        assert_eq!(tracker.failures(1).len(), 2);
    }

    #[test]
    fn test_unknown_feature_is_clean() {
        let tracker = FailureTracker::new();
        assert_eq!(tracker.count(42), 0);
        assert!(tracker.failures(42).is_empty());
        assert_eq!(tracker.health(42, 3), FeatureHealth::Clean);
    }

    #[test]
    fn test_reset_only_touches_one_feature() {
        let mut tracker = FailureTracker::new();
        tracker.record(failure(1));
        tracker.record(failure(2));
        tracker.reset(1);
        assert_eq!(tracker.count(1), 0);
        assert_eq!(tracker.count(2), 1);

        tracker.reset_all();
        assert_eq!(tracker.count(2), 0);
    }

    #[test]
    fn test_health_transitions() {
        let mut tracker = FailureTracker::new();
        tracker.record(failure(1));
        assert_eq!(tracker.health(1, 2), FeatureHealth::Failing(1));
        tracker.record(failure(1));
        assert_eq!(tracker.health(1, 2), FeatureHealth::Escalated);
        tracker.reset(1);
        assert_eq!(tracker.health(1, 2), FeatureHealth::Clean);
    }
}
