//! Replan triggers.
//!
//! Triggers are pure predicates over [`ReplanState`]. They hold only their
//! own thresholds. The manual trigger is the exception: it is a latch that
//! the driver sets and the manager consumes.

use super::{ReplanState, TriggerType};
use std::fmt;

/// Default consecutive failures that fire [`TestFailureTrigger`].
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Default blocked features that fire [`BlockedFeatureTrigger`].
pub const DEFAULT_MIN_BLOCKED: usize = 1;

/// A condition that may warrant a replan.
pub trait ReplanTrigger: Send + Sync + fmt::Debug {
    /// Which trigger this is.
    fn trigger_type(&self) -> TriggerType;

    /// Whether the trigger fires for `state`.
    fn check(&self, state: &ReplanState) -> bool;
}

/// Fires once a feature has failed `threshold` times in a row.
#[derive(Debug, Clone, Copy)]
pub struct TestFailureTrigger {
    threshold: u32,
}

impl TestFailureTrigger {
    #[must_use]
    pub fn new(threshold: u32) -> Self {
        Self { threshold }
    }
}

impl Default for TestFailureTrigger {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD)
    }
}

impl ReplanTrigger for TestFailureTrigger {
    fn trigger_type(&self) -> TriggerType {
        TriggerType::TestFailure
    }

    fn check(&self, state: &ReplanState) -> bool {
        state.consecutive_failures >= self.threshold
    }
}

/// Fires when the plan file hash changed between two state updates.
///
/// Edge-triggered: it fires on the first check after an outside edit only.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequirementChangeTrigger;

impl ReplanTrigger for RequirementChangeTrigger {
    fn trigger_type(&self) -> TriggerType {
        TriggerType::RequirementChange
    }

    fn check(&self, state: &ReplanState) -> bool {
        !state.plan_hash.is_empty()
            && !state.last_plan_hash.is_empty()
            && state.plan_hash != state.last_plan_hash
    }
}

/// Fires once at least `min_blocked` features are blocked.
#[derive(Debug, Clone, Copy)]
pub struct BlockedFeatureTrigger {
    min_blocked: usize,
}

impl BlockedFeatureTrigger {
    #[must_use]
    pub fn new(min_blocked: usize) -> Self {
        Self { min_blocked }
    }
}

impl Default for BlockedFeatureTrigger {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_BLOCKED)
    }
}

impl ReplanTrigger for BlockedFeatureTrigger {
    fn trigger_type(&self) -> TriggerType {
        TriggerType::BlockedFeature
    }

    fn check(&self, state: &ReplanState) -> bool {
        state.blocked_features.len() >= self.min_blocked
    }
}

/// Explicit replan request.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManualTrigger {
    fired: bool,
}

impl ManualTrigger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a replan.
    pub fn fire(&mut self) {
        self.fired = true;
    }

    /// Whether a request is pending.
    #[must_use]
    pub fn is_fired(&self) -> bool {
        self.fired
    }

    /// Consume the pending request.
    pub fn take(&mut self) -> bool {
        std::mem::take(&mut self.fired)
    }
}

impl ReplanTrigger for ManualTrigger {
    fn trigger_type(&self) -> TriggerType {
        TriggerType::Manual
    }

    fn check(&self, _state: &ReplanState) -> bool {
        self.fired
    }
}
