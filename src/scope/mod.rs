//! Scope control: iteration budgets and wall-clock deadlines.
//!
//! [`ScopeManager`] keeps one [`FeatureScope`] per feature touched in the
//! run and decides, independently of recovery, when a feature has used up
//! its budget and should be deferred. Deferral wins over a recovery retry.
//!
//! Complexity estimation here is a keyword heuristic. It only shapes the
//! simplification hint and carries no correctness guarantee.

use crate::plan::{DeferReason, FeatureId, Plan};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info};

/// Words in a description that push the complexity estimate up a level.
const COMPLEXITY_KEYWORDS: &[&str] = &[
    "refactor",
    "migrat",
    "security",
    "distributed",
    "concurren",
    "architecture",
    "authentication",
    "encryption",
];

// ============================================================================
// Constraints
// ============================================================================

/// Immutable limits for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    /// Iterations allowed per feature (0 = unlimited).
    pub max_iterations_per_feature: u32,
    /// Absolute end of the run.
    pub deadline: Option<DateTime<Utc>>,
    /// Minimum acceptable quality score.
    pub quality_threshold: f64,
    /// Mark features deferred as soon as they run out of budget.
    pub auto_defer: bool,
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            max_iterations_per_feature: 0,
            deadline: None,
            quality_threshold: 0.0,
            auto_defer: true,
        }
    }
}

// ============================================================================
// Complexity
// ============================================================================

/// Rough size of a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    /// Two steps or fewer.
    Low,
    /// Three to five steps.
    Medium,
    /// More than five steps, or a keyword upgrade from medium.
    High,
}

impl Complexity {
    /// One level up, saturating at `High`.
    #[must_use]
    pub fn upgrade(self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium | Self::High => Self::High,
        }
    }
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        })
    }
}

/// Estimate complexity from the step count and description.
#[must_use]
pub fn estimate_complexity(step_count: usize, description: &str) -> Complexity {
    let base = match step_count {
        0..=2 => Complexity::Low,
        3..=5 => Complexity::Medium,
        _ => Complexity::High,
    };
    let lower = description.to_lowercase();
    if COMPLEXITY_KEYWORDS.iter().any(|k| lower.contains(k)) {
        base.upgrade()
    } else {
        base
    }
}

// ============================================================================
// Feature Scope
// ============================================================================

/// Budget usage of one feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureScope {
    /// Feature this scope tracks.
    pub feature_id: FeatureId,
    /// Iterations spent on the feature so far.
    pub iterations_used: u32,
    /// When work on the feature started.
    pub start_time: DateTime<Utc>,
    /// When the feature completed, if it has.
    pub end_time: Option<DateTime<Utc>>,
    /// Complexity estimated at start.
    pub estimated_complexity: Complexity,
    /// Whether the feature was deferred.
    pub deferred: bool,
    /// Why the feature was deferred.
    pub defer_reason: Option<DeferReason>,
    /// Whether a simplification hint was already given.
    pub simplification_suggested: bool,
}

impl FeatureScope {
    fn new(feature_id: FeatureId, complexity: Complexity, now: DateTime<Utc>) -> Self {
        Self {
            feature_id,
            iterations_used: 0,
            start_time: now,
            end_time: None,
            estimated_complexity: complexity,
            deferred: false,
            defer_reason: None,
            simplification_suggested: false,
        }
    }
}

/// Run-level totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeSummary {
    /// Features that were started.
    pub total_features: usize,
    /// Features deferred.
    pub deferred: usize,
    /// Features completed.
    pub completed: usize,
    /// Iterations across all features.
    pub total_iterations: u32,
}

impl fmt::Display for ScopeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} features touched, {} completed, {} deferred, {} iterations",
            self.total_features, self.completed, self.deferred, self.total_iterations
        )
    }
}

// ============================================================================
// Scope Manager
// ============================================================================

/// Enforces per-feature and run-level budgets.
#[derive(Debug, Clone)]
pub struct ScopeManager {
    constraints: Constraints,
    scopes: HashMap<FeatureId, FeatureScope>,
    total_iterations: u32,
}

impl ScopeManager {
    /// Create a manager for one run.
    #[must_use]
    pub fn new(constraints: Constraints) -> Self {
        Self {
            constraints,
            scopes: HashMap::new(),
            total_iterations: 0,
        }
    }

    /// The run's constraints.
    #[must_use]
    pub fn constraints(&self) -> &Constraints {
        &self.constraints
    }

    /// Scope of a feature, if it has been touched.
    #[must_use]
    pub fn scope(&self, feature_id: FeatureId) -> Option<&FeatureScope> {
        self.scopes.get(&feature_id)
    }

    /// Begin tracking a feature.
    ///
    /// Calling this again for a tracked feature keeps its existing scope.
    pub fn start_feature(&mut self, feature_id: FeatureId, step_count: usize, description: &str) {
        let complexity = estimate_complexity(step_count, description);
        self.scopes.entry(feature_id).or_insert_with(|| {
            debug!("Feature {} estimated as {} complexity", feature_id, complexity);
            FeatureScope::new(feature_id, complexity, Utc::now())
        });
    }

    /// Count one iteration against the feature and the run.
    pub fn record_iteration(&mut self, feature_id: FeatureId) {
        self.total_iterations = self.total_iterations.saturating_add(1);
        let scope = self
            .scopes
            .entry(feature_id)
            .or_insert_with(|| FeatureScope::new(feature_id, Complexity::Low, Utc::now()));
        scope.iterations_used = scope.iterations_used.saturating_add(1);
    }

    /// Iterations recorded across all features.
    #[must_use]
    pub fn total_iterations(&self) -> u32 {
        self.total_iterations
    }

    /// Whether the feature should be deferred, and why.
    ///
    /// Pure check; see [`ScopeManager::check_deferral`] for the variant
    /// that records the deferral.
    #[must_use]
    pub fn should_defer(&self, feature_id: FeatureId) -> Option<DeferReason> {
        self.should_defer_at(feature_id, Utc::now())
    }

    /// [`ScopeManager::should_defer`] against an explicit clock.
    #[must_use]
    pub fn should_defer_at(&self, feature_id: FeatureId, now: DateTime<Utc>) -> Option<DeferReason> {
        let scope = self.scopes.get(&feature_id);
        if let Some(scope) = scope {
            if scope.deferred {
                return scope.defer_reason;
            }
        }

        let limit = self.constraints.max_iterations_per_feature;
        if limit > 0 && scope.is_some_and(|s| s.iterations_used >= limit) {
            return Some(DeferReason::IterationLimit);
        }
        if self.constraints.deadline.is_some_and(|d| now >= d) {
            return Some(DeferReason::Deadline);
        }
        None
    }

    /// Check deferral and, when auto-defer is on, record it.
    pub fn check_deferral(&mut self, feature_id: FeatureId) -> Option<DeferReason> {
        self.check_deferral_at(feature_id, Utc::now())
    }

    /// [`ScopeManager::check_deferral`] against an explicit clock.
    pub fn check_deferral_at(
        &mut self,
        feature_id: FeatureId,
        now: DateTime<Utc>,
    ) -> Option<DeferReason> {
        let reason = self.should_defer_at(feature_id, now)?;
        if self.constraints.auto_defer {
            self.defer(feature_id, reason);
        }
        Some(reason)
    }

    /// Mark a feature deferred. A deferral stays until cleared explicitly.
    pub fn defer(&mut self, feature_id: FeatureId, reason: DeferReason) {
        let scope = self
            .scopes
            .entry(feature_id)
            .or_insert_with(|| FeatureScope::new(feature_id, Complexity::Low, Utc::now()));
        if !scope.deferred {
            info!("Deferring feature {} ({})", feature_id, reason);
            scope.deferred = true;
            scope.defer_reason = Some(reason);
            scope.end_time = Some(Utc::now());
        }
    }

    /// Lift a deferral.
    pub fn clear_deferral(&mut self, feature_id: FeatureId) {
        if let Some(scope) = self.scopes.get_mut(&feature_id) {
            scope.deferred = false;
            scope.defer_reason = None;
            scope.end_time = None;
        }
    }

    /// Whether to suggest simplifying the feature.
    ///
    /// True for high-complexity features, or once half the per-feature
    /// budget is used. Never true twice for the same feature once
    /// [`ScopeManager::mark_simplification_suggested`] has been called.
    #[must_use]
    pub fn should_suggest_simplification(&self, feature_id: FeatureId) -> bool {
        let Some(scope) = self.scopes.get(&feature_id) else {
            return false;
        };
        if scope.simplification_suggested {
            return false;
        }
        if scope.estimated_complexity == Complexity::High {
            return true;
        }
        let limit = self.constraints.max_iterations_per_feature;
        limit > 0 && scope.iterations_used >= (limit / 2).max(1)
    }

    /// Record that a simplification was suggested.
    pub fn mark_simplification_suggested(&mut self, feature_id: FeatureId) {
        if let Some(scope) = self.scopes.get_mut(&feature_id) {
            scope.simplification_suggested = true;
        }
    }

    /// Record that a feature finished.
    pub fn complete_feature(&mut self, feature_id: FeatureId) {
        if let Some(scope) = self.scopes.get_mut(&feature_id) {
            scope.end_time = Some(Utc::now());
        }
    }

    /// Time left until the deadline, zero once it has passed.
    #[must_use]
    pub fn remaining_time(&self) -> Option<chrono::Duration> {
        self.remaining_time_at(Utc::now())
    }

    /// [`ScopeManager::remaining_time`] against an explicit clock.
    #[must_use]
    pub fn remaining_time_at(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.constraints
            .deadline
            .map(|d| (d - now).max(chrono::Duration::zero()))
    }

    /// Write every recorded deferral into the plan list.
    ///
    /// Returns the number of plans changed.
    pub fn apply_deferrals(&self, plans: &mut [Plan]) -> usize {
        let mut changed = 0;
        for plan in plans.iter_mut() {
            let Some(scope) = self.scopes.get(&plan.id) else {
                continue;
            };
            if scope.deferred && (!plan.deferred || plan.defer_reason != scope.defer_reason) {
                plan.deferred = true;
                plan.defer_reason = scope.defer_reason;
                changed += 1;
            }
        }
        changed
    }

    /// Run-level totals.
    #[must_use]
    pub fn summary(&self) -> ScopeSummary {
        let deferred = self.scopes.values().filter(|s| s.deferred).count();
        let completed = self
            .scopes
            .values()
            .filter(|s| !s.deferred && s.end_time.is_some())
            .count();
        ScopeSummary {
            total_features: self.scopes.len(),
            deferred,
            completed,
            total_iterations: self.total_iterations,
        }
    }
}
