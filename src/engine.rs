//! Per-iteration glue between recovery, scope control and replanning.
//!
//! The driver runs the agent on a feature and hands the result to
//! [`IterationEngine::finish_iteration`], which answers with a single
//! [`Directive`]. Replans are awaited separately through
//! [`IterationEngine::maybe_replan`], since they may call out to an agent.
//!
//! # Example
//!
//! ```rust,ignore
//! use ratchet::config::RunConfig;
//! use ratchet::engine::{Directive, IterationEngine};
//!
//! let config = RunConfig::load(project_dir)?;
//! let mut engine = IterationEngine::from_config("plans.json", &config, None, None)?;
//!
//! if let Some(reason) = engine.begin_feature(&plan) {
//!     // already out of budget
//! }
//! let outcome = engine.finish_iteration(plan.id, &output, exit_code, plans)?;
//! match outcome.directive {
//!     Directive::Retry { prompt } => { /* run again with prompt */ }
//!     Directive::Skip | Directive::Defer(_) => { /* move on */ }
//!     Directive::Continue => {}
//! }
//! engine.maybe_replan().await?;
//! ```

use crate::config::RunConfig;
use crate::error::Result;
use crate::plan::{DeferReason, FeatureId, Plan};
use crate::recovery::{Failure, FailureKind, RecoveryManager, RecoveryResult};
use crate::replan::{ReplanManager, ReplanResult, TriggerType};
use crate::scope::ScopeManager;
use crate::testing::{AgentProcess, GitOperations};
use chrono::Utc;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What the driver should do after an iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Nothing failed; keep working on the feature or move on.
    Continue,
    /// Run the feature again with this prompt.
    Retry { prompt: String },
    /// Give up on the feature for now.
    Skip,
    /// The feature is out of budget.
    Defer(DeferReason),
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continue => write!(f, "continue"),
            Self::Retry { .. } => write!(f, "retry"),
            Self::Skip => write!(f, "skip"),
            Self::Defer(reason) => write!(f, "defer ({})", reason),
        }
    }
}

/// Everything the engine decided about one iteration.
#[derive(Debug, Clone)]
pub struct IterationOutcome {
    /// The classified failure, if the attempt failed.
    pub failure: Option<Failure>,
    /// Tier-1 decision.
    pub recovery: RecoveryResult,
    /// What to do next. A deferral overrides the recovery decision.
    pub directive: Directive,
    /// Suggest simplifying the feature to the agent.
    pub simplify: bool,
    /// Replan trigger that fired after this iteration, if any.
    pub trigger: Option<TriggerType>,
}

/// Owns the three control tiers for one run.
#[derive(Debug)]
pub struct IterationEngine {
    recovery: RecoveryManager,
    scope: ScopeManager,
    replan: ReplanManager,
}

impl IterationEngine {
    #[must_use]
    pub fn new(recovery: RecoveryManager, scope: ScopeManager, replan: ReplanManager) -> Self {
        Self {
            recovery,
            scope,
            replan,
        }
    }

    /// Build an engine for a plan file from the run configuration.
    ///
    /// The deadline, if any, counts from now.
    ///
    /// # Errors
    ///
    /// Returns an error if existing plan backups cannot be read.
    pub fn from_config(
        plan_path: impl AsRef<Path>,
        config: &RunConfig,
        git: Option<Box<dyn GitOperations>>,
        agent: Option<Arc<dyn AgentProcess>>,
    ) -> Result<Self> {
        let recovery = RecoveryManager::from_config(config, git);
        let scope = ScopeManager::new(config.constraints(Utc::now()));
        let mut replan = ReplanManager::from_config(plan_path, config)?;
        if let Some(agent) = agent {
            replan = replan.with_agent(agent);
        }
        Ok(Self::new(recovery, scope, replan))
    }

    #[must_use]
    pub fn recovery(&self) -> &RecoveryManager {
        &self.recovery
    }

    #[must_use]
    pub fn scope(&self) -> &ScopeManager {
        &self.scope
    }

    pub fn scope_mut(&mut self) -> &mut ScopeManager {
        &mut self.scope
    }

    #[must_use]
    pub fn replan(&self) -> &ReplanManager {
        &self.replan
    }

    pub fn replan_mut(&mut self) -> &mut ReplanManager {
        &mut self.replan
    }

    // ========================================================================
    // Iteration lifecycle
    // ========================================================================

    /// Start (or resume) work on a feature.
    ///
    /// Returns the deferral reason if the feature is already out of budget.
    pub fn begin_feature(&mut self, plan: &Plan) -> Option<DeferReason> {
        self.scope
            .start_feature(plan.id, plan.steps.len(), &plan.description);
        let reason = self.deferral(plan.id);
        if let Some(reason) = reason {
            self.replan.mark_blocked(plan.id);
            info!("Feature {} deferred before starting: {}", plan.id, reason);
        }
        reason
    }

    /// Account for one finished attempt at a feature.
    ///
    /// `plans` is the driver's current view of the plan list; it becomes
    /// the replan state's plans.
    ///
    /// # Errors
    ///
    /// Only infrastructure failures are errors, such as a rollback that
    /// could not reset the working tree.
    pub fn finish_iteration(
        &mut self,
        feature_id: FeatureId,
        output: &str,
        exit_code: i32,
        plans: Vec<Plan>,
    ) -> Result<IterationOutcome> {
        self.scope.record_iteration(feature_id);
        let iteration = self.scope.total_iterations();

        let (failure, recovery) =
            self.recovery
                .handle_failure(output, exit_code, feature_id, iteration)?;

        let simplify =
            failure.is_some() && self.scope.should_suggest_simplification(feature_id);
        if simplify {
            self.scope.mark_simplification_suggested(feature_id);
        }

        let directive = match self.deferral(feature_id) {
            Some(reason) => {
                self.replan.mark_blocked(feature_id);
                Directive::Defer(reason)
            }
            None if recovery.should_retry => Directive::Retry {
                prompt: recovery.modified_prompt.clone().unwrap_or_default(),
            },
            None if recovery.should_skip => Directive::Skip,
            None => Directive::Continue,
        };

        let kinds: Vec<FailureKind> = self
            .recovery
            .failures_for(feature_id)
            .iter()
            .map(|f| f.kind)
            .collect();
        self.replan.update_state(
            feature_id,
            self.recovery.failure_count(feature_id),
            kinds,
            plans,
        );

        let trigger = if self.replan.check_manual() {
            Some(TriggerType::Manual)
        } else {
            self.replan.check_triggers()
        };

        if directive == Directive::Skip {
            self.recovery.record_skip(feature_id);
        }

        debug!(
            "Iteration {} on feature {}: {}",
            iteration, feature_id, directive
        );
        Ok(IterationOutcome {
            failure,
            recovery,
            directive,
            simplify,
            trigger,
        })
    }

    /// Record that a feature is done.
    pub fn complete_feature(&mut self, feature_id: FeatureId) {
        self.scope.complete_feature(feature_id);
        self.recovery.record_success(feature_id);
        self.replan.unblock(feature_id);
    }

    /// Run a replan if one is due.
    ///
    /// A pending manual request always runs; trigger-driven replans need
    /// auto-replan on. After a successful replan the feature it targeted
    /// starts with a clean failure count.
    ///
    /// # Errors
    ///
    /// Propagates [`ReplanManager::execute_replan`] errors. The plan file
    /// is untouched in that case.
    pub async fn maybe_replan(&mut self) -> Result<Option<ReplanResult>> {
        let trigger = if self.replan.check_manual() {
            Some(TriggerType::Manual)
        } else {
            self.replan.should_replan()
        };
        let Some(trigger) = trigger else {
            return Ok(None);
        };

        let target = self.replan.state().feature_id;
        let strategy = self.replan.strategy();
        let result = self.replan.execute_replan(strategy, trigger).await?;

        if result.success {
            if let Some(id) = target {
                self.recovery.reset_feature(id);
            }
        }
        Ok(Some(result))
    }

    fn deferral(&mut self, feature_id: FeatureId) -> Option<DeferReason> {
        if self.scope.constraints().auto_defer {
            return self.scope.check_deferral(feature_id);
        }
        if let Some(reason) = self.scope.should_defer(feature_id) {
            warn!(
                "Feature {} is over budget ({}) but auto-defer is off",
                feature_id, reason
            );
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{load_plans, save_plans};
    use crate::replan::StrategyType;
    use crate::scope::Constraints;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const TEST_FAILURE: &str =
        "running 2 tests\ntest export::csv ... FAILED\ntest result: FAILED. 1 passed; 1 failed";

    fn plans() -> Vec<Plan> {
        vec![
            Plan::new(6, "Setup").mark_tested(),
            Plan::new(7, "Export report"),
            Plan::new(8, "Import data"),
        ]
    }

    fn setup(config: &RunConfig) -> (TempDir, PathBuf, IterationEngine) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plans.json");
        save_plans(&path, &plans()).unwrap();
        let engine = IterationEngine::from_config(&path, config, None, None).unwrap();
        (dir, path, engine)
    }

    fn config() -> RunConfig {
        RunConfig {
            max_retries: 2,
            replan_threshold: 2,
            ..RunConfig::default()
        }
    }

    // ========================================================================
    // finish_iteration
    // ========================================================================

    #[test]
    fn test_clean_iteration_continues() {
        let (_dir, _path, mut engine) = setup(&config());
        engine.begin_feature(&plans()[1]);
        let outcome = engine.finish_iteration(7, "all good", 0, plans()).unwrap();

        assert!(outcome.failure.is_none());
        assert_eq!(outcome.directive, Directive::Continue);
        assert_eq!(outcome.trigger, None);
        assert_eq!(engine.scope().total_iterations(), 1);
    }

    #[test]
    fn test_failures_escalate_to_skip_and_fire_trigger() {
        let (_dir, _path, mut engine) = setup(&config());
        engine.begin_feature(&plans()[1]);

        let first = engine.finish_iteration(7, TEST_FAILURE, 101, plans()).unwrap();
        match &first.directive {
            Directive::Retry { prompt } => assert!(prompt.contains("fix failing test")),
            other => panic!("expected retry, got {other:?}"),
        }
        assert_eq!(first.trigger, None);

        let second = engine.finish_iteration(7, TEST_FAILURE, 101, plans()).unwrap();
        assert_eq!(second.directive, Directive::Skip);
        assert_eq!(second.trigger, Some(TriggerType::TestFailure));
        assert_eq!(engine.replan().state().consecutive_failures, 2);
        assert_eq!(
            engine.replan().state().failure_types,
            vec![FailureKind::Test, FailureKind::Test]
        );
        // The skip resets the tier-1 counter once the state has seen it.
        assert_eq!(engine.recovery().failure_count(7), 0);
    }

    #[test]
    fn test_deferral_overrides_recovery() {
        let config = RunConfig {
            scope_limit: 1,
            ..config()
        };
        let (_dir, _path, mut engine) = setup(&config);
        engine.begin_feature(&plans()[1]);

        let outcome = engine.finish_iteration(7, TEST_FAILURE, 101, plans()).unwrap();
        assert!(outcome.recovery.should_retry);
        assert_eq!(outcome.directive, Directive::Defer(DeferReason::IterationLimit));
        assert_eq!(engine.replan().state().blocked_features, vec![7]);
        assert_eq!(outcome.trigger, Some(TriggerType::BlockedFeature));
    }

    #[test]
    fn test_deferral_ignored_without_auto_defer() {
        let config = RunConfig {
            scope_limit: 1,
            auto_defer: false,
            ..config()
        };
        let (_dir, _path, mut engine) = setup(&config);
        let outcome = engine.finish_iteration(7, "fine", 0, plans()).unwrap();
        assert_eq!(outcome.directive, Directive::Continue);
        assert!(engine.replan().state().blocked_features.is_empty());
    }

    #[test]
    fn test_simplification_suggested_once() {
        let config = RunConfig {
            scope_limit: 4,
            ..config()
        };
        let (_dir, _path, mut engine) = setup(&config);
        engine.begin_feature(&plans()[1]);

        let first = engine.finish_iteration(7, TEST_FAILURE, 101, plans()).unwrap();
        assert!(!first.simplify);
        let second = engine.finish_iteration(7, TEST_FAILURE, 101, plans()).unwrap();
        assert!(second.simplify);
        let third = engine.finish_iteration(7, TEST_FAILURE, 101, plans()).unwrap();
        assert!(!third.simplify);
    }

    #[test]
    fn test_begin_feature_past_deadline() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plans.json");
        save_plans(&path, &plans()).unwrap();
        let scope = ScopeManager::new(Constraints {
            deadline: Some(Utc::now() - chrono::Duration::hours(1)),
            ..Constraints::default()
        });
        let mut engine = IterationEngine::new(
            RecoveryManager::with_retry(3),
            scope,
            ReplanManager::new(&path).unwrap(),
        );

        assert_eq!(engine.begin_feature(&plans()[1]), Some(DeferReason::Deadline));
        assert_eq!(engine.replan().state().blocked_features, vec![7]);
    }

    #[test]
    fn test_complete_feature_unblocks() {
        let (_dir, _path, mut engine) = setup(&config());
        engine.replan_mut().mark_blocked(7);
        engine.finish_iteration(7, TEST_FAILURE, 101, plans()).unwrap();

        engine.complete_feature(7);
        assert_eq!(engine.recovery().failure_count(7), 0);
        assert!(engine.replan().state().blocked_features.is_empty());
        assert_eq!(engine.scope().summary().completed, 1);
    }

    // ========================================================================
    // maybe_replan
    // ========================================================================

    #[tokio::test]
    async fn test_no_replan_without_auto_replan() {
        let (_dir, _path, mut engine) = setup(&config());
        engine.finish_iteration(7, TEST_FAILURE, 101, plans()).unwrap();
        engine.finish_iteration(7, TEST_FAILURE, 101, plans()).unwrap();
        assert!(engine.maybe_replan().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_auto_replan_after_repeated_failures() {
        let config = RunConfig {
            max_retries: 5,
            auto_replan: true,
            ..config()
        };
        let (_dir, path, mut engine) = setup(&config);
        engine.finish_iteration(7, TEST_FAILURE, 101, plans()).unwrap();
        let outcome = engine.finish_iteration(7, TEST_FAILURE, 101, plans()).unwrap();
        assert!(matches!(outcome.directive, Directive::Retry { .. }));
        assert_eq!(engine.recovery().failure_count(7), 2);

        let result = engine.maybe_replan().await.unwrap().unwrap();
        assert!(result.success);
        assert!(result.message.contains("feature 7 for review"));
        assert_eq!(engine.recovery().failure_count(7), 0);
        assert_eq!(engine.replan().versions().len(), 1);
        assert!(load_plans(&path).unwrap()[1]
            .description
            .ends_with("[needs review]"));

        // Nothing left to do.
        assert!(engine.maybe_replan().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_manual_replan_runs_without_auto_replan() {
        let config = RunConfig {
            replan_strategy: StrategyType::None,
            ..config()
        };
        let (_dir, _path, mut engine) = setup(&config);
        engine.replan_mut().trigger_manual();

        let outcome = engine.finish_iteration(7, "ok", 0, plans()).unwrap();
        assert_eq!(outcome.trigger, Some(TriggerType::Manual));

        let result = engine.maybe_replan().await.unwrap().unwrap();
        assert_eq!(result.trigger, TriggerType::Manual);
        assert_eq!(result.strategy, StrategyType::Incremental);
        assert!(engine.maybe_replan().await.unwrap().is_none());
    }
}
