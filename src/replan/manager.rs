//! Replan orchestration.
//!
//! The [`ReplanManager`] owns the shared [`ReplanState`] and is the only
//! writer of the plan file. A replan always runs in this order:
//!
//! 1. back up the live plan ([`PlanVersioner::create_backup`])
//! 2. run the strategy
//! 3. write the new plan, only if the strategy succeeded with changes
//! 4. reset the failure part of the state
//!
//! A failed or no-op strategy leaves the live plan untouched.

use super::strategy::{AgentBasedStrategy, IncrementalStrategy, ReplanStrategy};
use super::trigger::{
    BlockedFeatureTrigger, ManualTrigger, ReplanTrigger, RequirementChangeTrigger,
    TestFailureTrigger,
};
use super::{ReplanResult, ReplanState, StrategyType, TriggerType};
use crate::config::RunConfig;
use crate::error::{RatchetError, Result};
use crate::plan::{content_hash, load_plans, save_plans, FeatureId, Plan, PlanVersion, PlanVersioner};
use crate::recovery::FailureKind;
use crate::testing::AgentProcess;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Coordinates triggers, strategies and plan versioning.
pub struct ReplanManager {
    plan_path: PathBuf,
    state: ReplanState,
    /// Checked in order; the first that fires wins.
    triggers: Vec<Box<dyn ReplanTrigger>>,
    manual: ManualTrigger,
    versioner: PlanVersioner,
    auto_replan: bool,
    default_strategy: StrategyType,
    agent: Option<Arc<dyn AgentProcess>>,
    history: Vec<ReplanResult>,
    max_replans: Option<u32>,
}

impl std::fmt::Debug for ReplanManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplanManager")
            .field("plan_path", &self.plan_path)
            .field("state", &self.state)
            .field("triggers", &self.triggers)
            .field("auto_replan", &self.auto_replan)
            .field("default_strategy", &self.default_strategy)
            .field("replans", &self.history.len())
            .finish_non_exhaustive()
    }
}

impl ReplanManager {
    /// Create a manager for a plan file with the default triggers.
    ///
    /// Existing backups next to the plan are picked up, and the plan's
    /// current hash is taken as the baseline for edit detection.
    ///
    /// # Errors
    ///
    /// Returns an error if existing backups cannot be read.
    pub fn new(plan_path: impl AsRef<Path>) -> Result<Self> {
        let plan_path = plan_path.as_ref().to_path_buf();
        let versioner = PlanVersioner::new(&plan_path)?;

        let mut state = ReplanState::default();
        if let Ok(bytes) = std::fs::read(&plan_path) {
            state.plan_hash = content_hash(&bytes);
        }
        if plan_path.exists() {
            match load_plans(&plan_path) {
                Ok(plans) => state.plans = plans,
                Err(e) => warn!("Plan file could not be loaded, starting empty: {}", e),
            }
        }

        Ok(Self {
            plan_path,
            state,
            triggers: default_triggers(TestFailureTrigger::default(), BlockedFeatureTrigger::default()),
            manual: ManualTrigger::new(),
            versioner,
            auto_replan: false,
            default_strategy: StrategyType::Incremental,
            agent: None,
            history: Vec::new(),
            max_replans: None,
        })
    }

    /// Create a manager configured from the run configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if existing backups cannot be read.
    pub fn from_config(plan_path: impl AsRef<Path>, config: &RunConfig) -> Result<Self> {
        let mut manager = Self::new(plan_path)?;
        manager.triggers = default_triggers(
            TestFailureTrigger::new(config.replan_threshold),
            BlockedFeatureTrigger::new(config.blocked_threshold as usize),
        );
        manager.auto_replan = config.auto_replan;
        manager.default_strategy = config.replan_strategy;
        manager.max_replans = config.max_replans;
        Ok(manager)
    }

    /// Turn automatic replanning on or off.
    #[must_use]
    pub fn with_auto_replan(mut self, enabled: bool) -> Self {
        self.auto_replan = enabled;
        self
    }

    /// Set the consecutive-failure threshold.
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        for trigger in &mut self.triggers {
            if trigger.trigger_type() == TriggerType::TestFailure {
                *trigger = Box::new(TestFailureTrigger::new(threshold));
            }
        }
        self
    }

    /// Set the strategy automatic replans use.
    #[must_use]
    pub fn with_strategy(mut self, strategy: StrategyType) -> Self {
        self.default_strategy = strategy;
        self
    }

    /// Provide the agent for agent-based replanning.
    #[must_use]
    pub fn with_agent(mut self, agent: Arc<dyn AgentProcess>) -> Self {
        self.agent = Some(agent);
        self
    }

    /// Cap the number of replans in this run.
    #[must_use]
    pub fn with_max_replans(mut self, max: u32) -> Self {
        self.max_replans = Some(max);
        self
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// The live plan file.
    #[must_use]
    pub fn plan_path(&self) -> &Path {
        &self.plan_path
    }

    /// Current shared state.
    #[must_use]
    pub fn state(&self) -> &ReplanState {
        &self.state
    }

    /// Strategy automatic replans use.
    #[must_use]
    pub fn strategy(&self) -> StrategyType {
        self.default_strategy
    }

    /// Whether fired triggers are acted on automatically.
    #[must_use]
    pub fn auto_replan(&self) -> bool {
        self.auto_replan
    }

    /// Replans executed in this run, oldest first.
    #[must_use]
    pub fn history(&self) -> &[ReplanResult] {
        &self.history
    }

    /// Known plan backups, oldest first.
    #[must_use]
    pub fn versions(&self) -> &[PlanVersion] {
        self.versioner.versions()
    }

    /// Replans left in the budget, `None` if unlimited.
    #[must_use]
    pub fn replans_remaining(&self) -> Option<u32> {
        self.max_replans
            .map(|max| max.saturating_sub(self.history.len() as u32))
    }

    // ========================================================================
    // State updates
    // ========================================================================

    /// Record the outcome of one iteration.
    ///
    /// Shifts the previous plan hash into `last_plan_hash` before hashing
    /// the plan file again, so an outside edit fires the requirement-change
    /// trigger exactly once.
    pub fn update_state(
        &mut self,
        feature_id: FeatureId,
        consecutive_failures: u32,
        failure_types: Vec<FailureKind>,
        plans: Vec<Plan>,
    ) {
        self.state.feature_id = Some(feature_id);
        self.state.consecutive_failures = consecutive_failures;
        self.state.failure_types = failure_types;
        self.state.total_iterations = self.state.total_iterations.saturating_add(1);

        self.state.last_plan_hash = std::mem::take(&mut self.state.plan_hash);
        self.state.plan_hash = match std::fs::read(&self.plan_path) {
            Ok(bytes) => content_hash(&bytes),
            Err(e) => {
                debug!("Plan file unreadable ({}), hashing in-memory plans", e);
                serde_json::to_vec_pretty(&plans)
                    .map(|bytes| content_hash(&bytes))
                    .unwrap_or_default()
            }
        };
        self.state.plans = plans;
    }

    /// Record that a feature is blocked.
    pub fn mark_blocked(&mut self, feature_id: FeatureId) {
        if !self.state.blocked_features.contains(&feature_id) {
            debug!("Feature {} marked blocked", feature_id);
            self.state.blocked_features.push(feature_id);
        }
    }

    /// Record that a feature is no longer blocked.
    pub fn unblock(&mut self, feature_id: FeatureId) {
        self.state.blocked_features.retain(|id| *id != feature_id);
    }

    /// Clear the failure part of the state.
    ///
    /// Blocked features and the iteration count are run-level facts and
    /// survive the reset.
    pub fn reset_state(&mut self) {
        self.state.consecutive_failures = 0;
        self.state.failure_types.clear();
    }

    /// Note that the engine itself rewrote the plan file.
    ///
    /// Updates both hashes so the write is not seen as an outside edit.
    pub fn acknowledge_plan_write(&mut self) {
        if let Ok(bytes) = std::fs::read(&self.plan_path) {
            let hash = content_hash(&bytes);
            self.state.last_plan_hash = hash.clone();
            self.state.plan_hash = hash;
        }
    }

    // ========================================================================
    // Triggers
    // ========================================================================

    /// First trigger that fires, in priority order.
    ///
    /// The manual trigger is not part of this scan; see
    /// [`ReplanManager::check_manual`].
    #[must_use]
    pub fn check_triggers(&self) -> Option<TriggerType> {
        let fired = self
            .triggers
            .iter()
            .find(|t| t.check(&self.state))
            .map(|t| t.trigger_type());
        if let Some(trigger) = fired {
            debug!("Replan trigger fired: {}", trigger);
        }
        fired
    }

    /// Request a replan.
    pub fn trigger_manual(&mut self) {
        info!("Manual replan requested");
        self.manual.fire();
    }

    /// Whether a manual replan is pending.
    #[must_use]
    pub fn check_manual(&self) -> bool {
        self.manual.check(&self.state)
    }

    /// Whether a replan should run now, and for which trigger.
    ///
    /// Triggers may fire without a replan being due, for example with
    /// auto-replan off; [`ReplanManager::check_triggers`] still reports them.
    #[must_use]
    pub fn should_replan(&self) -> Option<TriggerType> {
        if !self.auto_replan || self.default_strategy == StrategyType::None {
            return None;
        }
        if self.replans_remaining() == Some(0) {
            return None;
        }
        self.check_triggers()
    }

    // ========================================================================
    // Replanning
    // ========================================================================

    /// Back up the plan, run a strategy and write the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the replan budget is used up, the backup cannot
    /// be made, the strategy fails, or the new plan cannot be written. The
    /// live plan is unchanged in every error case except a failed write of
    /// the new plan, which leaves the previous content in place.
    pub async fn execute_replan(
        &mut self,
        strategy: StrategyType,
        trigger: TriggerType,
    ) -> Result<ReplanResult> {
        if let Some(max) = self.max_replans {
            if self.history.len() as u32 >= max {
                return Err(RatchetError::ReplanBudget { max });
            }
        }

        info!("Replanning ({} strategy, trigger {})", strategy, trigger);
        let backup = self.versioner.create_backup(trigger.as_str())?;

        let runner = self.strategy_for(strategy);
        let mut result = runner.execute(&self.state, trigger).await?;
        result.old_plan_path = Some(backup);

        if result.changes_plan() {
            save_plans(&self.plan_path, &result.new_plans)?;
            self.acknowledge_plan_write();
            info!("Plan rewritten: {}", result.summary());
        } else if result.success {
            debug!("Replan produced no changes, plan file untouched");
        } else {
            warn!("Replan did not succeed: {}", result.message);
        }

        if result.success {
            if !result.new_plans.is_empty() {
                self.state.plans = result.new_plans.clone();
            }
            self.reset_state();
        }
        self.manual.take();

        if trigger == TriggerType::BlockedFeature {
            let deferred: Vec<FeatureId> = self
                .state
                .plans
                .iter()
                .filter(|p| p.deferred)
                .map(|p| p.id)
                .collect();
            self.state
                .blocked_features
                .retain(|id| !deferred.contains(id));
        }

        self.history.push(result.clone());
        Ok(result)
    }

    fn strategy_for(&self, strategy: StrategyType) -> Box<dyn ReplanStrategy> {
        match (strategy, &self.agent) {
            (StrategyType::AgentBased, Some(agent)) => {
                Box::new(AgentBasedStrategy::new(Arc::clone(agent)))
            }
            (StrategyType::AgentBased, None) => {
                warn!("No agent configured for agent-based replanning, using incremental");
                Box::new(IncrementalStrategy::new())
            }
            (StrategyType::Incremental | StrategyType::None, _) => {
                Box::new(IncrementalStrategy::new())
            }
        }
    }

    /// Restore a plan backup onto the live plan file.
    ///
    /// The state's hashes follow the restored content so the restore is not
    /// mistaken for an outside edit.
    ///
    /// # Errors
    ///
    /// Returns [`RatchetError::InvalidVersion`] for an unknown version and a
    /// backup error if the restore cannot be written.
    pub fn restore_version(&mut self, version: usize) -> Result<()> {
        self.versioner.restore_version(version)?;
        self.acknowledge_plan_write();
        match load_plans(&self.plan_path) {
            Ok(plans) => self.state.plans = plans,
            Err(e) => warn!("Restored plan could not be parsed: {}", e),
        }
        Ok(())
    }
}

fn default_triggers(
    failures: TestFailureTrigger,
    blocked: BlockedFeatureTrigger,
) -> Vec<Box<dyn ReplanTrigger>> {
    vec![
        Box::new(failures),
        Box::new(RequirementChangeTrigger),
        Box::new(blocked),
    ]
}
