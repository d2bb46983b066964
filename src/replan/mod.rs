//! Tier-2 replanning: restructuring the remaining work queue.
//!
//! When failures persist or the plan changes underneath the run, a
//! [`trigger`] fires over the shared [`ReplanState`]. The
//! [`manager::ReplanManager`] then backs up the plan file, runs a
//! [`strategy`] and writes the result.
//!
//! # Architecture
//!
//! ```text
//! ReplanState ──check──> ReplanTrigger ──fires──> ReplanManager
//!                                                   │  backup (PlanVersioner)
//!                                                   │  execute (ReplanStrategy)
//!                                                   ▼  write + reset
//!                                              ReplanResult
//! ```
//!
//! # Modules
//!
//! - [`trigger`] - Predicates that decide when to replan
//! - [`strategy`] - Incremental and agent-based plan rewriting
//! - [`manager`] - Orchestration, versioning and state reset

pub mod manager;
pub mod strategy;
pub mod trigger;

pub use manager::ReplanManager;
pub use strategy::{AgentBasedStrategy, IncrementalStrategy, ReplanStrategy};
pub use trigger::{
    BlockedFeatureTrigger, ManualTrigger, ReplanTrigger, RequirementChangeTrigger,
    TestFailureTrigger,
};

use crate::plan::{FeatureId, Plan, PlanDiff};
use crate::recovery::FailureKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::warn;

// ============================================================================
// Trigger Type
// ============================================================================

/// Why a replan was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// A feature kept failing
    TestFailure,
    /// The plan file changed outside the engine
    RequirementChange,
    /// Features were blocked during execution
    BlockedFeature,
    /// A person asked for it
    Manual,
}

impl TriggerType {
    /// Wire name, also used as the backup trigger label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TestFailure => "test_failure",
            Self::RequirementChange => "requirement_change",
            Self::BlockedFeature => "blocked_feature",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "test_failure" => Ok(Self::TestFailure),
            "requirement_change" => Ok(Self::RequirementChange),
            "blocked_feature" => Ok(Self::BlockedFeature),
            "manual" => Ok(Self::Manual),
            other => Err(format!("unknown trigger: {other}")),
        }
    }
}

// ============================================================================
// Strategy Type
// ============================================================================

/// Which replan strategy to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum StrategyType {
    /// Rule-based adjustment of the existing plan
    #[default]
    Incremental,
    /// Ask an agent for a new plan
    AgentBased,
    /// Report triggers but never replan automatically
    None,
}

impl StrategyType {
    /// Configuration name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incremental => "incremental",
            Self::AgentBased => "agent",
            Self::None => "none",
        }
    }

    /// Parse a configured name, defaulting unknown names to incremental.
    #[must_use]
    pub fn parse_lenient(s: &str) -> Self {
        s.parse().unwrap_or_else(|e| {
            warn!("{}, using incremental", e);
            Self::Incremental
        })
    }
}

impl fmt::Display for StrategyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "incremental" => Ok(Self::Incremental),
            "agent" | "agent_based" | "agentbased" => Ok(Self::AgentBased),
            "none" | "off" => Ok(Self::None),
            other => Err(format!("unknown replan strategy: {other}")),
        }
    }
}

impl Serialize for StrategyType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for StrategyType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::parse_lenient(&s))
    }
}

// ============================================================================
// Replan State
// ============================================================================

/// Run state the triggers and strategies read.
///
/// Owned by the [`ReplanManager`] and updated once per iteration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplanState {
    /// Feature worked on in the latest iteration.
    pub feature_id: Option<FeatureId>,
    /// Consecutive failures of that feature.
    pub consecutive_failures: u32,
    /// Kinds of those failures, oldest first.
    pub failure_types: Vec<FailureKind>,
    /// Plan file hash at the latest update.
    pub plan_hash: String,
    /// Plan file hash at the update before that.
    pub last_plan_hash: String,
    /// Features blocked during execution.
    pub blocked_features: Vec<FeatureId>,
    /// Iterations seen in the run.
    pub total_iterations: u32,
    /// Current plan list.
    pub plans: Vec<Plan>,
}

impl ReplanState {
    /// The plan for the current feature, if known.
    #[must_use]
    pub fn current_plan(&self) -> Option<&Plan> {
        let id = self.feature_id?;
        self.plans.iter().find(|p| p.id == id)
    }
}

// ============================================================================
// Replan Result
// ============================================================================

/// Outcome of one replan attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplanResult {
    pub success: bool,
    pub message: String,
    pub trigger: TriggerType,
    pub strategy: StrategyType,
    /// Backup of the plan taken before the replan.
    pub old_plan_path: Option<PathBuf>,
    /// Plan list produced by the strategy (empty on failure).
    pub new_plans: Vec<Plan>,
    /// Changes against the plan the strategy started from.
    pub diff: Option<PlanDiff>,
    pub timestamp: DateTime<Utc>,
}

impl ReplanResult {
    /// A successful result; the diff is filled in by the caller.
    pub fn succeeded(
        trigger: TriggerType,
        strategy: StrategyType,
        message: impl Into<String>,
        new_plans: Vec<Plan>,
    ) -> Self {
        Self {
            success: true,
            message: message.into(),
            trigger,
            strategy,
            old_plan_path: None,
            new_plans,
            diff: None,
            timestamp: Utc::now(),
        }
    }

    /// A result that changes nothing.
    pub fn failed(trigger: TriggerType, strategy: StrategyType, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            trigger,
            strategy,
            old_plan_path: None,
            new_plans: Vec::new(),
            diff: None,
            timestamp: Utc::now(),
        }
    }

    /// Whether the result carries changes worth writing.
    #[must_use]
    pub fn changes_plan(&self) -> bool {
        self.success
            && !self.new_plans.is_empty()
            && self.diff.as_ref().is_some_and(|d| !d.is_empty())
    }

    /// Human-readable summary.
    #[must_use]
    pub fn summary(&self) -> String {
        let status = if self.success { "succeeded" } else { "failed" };
        let mut out = format!(
            "Replan {} ({} strategy, trigger {}): {}",
            status, self.strategy, self.trigger, self.message
        );
        if let Some(ref diff) = self.diff {
            out.push_str(&format!(". Changes: {}", diff.summary()));
        }
        if let Some(ref path) = self.old_plan_path {
            out.push_str(&format!(". Backup: {}", path.display()));
        }
        out
    }
}
