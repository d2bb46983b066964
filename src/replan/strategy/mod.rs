//! Replan strategies.
//!
//! A strategy reads the [`ReplanState`] and the trigger that fired and
//! produces a new plan list. Every successful result carries a
//! [`PlanDiff`](crate::plan::PlanDiff) against the plans it started from.

mod agent;
mod incremental;

pub use agent::{build_prompt, parse_plan_response, AgentBasedStrategy};
pub use incremental::{IncrementalStrategy, REVIEW_MARKER};

use super::{ReplanResult, ReplanState, StrategyType, TriggerType};
use crate::error::Result;
use async_trait::async_trait;

/// Rewrites the plan in response to a trigger.
#[async_trait]
pub trait ReplanStrategy: Send + Sync {
    /// Which strategy this is.
    fn strategy_type(&self) -> StrategyType;

    /// Produce a replan result.
    ///
    /// A result with `success == false` means nothing should be written.
    ///
    /// # Errors
    ///
    /// Returns an error when the strategy cannot run at all, such as an
    /// agent that fails or answers with something that is not a plan.
    async fn execute(&self, state: &ReplanState, trigger: TriggerType) -> Result<ReplanResult>;
}
