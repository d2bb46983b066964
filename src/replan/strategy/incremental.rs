//! Rule-based incremental replanning.
//!
//! Deterministic adjustments to the existing plan; no agent involved.
//! Prerequisite detection is a keyword-overlap heuristic and can both miss
//! and over-report dependencies.

use super::ReplanStrategy;
use crate::error::Result;
use crate::plan::{compute_diff, next_pending, DeferReason, Plan};
use crate::replan::{ReplanResult, ReplanState, StrategyType, TriggerType};
use async_trait::async_trait;
use std::collections::HashSet;
use tracing::{debug, info};

/// Appended to the description of a feature that needs a human look.
pub const REVIEW_MARKER: &str = "[needs review]";

/// Step count above which a failing feature is flagged for splitting.
const SPLIT_STEP_THRESHOLD: usize = 5;

/// Shortest word treated as a keyword when looking for prerequisites.
const MIN_KEYWORD_LEN: usize = 5;

/// Deterministic plan adjustments per trigger.
#[derive(Debug, Clone, Copy, Default)]
pub struct IncrementalStrategy;

impl IncrementalStrategy {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Flag the failing feature and look for undeclared prerequisites.
    fn review_failing(&self, state: &ReplanState, plans: &mut [Plan]) -> String {
        let Some(id) = state.feature_id else {
            return "No current feature to review".to_string();
        };
        let Some(idx) = plans.iter().position(|p| p.id == id) else {
            return format!("Feature {} is not in the plan", id);
        };

        let mut message = format!(
            "Marked feature {} for review after {} consecutive failures",
            id, state.consecutive_failures
        );

        let step_count = plans[idx].steps.len();
        if step_count > SPLIT_STEP_THRESHOLD {
            message.push_str(&format!(
                "; it has {} steps, consider splitting it",
                step_count
            ));
        }

        let prerequisites = possible_prerequisites(plans, idx);
        if !prerequisites.is_empty() {
            let ids: Vec<String> = prerequisites.iter().map(ToString::to_string).collect();
            message.push_str(&format!("; possible prerequisites: {}", ids.join(", ")));
        }

        let plan = &mut plans[idx];
        if !plan.description.contains(REVIEW_MARKER) {
            plan.description = format!("{} {}", plan.description.trim_end(), REVIEW_MARKER);
        }

        message
    }

    /// Defer every blocked feature and report the new head of the queue.
    fn defer_blocked(&self, state: &ReplanState, plans: &mut [Plan]) -> String {
        let mut deferred = Vec::new();
        for id in &state.blocked_features {
            if let Some(plan) = plans.iter_mut().find(|p| p.id == *id) {
                // An existing deferral keeps its reason.
                if !plan.deferred {
                    plan.defer(DeferReason::BlockedDuringExecution);
                    deferred.push(id.to_string());
                }
            }
        }

        let mut message = if deferred.is_empty() {
            "No blocked features needed deferring".to_string()
        } else {
            format!(
                "Deferred {} blocked feature(s): {}",
                deferred.len(),
                deferred.join(", ")
            )
        };
        match next_pending(plans) {
            Some(next) => message.push_str(&format!("; next up: feature {}", next.id)),
            None => message.push_str("; no pending features remain"),
        }
        message
    }
}

/// Earlier untested features that look related to the one at `idx`.
fn possible_prerequisites(plans: &[Plan], idx: usize) -> Vec<u32> {
    let current = &plans[idx];
    let current_words = keywords(&current.description);

    plans[..idx]
        .iter()
        .filter(|p| !p.tested)
        .filter(|p| {
            let same_category = !current.category.is_empty() && p.category == current.category;
            same_category || !keywords(&p.description).is_disjoint(&current_words)
        })
        .map(|p| p.id)
        .collect()
}

fn keywords(text: &str) -> HashSet<String> {
    text.replace(REVIEW_MARKER, " ")
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= MIN_KEYWORD_LEN)
        .map(str::to_lowercase)
        .collect()
}

fn tally(plans: &[Plan]) -> String {
    let tested = plans.iter().filter(|p| p.tested).count();
    let deferred = plans.iter().filter(|p| p.deferred).count();
    let untested = plans.iter().filter(|p| !p.tested && !p.deferred).count();
    format!(
        "Plan reconciled: {} tested, {} untested, {} deferred of {} features",
        tested,
        untested,
        deferred,
        plans.len()
    )
}

#[async_trait]
impl ReplanStrategy for IncrementalStrategy {
    fn strategy_type(&self) -> StrategyType {
        StrategyType::Incremental
    }

    async fn execute(&self, state: &ReplanState, trigger: TriggerType) -> Result<ReplanResult> {
        if state.plans.is_empty() {
            return Ok(ReplanResult::failed(
                trigger,
                StrategyType::Incremental,
                "No plans to replan",
            ));
        }

        let mut plans = state.plans.clone();
        let message = match trigger {
            TriggerType::TestFailure => self.review_failing(state, &mut plans),
            TriggerType::BlockedFeature => self.defer_blocked(state, &mut plans),
            TriggerType::RequirementChange | TriggerType::Manual => tally(&plans),
        };

        let diff = compute_diff(&state.plans, &plans);
        debug!("Incremental replan diff: {}", diff.summary());
        info!("{}", message);

        let mut result =
            ReplanResult::succeeded(trigger, StrategyType::Incremental, message, plans);
        result.diff = Some(diff);
        Ok(result)
    }
}
