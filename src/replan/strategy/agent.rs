//! Agent-based replanning.
//!
//! Summarizes the run state into a prompt, asks an [`AgentProcess`] for a
//! complete new plan and parses the JSON array out of its answer. An answer
//! that does not hold a usable plan fails the attempt without touching the
//! plan.

use super::ReplanStrategy;
use crate::error::{RatchetError, Result};
use crate::plan::{compute_diff, parse_plans, Plan};
use crate::replan::{ReplanResult, ReplanState, StrategyType, TriggerType};
use crate::testing::AgentProcess;
use async_trait::async_trait;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Replans by asking an agent.
pub struct AgentBasedStrategy {
    agent: Arc<dyn AgentProcess>,
}

impl fmt::Debug for AgentBasedStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentBasedStrategy").finish_non_exhaustive()
    }
}

impl AgentBasedStrategy {
    #[must_use]
    pub fn new(agent: Arc<dyn AgentProcess>) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl ReplanStrategy for AgentBasedStrategy {
    fn strategy_type(&self) -> StrategyType {
        StrategyType::AgentBased
    }

    async fn execute(&self, state: &ReplanState, trigger: TriggerType) -> Result<ReplanResult> {
        if state.plans.is_empty() {
            return Ok(ReplanResult::failed(
                trigger,
                StrategyType::AgentBased,
                "No plans to replan",
            ));
        }

        let prompt = build_prompt(state, trigger)?;
        debug!("Sending {} byte replan prompt to agent", prompt.len());

        let response = self
            .agent
            .run_agent(&prompt)
            .await
            .map_err(|e| RatchetError::agent(e.to_string()))?;
        let plans = parse_plan_response(&response)?;

        let diff = compute_diff(&state.plans, &plans);
        let message = format!(
            "Agent proposed {} features ({})",
            plans.len(),
            diff.summary()
        );
        info!("{}", message);

        let mut result = ReplanResult::succeeded(trigger, StrategyType::AgentBased, message, plans);
        result.diff = Some(diff);
        Ok(result)
    }
}

// ============================================================================
// Prompt
// ============================================================================

/// Build the replan prompt for a trigger.
///
/// # Errors
///
/// Returns [`RatchetError::Json`] if the current plans cannot be serialized.
pub fn build_prompt(state: &ReplanState, trigger: TriggerType) -> Result<String> {
    let mut prompt = String::new();

    prompt.push_str("## Replan Request\n\n");
    prompt.push_str(&format!("**Trigger**: {}\n", trigger));
    prompt.push_str(&format!("**Iterations so far**: {}\n", state.total_iterations));

    if let Some(plan) = state.current_plan() {
        prompt.push_str(&format!(
            "**Current feature**: {} - {}\n",
            plan.id, plan.description
        ));
    }
    if state.consecutive_failures > 0 {
        let kinds: Vec<&str> = state.failure_types.iter().map(|k| k.as_str()).collect();
        prompt.push_str(&format!(
            "**Consecutive failures**: {} ({})\n",
            state.consecutive_failures,
            kinds.join(", ")
        ));
    }
    if !state.blocked_features.is_empty() {
        let ids: Vec<String> = state.blocked_features.iter().map(ToString::to_string).collect();
        prompt.push_str(&format!("**Blocked features**: {}\n", ids.join(", ")));
    }

    prompt.push_str("\n### Instructions\n\n");
    match trigger {
        TriggerType::TestFailure => {
            prompt.push_str("The current feature keeps failing its tests.\n");
            prompt.push_str("1. Split it into smaller features if it is too large\n");
            prompt.push_str("2. Add any missing prerequisite features before it\n");
            prompt.push_str("3. Keep completed (tested) features unchanged\n");
        }
        TriggerType::RequirementChange => {
            prompt.push_str("The plan file was edited outside the run.\n");
            prompt.push_str("1. Reconcile the plan with the new requirements\n");
            prompt.push_str("2. Remove features that no longer apply\n");
            prompt.push_str("3. Keep completed (tested) features unchanged\n");
        }
        TriggerType::BlockedFeature => {
            prompt.push_str("Some features are blocked.\n");
            prompt.push_str("1. Reorder the plan so unblocked work comes first\n");
            prompt.push_str("2. Add features that would unblock the blocked ones\n");
            prompt.push_str("3. Mark features that cannot proceed as deferred\n");
        }
        TriggerType::Manual => {
            prompt.push_str("Review the plan and improve its order and granularity.\n");
        }
    }

    prompt.push_str("\n### Current Plan\n\n```json\n");
    prompt.push_str(&serde_json::to_string_pretty(&state.plans)?);
    prompt.push_str("\n```\n\n");
    prompt.push_str(
        "Respond with the complete new plan as a single JSON array of features \
         using the same fields. Keep existing ids for existing features.\n",
    );

    Ok(prompt)
}

// ============================================================================
// Response Parsing
// ============================================================================

/// Extract and validate the plan list from an agent response.
///
/// Tries the text between the first `[` and the last `]`, then the first
/// fenced code block.
///
/// # Errors
///
/// Returns [`RatchetError::AgentResponse`] if no JSON array of features can
/// be found, the list is empty, or ids repeat.
pub fn parse_plan_response(response: &str) -> Result<Vec<Plan>> {
    let plans = bracketed(response)
        .and_then(|json| parse_plans(json).ok())
        .or_else(|| fenced(response).and_then(|json| parse_plans(json).ok()))
        .ok_or_else(|| RatchetError::agent_response("no JSON plan array found in response"))?;

    if plans.is_empty() {
        return Err(RatchetError::agent_response("agent returned an empty plan"));
    }

    let mut seen = HashSet::new();
    if let Some(dup) = plans.iter().find(|p| !seen.insert(p.id)) {
        return Err(RatchetError::agent_response(format!(
            "duplicate feature id {} in agent plan",
            dup.id
        )));
    }

    Ok(plans)
}

fn bracketed(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    (end > start).then(|| &text[start..=end])
}

fn fenced(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after = &text[open + 3..];
    // Skip the info string, e.g. "json".
    let body_start = after.find('\n')? + 1;
    let body = &after[body_start..];
    let close = body.find("```")?;
    Some(body[..close].trim())
}
