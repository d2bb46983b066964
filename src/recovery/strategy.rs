//! Recovery strategies.
//!
//! A strategy turns one classified [`Failure`] plus the feature's
//! consecutive-failure count into a [`RecoveryResult`] directive.

use super::{Failure, FailureKind, RecoveryResult};
use crate::error::{RatchetError, Result};
use crate::testing::GitOperations;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

// ============================================================================
// Strategy Kind
// ============================================================================

/// Configured recovery strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryStrategyKind {
    /// Retry with a specialized prompt until the budget runs out
    #[default]
    Retry,
    /// Skip on the first failure
    Skip,
    /// Reset the working tree, then retry
    Rollback,
}

impl RecoveryStrategyKind {
    /// Configuration name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retry => "retry",
            Self::Skip => "skip",
            Self::Rollback => "rollback",
        }
    }
}

impl fmt::Display for RecoveryStrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecoveryStrategyKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "retry" => Ok(Self::Retry),
            "skip" => Ok(Self::Skip),
            "rollback" => Ok(Self::Rollback),
            other => Err(format!("unknown recovery strategy: {other}")),
        }
    }
}

// ============================================================================
// Strategy Trait
// ============================================================================

/// Decides the per-feature remedy for a failure.
pub trait RecoveryStrategy: Send + Sync {
    /// Configuration name of the strategy.
    fn name(&self) -> &'static str;

    /// Decide what to do about `failure`, the `failure_count`-th in a row.
    ///
    /// # Errors
    ///
    /// Returns an error only for infrastructure problems, never for the
    /// feature failure itself.
    fn apply(&self, failure: &Failure, failure_count: u32) -> Result<RecoveryResult>;
}

// ============================================================================
// Retry
// ============================================================================

/// Retries with a prompt tailored to the failure kind.
///
/// Escalates to a skip on its own once `failure_count` reaches
/// `max_retries`.
#[derive(Debug, Clone)]
pub struct RetryStrategy {
    max_retries: u32,
}

impl RetryStrategy {
    /// Create a retry strategy with a budget.
    #[must_use]
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// True while the budget allows another attempt.
    #[must_use]
    pub fn can_retry(&self, failure_count: u32) -> bool {
        failure_count < self.max_retries
    }
}

impl RecoveryStrategy for RetryStrategy {
    fn name(&self) -> &'static str {
        "retry"
    }

    fn apply(&self, failure: &Failure, failure_count: u32) -> Result<RecoveryResult> {
        if !self.can_retry(failure_count) {
            return Ok(RecoveryResult::skip(format!(
                "Max retries ({}) exceeded for feature {}: {}",
                self.max_retries, failure.feature_id, failure.message
            )));
        }

        let prompt = retry_prompt(failure, failure_count, self.max_retries);
        Ok(RecoveryResult::retry(
            prompt,
            format!(
                "Retrying feature {} ({}/{}) after {}",
                failure.feature_id,
                failure_count,
                self.max_retries,
                failure.kind.description().to_lowercase()
            ),
        ))
    }
}

// ============================================================================
// Skip
// ============================================================================

/// Skips the feature on any failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct SkipStrategy;

impl RecoveryStrategy for SkipStrategy {
    fn name(&self) -> &'static str {
        "skip"
    }

    fn apply(&self, failure: &Failure, failure_count: u32) -> Result<RecoveryResult> {
        Ok(RecoveryResult::skip(format!(
            "Skipping feature {} after {} failure(s): {}",
            failure.feature_id, failure_count, failure.message
        )))
    }
}

// ============================================================================
// Rollback
// ============================================================================

/// Resets the working tree to the last commit, then retries.
///
/// Falls back to a skip once the retry budget is used up, after resetting.
pub struct RollbackStrategy {
    git: Box<dyn GitOperations>,
    max_retries: u32,
}

impl fmt::Debug for RollbackStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RollbackStrategy")
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl RollbackStrategy {
    /// Create a rollback strategy over a git collaborator.
    #[must_use]
    pub fn new(git: Box<dyn GitOperations>, max_retries: u32) -> Self {
        Self { git, max_retries }
    }
}

impl RecoveryStrategy for RollbackStrategy {
    fn name(&self) -> &'static str {
        "rollback"
    }

    fn apply(&self, failure: &Failure, failure_count: u32) -> Result<RecoveryResult> {
        if let Err(e) = self.git.reset_to_last_commit() {
            warn!("Rollback for feature {} failed: {}", failure.feature_id, e);
            return Err(RatchetError::rollback(e.to_string()));
        }

        let head = self
            .git
            .get_commit_hash()
            .unwrap_or_else(|_| "HEAD".to_string());
        let short: String = head.chars().take(8).collect();
        info!("Rolled back working tree to {}", short);

        if failure_count < self.max_retries {
            let prompt = format!(
                "{}\nThe working tree was reset to commit {}. Start from a clean state \
                 and take a different approach.\n",
                retry_prompt(failure, failure_count, self.max_retries),
                short
            );
            Ok(RecoveryResult::retry(
                prompt,
                format!(
                    "Rolled back to {} and retrying feature {} ({}/{})",
                    short, failure.feature_id, failure_count, self.max_retries
                ),
            ))
        } else {
            Ok(RecoveryResult::skip(format!(
                "Rolled back to {}; max retries ({}) exceeded for feature {}",
                short, self.max_retries, failure.feature_id
            )))
        }
    }
}

// ============================================================================
// Retry Prompt
// ============================================================================

/// Build the retry prompt for a failure.
///
/// Pure text generation; the guidance depends on the failure kind.
#[must_use]
pub fn retry_prompt(failure: &Failure, attempt: u32, max_retries: u32) -> String {
    let mut prompt = String::new();

    prompt.push_str("## Retry: Fix Previous Failure\n\n");
    prompt.push_str(&format!(
        "**Feature**: {} (attempt {} of {})\n",
        failure.feature_id, attempt, max_retries
    ));
    prompt.push_str(&format!("**Type**: {}\n", failure.kind.description()));
    prompt.push_str(&format!("**Message**: {}\n\n", failure.message));

    prompt.push_str("### Guidance\n\n");
    match failure.kind {
        FailureKind::Test => {
            prompt.push_str("Do not add new behavior; fix failing test cases first:\n");
            prompt.push_str("1. Find and read the failing test\n");
            prompt.push_str("2. Understand what behavior it expects\n");
            prompt.push_str("3. Fix the implementation, not the test\n");
            prompt.push_str("4. Run the specific test to verify\n");
        }
        FailureKind::Typecheck => {
            prompt.push_str("Fix the build before anything else:\n");
            prompt.push_str("1. Read the first compiler error carefully\n");
            prompt.push_str("2. Make the minimal change that resolves it\n");
            prompt.push_str("3. Rebuild and repeat until the build is clean\n");
        }
        FailureKind::Timeout => {
            prompt.push_str("The last attempt ran out of time. Reduce scope of the change:\n");
            prompt.push_str("1. Pick the smallest piece of the feature\n");
            prompt.push_str("2. Implement and commit just that piece\n");
            prompt.push_str("3. Avoid long-running commands\n");
        }
        FailureKind::AgentError => {
            prompt.push_str("The previous attempt stopped unexpectedly.\n");
            prompt.push_str("Check the working tree state, then continue where it left off.\n");
        }
    }

    if !failure.output_excerpt.is_empty() {
        prompt.push_str("\n### Output\n\n```\n");
        prompt.push_str(&failure.output_excerpt);
        prompt.push_str("\n```\n");
    }

    prompt
}
