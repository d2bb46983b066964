//! Tier-1 recovery: per-feature failure handling.
//!
//! After each attempt at a feature the driver hands the raw output and exit
//! status to [`RecoveryManager::handle_failure`]. The manager classifies the
//! output, counts the failure against the feature and asks the configured
//! [`RecoveryStrategy`] what to do next.
//!
//! # Architecture
//!
//! ```text
//! output, exit code ──classify──> Failure ──record──> FailureTracker
//!                                    │                     │ count
//!                                    ▼                     ▼
//!                              RecoveryStrategy ──apply──> RecoveryResult
//! ```
//!
//! # Modules
//!
//! - [`classifier`] - Maps raw output to a [`FailureKind`]
//! - [`tracker`] - Consecutive-failure counters per feature
//! - [`strategy`] - Retry, skip and rollback strategies

pub mod classifier;
pub mod strategy;
pub mod tracker;

pub use classifier::FailureClassifier;
pub use strategy::{
    retry_prompt, RecoveryStrategy, RecoveryStrategyKind, RetryStrategy, RollbackStrategy,
    SkipStrategy,
};
pub use tracker::{FailureTracker, FeatureHealth};

use crate::config::RunConfig;
use crate::error::Result;
use crate::plan::FeatureId;
use crate::testing::GitOperations;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

// ============================================================================
// Failure
// ============================================================================

/// Kind of a detected problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A test run reported failures
    Test,
    /// Type checking or the build failed
    Typecheck,
    /// The attempt ran out of time
    Timeout,
    /// The agent exited non-zero without a recognizable marker
    AgentError,
}

impl FailureKind {
    /// Wire name of the kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Test => "test",
            Self::Typecheck => "typecheck",
            Self::Timeout => "timeout",
            Self::AgentError => "agent_error",
        }
    }

    /// Human-readable description.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Test => "Test failure",
            Self::Typecheck => "Typecheck failure",
            Self::Timeout => "Timeout",
            Self::AgentError => "Agent error",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of one detected problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// What went wrong.
    pub kind: FailureKind,
    /// Most relevant line of the output.
    pub message: String,
    /// Feature being worked on.
    pub feature_id: FeatureId,
    /// Iteration number within the run.
    pub iteration: u32,
    /// When the failure was classified.
    pub timestamp: DateTime<Utc>,
    /// Leading slice of the raw output, kept for retry prompts.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output_excerpt: String,
}

impl Failure {
    /// Create a failure record stamped with the current time.
    pub fn new(
        kind: FailureKind,
        message: impl Into<String>,
        feature_id: FeatureId,
        iteration: u32,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            feature_id,
            iteration,
            timestamp: Utc::now(),
            output_excerpt: String::new(),
        }
    }

    /// Attach a raw output excerpt.
    #[must_use]
    pub fn with_output_excerpt(mut self, excerpt: impl Into<String>) -> Self {
        self.output_excerpt = excerpt.into();
        self
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] feature {} iteration {}: {}",
            self.kind, self.feature_id, self.iteration, self.message
        )
    }
}

// ============================================================================
// Recovery Result
// ============================================================================

/// Directive produced by one strategy application.
///
/// Consumed immediately by the driver; never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryResult {
    /// The strategy ran to completion.
    pub success: bool,
    /// Attempt the feature again.
    pub should_retry: bool,
    /// Give up on the feature and move on.
    pub should_skip: bool,
    /// Prompt to use for the retry, if any.
    pub modified_prompt: Option<String>,
    /// Human-readable outcome.
    pub message: String,
}

impl RecoveryResult {
    /// Result for an attempt that did not fail.
    #[must_use]
    pub fn ok() -> Self {
        Self {
            success: true,
            message: "No failure detected".to_string(),
            ..Self::default()
        }
    }

    /// Directive to retry with a specialized prompt.
    pub fn retry(prompt: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: true,
            should_retry: true,
            modified_prompt: Some(prompt.into()),
            message: message.into(),
            ..Self::default()
        }
    }

    /// Directive to skip the feature.
    pub fn skip(message: impl Into<String>) -> Self {
        Self {
            success: true,
            should_skip: true,
            message: message.into(),
            ..Self::default()
        }
    }
}

// ============================================================================
// Recovery Manager
// ============================================================================

/// Composes classification, failure tracking and the configured strategy.
pub struct RecoveryManager {
    classifier: FailureClassifier,
    tracker: FailureTracker,
    strategy: Box<dyn RecoveryStrategy>,
    max_retries: u32,
}

impl fmt::Debug for RecoveryManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryManager")
            .field("strategy", &self.strategy.name())
            .field("max_retries", &self.max_retries)
            .field("tracker", &self.tracker)
            .finish_non_exhaustive()
    }
}

impl RecoveryManager {
    /// Create a manager with an explicit strategy.
    #[must_use]
    pub fn new(strategy: Box<dyn RecoveryStrategy>, max_retries: u32) -> Self {
        Self {
            classifier: FailureClassifier::new(),
            tracker: FailureTracker::new(),
            strategy,
            max_retries,
        }
    }

    /// Create a manager using the retry strategy.
    #[must_use]
    pub fn with_retry(max_retries: u32) -> Self {
        Self::new(Box::new(RetryStrategy::new(max_retries)), max_retries)
    }

    /// Build the manager the run configuration asks for.
    ///
    /// The rollback strategy needs a git collaborator; without one it falls
    /// back to retrying.
    #[must_use]
    pub fn from_config(config: &RunConfig, git: Option<Box<dyn GitOperations>>) -> Self {
        let max = config.max_retries;
        let strategy: Box<dyn RecoveryStrategy> = match (config.recovery_strategy, git) {
            (RecoveryStrategyKind::Retry, _) => Box::new(RetryStrategy::new(max)),
            (RecoveryStrategyKind::Skip, _) => Box::new(SkipStrategy),
            (RecoveryStrategyKind::Rollback, Some(git)) => {
                Box::new(RollbackStrategy::new(git, max))
            }
            (RecoveryStrategyKind::Rollback, None) => {
                warn!("Rollback recovery requested without git access, retrying instead");
                Box::new(RetryStrategy::new(max))
            }
        };
        let mut manager = Self::new(strategy, max);
        manager.classifier =
            FailureClassifier::new().with_max_excerpt_chars(config.max_output_chars);
        manager
    }

    /// Name of the active strategy.
    #[must_use]
    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Configured retry budget.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Classify one attempt's output and decide what to do about it.
    ///
    /// Returns `(None, RecoveryResult::ok())` when nothing failed; the
    /// feature's counter is reset in that case.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::RatchetError::Rollback`] if the rollback
    /// strategy cannot reset the working tree. The failure has still been
    /// recorded when that happens.
    pub fn handle_failure(
        &mut self,
        output: &str,
        exit_code: i32,
        feature_id: FeatureId,
        iteration: u32,
    ) -> Result<(Option<Failure>, RecoveryResult)> {
        let Some(failure) = self
            .classifier
            .classify(output, exit_code, feature_id, iteration)
        else {
            self.tracker.reset(feature_id);
            return Ok((None, RecoveryResult::ok()));
        };

        let count = self.tracker.record(failure.clone());
        info!(
            "Feature {} failed ({}), consecutive failures: {}",
            feature_id, failure.kind, count
        );
        debug!("Failure message: {}", failure.message);

        let result = self.strategy.apply(&failure, count)?;
        if result.should_skip {
            warn!("Feature {}: {}", feature_id, result.message);
        }
        Ok((Some(failure), result))
    }

    /// Record that a feature passed.
    pub fn record_success(&mut self, feature_id: FeatureId) {
        self.tracker.reset(feature_id);
    }

    /// Record that the driver skipped a feature.
    pub fn record_skip(&mut self, feature_id: FeatureId) {
        self.tracker.reset(feature_id);
    }

    /// Reset a feature after a replan targeted it.
    pub fn reset_feature(&mut self, feature_id: FeatureId) {
        self.tracker.reset(feature_id);
    }

    /// Current consecutive-failure count for a feature.
    #[must_use]
    pub fn failure_count(&self, feature_id: FeatureId) -> u32 {
        self.tracker.count(feature_id)
    }

    /// Failures recorded since the feature's last reset, oldest first.
    #[must_use]
    pub fn failures_for(&self, feature_id: FeatureId) -> &[Failure] {
        self.tracker.failures(feature_id)
    }

    /// Escalation state of a feature.
    #[must_use]
    pub fn health(&self, feature_id: FeatureId) -> FeatureHealth {
        self.tracker.health(feature_id, self.max_retries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RatchetError;
    use crate::testing::MockGitOperations;

    const TEST_FAILURE: &str = "running 3 tests\ntest auth::login ... FAILED\ntest result: FAILED. 2 passed; 1 failed";

    // ------------------------------------------------------------------------
    // FailureKind / Failure
    // ------------------------------------------------------------------------

    #[test]
    fn test_failure_kind_wire_names() {
        assert_eq!(FailureKind::Test.as_str(), "test");
        assert_eq!(FailureKind::AgentError.to_string(), "agent_error");
        let json = serde_json::to_string(&FailureKind::Typecheck).unwrap();
        assert_eq!(json, "\"typecheck\"");
    }

    #[test]
    fn test_failure_display() {
        let failure = Failure::new(FailureKind::Timeout, "timed out", 4, 2);
        assert_eq!(
            failure.to_string(),
            "[timeout] feature 4 iteration 2: timed out"
        );
    }

    // ------------------------------------------------------------------------
    // handle_failure
    // ------------------------------------------------------------------------

    #[test]
    fn test_handle_failure_clean_output() {
        let mut manager = RecoveryManager::with_retry(3);
        let (failure, result) = manager.handle_failure("all good", 0, 1, 1).unwrap();
        assert!(failure.is_none());
        assert!(result.success);
        assert!(!result.should_retry);
        assert!(!result.should_skip);
    }

    #[test]
    fn test_handle_failure_retries_then_skips() {
        let mut manager = RecoveryManager::with_retry(2);

        let (failure, first) = manager.handle_failure(TEST_FAILURE, 1, 7, 1).unwrap();
        assert_eq!(failure.unwrap().kind, FailureKind::Test);
        assert!(first.should_retry);
        assert!(first
            .modified_prompt
            .as_deref()
            .unwrap()
            .contains("fix failing test"));

        let (_, second) = manager.handle_failure(TEST_FAILURE, 1, 7, 2).unwrap();
        assert!(!second.should_retry);
        assert!(second.should_skip);
        assert_eq!(manager.failure_count(7), 2);
        assert_eq!(manager.health(7), FeatureHealth::Escalated);
    }

    #[test]
    fn test_handle_failure_success_resets_counter() {
        let mut manager = RecoveryManager::with_retry(3);
        manager.handle_failure(TEST_FAILURE, 1, 7, 1).unwrap();
        assert_eq!(manager.failure_count(7), 1);

        manager.handle_failure("ok", 0, 7, 2).unwrap();
        assert_eq!(manager.failure_count(7), 0);
        assert!(manager.failures_for(7).is_empty());
    }

    #[test]
    fn test_features_are_counted_independently() {
        let mut manager = RecoveryManager::with_retry(3);
        manager.handle_failure(TEST_FAILURE, 1, 1, 1).unwrap();
        manager.handle_failure(TEST_FAILURE, 1, 1, 2).unwrap();
        manager.handle_failure(TEST_FAILURE, 1, 2, 3).unwrap();
        assert_eq!(manager.failure_count(1), 2);
        assert_eq!(manager.failure_count(2), 1);

        manager.record_skip(1);
        assert_eq!(manager.failure_count(1), 0);
        assert_eq!(manager.failure_count(2), 1);
    }

    #[test]
    fn test_skip_strategy_reports_count() {
        let mut manager = RecoveryManager::new(Box::new(SkipStrategy), 3);
        let (_, result) = manager.handle_failure(TEST_FAILURE, 1, 3, 1).unwrap();
        assert!(result.should_skip);
        assert!(result.message.contains('1'));
    }

    #[test]
    fn test_rollback_failure_is_error() {
        let git = MockGitOperations::new().with_reset_error("not a git repository");
        let mut manager = RecoveryManager::new(Box::new(RollbackStrategy::new(Box::new(git), 3)), 3);

        let err = manager.handle_failure(TEST_FAILURE, 1, 5, 1).unwrap_err();
        assert!(matches!(err, RatchetError::Rollback { .. }));
        assert_eq!(manager.failure_count(5), 1);
    }

    // ------------------------------------------------------------------------
    // from_config
    // ------------------------------------------------------------------------

    #[test]
    fn test_from_config_selects_strategy() {
        let mut config = RunConfig::default();
        config.recovery_strategy = RecoveryStrategyKind::Skip;
        assert_eq!(RecoveryManager::from_config(&config, None).strategy_name(), "skip");

        config.recovery_strategy = RecoveryStrategyKind::Rollback;
        let with_git = RecoveryManager::from_config(&config, Some(Box::new(MockGitOperations::new())));
        assert_eq!(with_git.strategy_name(), "rollback");

        let without_git = RecoveryManager::from_config(&config, None);
        assert_eq!(without_git.strategy_name(), "retry");
    }
}
