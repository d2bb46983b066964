//! Ratchet - iteration control for autonomous coding agents
//!
//! Keeps an agent-driven implementation run moving forward by deciding, after
//! every attempt at a feature, whether to retry, skip, defer or replan.
//!
//! # Architecture
//!
//! The crate is organized into three control tiers plus support modules:
//!
//! - [`recovery`] - Tier 1: failure classification and per-feature recovery
//! - [`scope`] - Per-feature iteration budgets, deadlines and deferral
//! - [`replan`] - Tier 2: replan triggers, strategies and the replan manager
//! - [`engine`] - Wires the tiers together for one iteration
//! - [`plan`] - The plan file model, diffing and versioned backups
//! - [`config`] - Run configuration loading and validation
//! - [`error`] - Custom error types and handling
//! - [`git`] / [`agent`] - Real collaborators over the `git` and `claude` CLIs
//! - [`testing`] - Collaborator traits and mocks
//!
//! # Example
//!
//! ```rust,ignore
//! use ratchet::config::RunConfig;
//! use ratchet::recovery::RecoveryManager;
//!
//! let config = RunConfig::load(project_dir)?;
//! let mut recovery = RecoveryManager::from_config(&config, None);
//!
//! let (failure, result) = recovery.handle_failure(&output, exit_code, 7, 1)?;
//! if result.should_retry {
//!     println!("{}", result.modified_prompt.unwrap_or_default());
//! }
//! ```

pub mod agent;
pub mod config;
pub mod engine;
pub mod error;
pub mod git;
pub mod plan;
pub mod recovery;
pub mod replan;
pub mod scope;
pub mod testing;

// Re-export commonly used types
pub use error::{RatchetError, Result};

pub use config::{parse_duration, RunConfig};
pub use engine::{Directive, IterationEngine, IterationOutcome};

pub use plan::{compute_diff, DeferReason, FeatureId, Plan, PlanDiff, PlanVersion, PlanVersioner};

pub use recovery::{
    Failure, FailureClassifier, FailureKind, RecoveryManager, RecoveryResult,
    RecoveryStrategyKind,
};

pub use scope::{Constraints, ScopeManager};

pub use replan::{ReplanManager, ReplanResult, ReplanState, StrategyType, TriggerType};

// Re-export collaborator types
pub use agent::ClaudeAgent;
pub use git::GitCli;
pub use testing::{AgentProcess, GitOperations, MockAgentProcess, MockGitOperations};
