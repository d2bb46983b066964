//! Custom error types for ratchet.
//!
//! Feature-local failures (a test run that failed, an agent that crashed)
//! are never errors here: they travel as [`crate::recovery::Failure`]
//! records and [`crate::recovery::RecoveryResult`] directives. This module
//! covers infrastructure problems only: plan file I/O, backups, restores,
//! and agent responses that cannot be used.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for ratchet operations
#[derive(Error, Debug)]
pub enum RatchetError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Failed to load configuration
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        path: Option<PathBuf>,
    },

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfig { field: String, reason: String },

    // =========================================================================
    // Plan File Errors
    // =========================================================================
    /// Plan file could not be read
    #[error("Failed to read plan file {path}: {message}")]
    PlanRead { path: PathBuf, message: String },

    /// Plan file could not be written
    #[error("Failed to write plan file {path}: {message}")]
    PlanWrite { path: PathBuf, message: String },

    /// Plan file content is not a valid work-item list
    #[error("Invalid plan file {path}: {message}")]
    PlanParse { path: PathBuf, message: String },

    // =========================================================================
    // Versioning Errors
    // =========================================================================
    /// Backup creation or lookup failed
    #[error("Backup error: {message}")]
    Backup { message: String },

    /// Requested plan version does not exist
    #[error("Invalid plan version {requested} (available: 1..={available})")]
    InvalidVersion { requested: usize, available: usize },

    // =========================================================================
    // Replanning Errors
    // =========================================================================
    /// Agent response did not contain a usable plan
    #[error("Agent response could not be parsed: {message}")]
    AgentResponse { message: String },

    /// Agent process could not be run
    #[error("Agent invocation failed: {message}")]
    Agent { message: String },

    /// Replan budget used up for this run
    #[error("Replan budget exhausted ({max} replans)")]
    ReplanBudget { max: u32 },

    // =========================================================================
    // Recovery Errors
    // =========================================================================
    /// Version-control reset failed during a rollback recovery
    #[error("Rollback failed: {message}")]
    Rollback { message: String },

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// IO error wrapper
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON error wrapper
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RatchetError {
    // =========================================================================
    // Constructor helpers
    // =========================================================================

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            path: None,
        }
    }

    /// Create a configuration error with path
    pub fn config_with_path(message: impl Into<String>, path: PathBuf) -> Self {
        Self::Config {
            message: message.into(),
            path: Some(path),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a backup error
    pub fn backup(message: impl Into<String>) -> Self {
        Self::Backup {
            message: message.into(),
        }
    }

    /// Create an agent response error
    pub fn agent_response(message: impl Into<String>) -> Self {
        Self::AgentResponse {
            message: message.into(),
        }
    }

    /// Create an agent invocation error
    pub fn agent(message: impl Into<String>) -> Self {
        Self::Agent {
            message: message.into(),
        }
    }

    /// Create a rollback error
    pub fn rollback(message: impl Into<String>) -> Self {
        Self::Rollback {
            message: message.into(),
        }
    }

    // =========================================================================
    // Classification helpers
    // =========================================================================

    /// Check if this error only aborts the current attempt.
    ///
    /// Recoverable errors leave the on-disk plan untouched and the run can
    /// continue with the next iteration.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Backup { .. }
                | Self::InvalidVersion { .. }
                | Self::AgentResponse { .. }
                | Self::Agent { .. }
                | Self::PlanWrite { .. }
                | Self::ReplanBudget { .. }
                | Self::Rollback { .. }
        )
    }

    /// Get error code for exit status
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidVersion { .. } => 2,
            Self::PlanRead { .. } | Self::PlanParse { .. } => 3,
            Self::Backup { .. } | Self::PlanWrite { .. } => 4,
            Self::AgentResponse { .. } | Self::Agent { .. } => 5,
            Self::Config { .. } | Self::InvalidConfig { .. } => 7,
            _ => 1,
        }
    }
}

/// Type alias for ratchet results
pub type Result<T> = std::result::Result<T, RatchetError>;
