//! Run configuration for the iteration-control engine.
//!
//! Loaded from `.ratchet/settings.json` in the project directory. Every key
//! is optional:
//!
//! ```json
//! {
//!   "maxRetries": 3,
//!   "recoveryStrategy": "retry",
//!   "autoReplan": true,
//!   "replanThreshold": 3,
//!   "replanStrategy": "incremental",
//!   "scopeLimit": 10,
//!   "deadline": "2h"
//! }
//! ```

use crate::error::{RatchetError, Result};
use crate::recovery::RecoveryStrategyKind;
use crate::replan::StrategyType;
use crate::scope::Constraints;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Default agent timeout for agent-based replanning.
pub const DEFAULT_AGENT_TIMEOUT: Duration = Duration::from_secs(600);

/// Configuration for one run of the control loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunConfig {
    /// Retries per feature before escalating to a skip.
    pub max_retries: u32,

    /// Tier-1 strategy.
    pub recovery_strategy: RecoveryStrategyKind,

    /// Act on fired replan triggers without asking.
    pub auto_replan: bool,

    /// Consecutive failures that fire the test-failure trigger.
    pub replan_threshold: u32,

    /// Tier-2 strategy.
    pub replan_strategy: StrategyType,

    /// Iterations allowed per feature (0 = unlimited).
    pub scope_limit: u32,

    /// Wall-clock budget for the whole run, e.g. `"90m"`.
    #[serde(with = "duration_serde", skip_serializing_if = "Option::is_none")]
    pub deadline: Option<Duration>,

    /// Defer features automatically when they run out of budget.
    pub auto_defer: bool,

    /// Minimum quality score a feature must reach, in `[0, 1]`.
    pub quality_threshold: f64,

    /// Blocked features that fire the blocked-feature trigger.
    pub blocked_threshold: u32,

    /// Replans allowed per run (unset = unlimited).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_replans: Option<u32>,

    /// How long agent-based replanning waits for the agent.
    #[serde(with = "duration_serde::required")]
    pub agent_timeout: Duration,

    /// Raw output kept on each failure for retry prompts.
    pub max_output_chars: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            recovery_strategy: RecoveryStrategyKind::Retry,
            auto_replan: false,
            replan_threshold: 3,
            replan_strategy: StrategyType::Incremental,
            scope_limit: 0,
            deadline: None,
            auto_defer: true,
            quality_threshold: 0.0,
            blocked_threshold: 1,
            max_replans: None,
            agent_timeout: DEFAULT_AGENT_TIMEOUT,
            max_output_chars: crate::recovery::classifier::DEFAULT_MAX_EXCERPT_CHARS,
        }
    }
}

impl RunConfig {
    /// Load configuration from a project directory.
    ///
    /// A missing settings file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the file cannot be read, does not
    /// parse, or fails validation.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let settings_path = Self::settings_path(project_dir);

        if !settings_path.exists() {
            debug!("No settings at {}, using defaults", settings_path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&settings_path).map_err(|e| {
            RatchetError::config_with_path(e.to_string(), settings_path.clone())
        })?;
        let config: RunConfig = serde_json::from_str(&content).map_err(|e| {
            RatchetError::config_with_path(e.to_string(), settings_path.clone())
        })?;
        config.validate()?;

        debug!("Loaded settings from {}", settings_path.display());
        Ok(config)
    }

    /// Get the settings.json path for a project.
    pub fn settings_path(project_dir: &Path) -> PathBuf {
        project_dir.join(".ratchet/settings.json")
    }

    /// Check the values for consistency.
    ///
    /// # Errors
    ///
    /// Returns [`RatchetError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 && self.recovery_strategy != RecoveryStrategyKind::Skip {
            return Err(RatchetError::invalid_config(
                "maxRetries",
                format!(
                    "must be at least 1 for the {} strategy",
                    self.recovery_strategy
                ),
            ));
        }
        if self.replan_threshold == 0 {
            return Err(RatchetError::invalid_config(
                "replanThreshold",
                "must be at least 1",
            ));
        }
        if self.blocked_threshold == 0 {
            return Err(RatchetError::invalid_config(
                "blockedThreshold",
                "must be at least 1",
            ));
        }
        if !(0.0..=1.0).contains(&self.quality_threshold) {
            return Err(RatchetError::invalid_config(
                "qualityThreshold",
                format!("must be between 0 and 1, got {}", self.quality_threshold),
            ));
        }
        if let Some(deadline) = self.deadline {
            if chrono::Duration::from_std(deadline).is_err() {
                return Err(RatchetError::invalid_config("deadline", "out of range"));
            }
        }
        Ok(())
    }

    /// Scope constraints for a run that starts at `start`.
    #[must_use]
    pub fn constraints(&self, start: DateTime<Utc>) -> Constraints {
        let deadline = self
            .deadline
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .and_then(|d| start.checked_add_signed(d));

        Constraints {
            max_iterations_per_feature: self.scope_limit,
            deadline,
            quality_threshold: self.quality_threshold,
            auto_defer: self.auto_defer,
        }
    }
}

// ============================================================================
// Duration Parsing
// ============================================================================

/// Parse a human duration such as `90m`, `2h`, `1h30m`, `45s` or `300`.
///
/// A bare number is seconds.
///
/// # Errors
///
/// Returns a message describing the malformed part.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total: u64 = 0;
    let mut digits = String::new();
    for c in s.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let unit = match c {
            'h' => 3600,
            'm' => 60,
            's' => 1,
            _ => return Err(format!("invalid duration unit '{}' in {}", c, s)),
        };
        let value: u64 = digits
            .parse()
            .map_err(|_| format!("missing number before '{}' in {}", c, s))?;
        total = value
            .checked_mul(unit)
            .and_then(|v| total.checked_add(v))
            .ok_or_else(|| format!("duration too large: {}", s))?;
        digits.clear();
    }
    if !digits.is_empty() {
        return Err(format!("missing unit after {} in {}", digits, s));
    }
    Ok(Duration::from_secs(total))
}

/// Render a duration in the form [`parse_duration`] reads.
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    let mut out = String::new();
    if h > 0 {
        out.push_str(&format!("{h}h"));
    }
    if m > 0 {
        out.push_str(&format!("{m}m"));
    }
    if s > 0 || out.is_empty() {
        out.push_str(&format!("{s}s"));
    }
    out
}

/// Serde support for durations written as human strings.
mod duration_serde {
    use super::{format_duration, parse_duration};
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_str(&format_duration(*d)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(s) => parse_duration(s).map(Some).map_err(serde::de::Error::custom),
        }
    }

    pub mod required {
        use super::{format_duration, parse_duration};
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            serializer.serialize_str(&format_duration(*duration))
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
        where
            D: Deserializer<'de>,
        {
            let s = String::deserialize(deserializer)?;
            parse_duration(&s).map_err(serde::de::Error::custom)
        }
    }
}
