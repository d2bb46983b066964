//! Work-item plan model and plan file persistence.
//!
//! The plan file is a JSON array of work items ("features"). The driver and
//! other collaborators own most of its fields; this crate reads and rewrites
//! it during replanning, so unknown fields are carried through untouched.
//!
//! # Modules
//!
//! - [`diff`] - Field-level differences between two plan lists
//! - [`versioning`] - Content-addressed backup and restore of the plan file

pub mod diff;
pub mod versioning;

pub use diff::{compute_diff, PlanChange, PlanDiff};
pub use versioning::{PlanVersion, PlanVersioner};

use crate::error::{RatchetError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Identifier of one feature in the plan file.
pub type FeatureId = u32;

// ============================================================================
// Defer Reason
// ============================================================================

/// Why a feature was taken out of the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferReason {
    /// Per-feature iteration budget used up
    IterationLimit,
    /// Run-level wall-clock deadline passed
    Deadline,
    /// Judged too complex for this run
    Complexity,
    /// Deferred by a person
    Manual,
    /// Blocked while it was being worked on
    BlockedDuringExecution,
}

impl DeferReason {
    /// Wire name as stored in the plan file.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IterationLimit => "iteration_limit",
            Self::Deadline => "deadline",
            Self::Complexity => "complexity",
            Self::Manual => "manual",
            Self::BlockedDuringExecution => "blocked_during_execution",
        }
    }
}

impl fmt::Display for DeferReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeferReason {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "iteration_limit" => Ok(Self::IterationLimit),
            "deadline" => Ok(Self::Deadline),
            "complexity" => Ok(Self::Complexity),
            "manual" => Ok(Self::Manual),
            "blocked_during_execution" => Ok(Self::BlockedDuringExecution),
            other => Err(format!("unknown defer reason: {other}")),
        }
    }
}

/// Plan files written by other tools store "no reason" as an empty string.
fn deserialize_defer_reason<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<DeferReason>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

// ============================================================================
// Plan
// ============================================================================

/// One work item in the plan file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Unique feature identifier.
    pub id: FeatureId,

    /// What the feature is supposed to deliver.
    pub description: String,

    /// Free-form grouping label.
    #[serde(default)]
    pub category: String,

    /// Ordered implementation steps.
    #[serde(default)]
    pub steps: Vec<String>,

    /// Observable result that marks the feature as done.
    #[serde(default)]
    pub expected_output: String,

    /// Whether the feature has passed its tests.
    #[serde(default)]
    pub tested: bool,

    /// Whether the feature is out of the current run.
    #[serde(default)]
    pub deferred: bool,

    /// Why the feature was deferred.
    #[serde(
        default,
        deserialize_with = "deserialize_defer_reason",
        skip_serializing_if = "Option::is_none"
    )]
    pub defer_reason: Option<DeferReason>,

    /// Opaque milestone label.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub milestone: String,

    /// Fields owned by other collaborators, preserved on rewrite.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Plan {
    /// Create a new, untested work item.
    pub fn new(id: FeatureId, description: impl Into<String>) -> Self {
        Self {
            id,
            description: description.into(),
            category: String::new(),
            steps: Vec::new(),
            expected_output: String::new(),
            tested: false,
            deferred: false,
            defer_reason: None,
            milestone: String::new(),
            extra: serde_json::Map::new(),
        }
    }

    /// Set the category.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Set the implementation steps.
    #[must_use]
    pub fn with_steps(mut self, steps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.steps = steps.into_iter().map(Into::into).collect();
        self
    }

    /// Set the expected output.
    #[must_use]
    pub fn with_expected_output(mut self, output: impl Into<String>) -> Self {
        self.expected_output = output.into();
        self
    }

    /// Mark as tested.
    #[must_use]
    pub fn mark_tested(mut self) -> Self {
        self.tested = true;
        self
    }

    /// Set the milestone.
    #[must_use]
    pub fn with_milestone(mut self, milestone: impl Into<String>) -> Self {
        self.milestone = milestone.into();
        self
    }

    /// Defer this feature with a reason.
    pub fn defer(&mut self, reason: DeferReason) {
        self.deferred = true;
        self.defer_reason = Some(reason);
    }

    /// True when the feature still needs work in this run.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        !self.tested && !self.deferred
    }
}

/// First feature that is neither tested nor deferred.
#[must_use]
pub fn next_pending(plans: &[Plan]) -> Option<&Plan> {
    plans.iter().find(|p| p.is_pending())
}

// ============================================================================
// Hashing
// ============================================================================

/// Hex-encoded SHA-256 of the given bytes.
#[must_use]
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

// ============================================================================
// Plan File I/O
// ============================================================================

/// Parse a plan list from JSON text.
///
/// # Errors
///
/// Returns [`RatchetError::Json`] if the text is not a JSON array of work items.
pub fn parse_plans(content: &str) -> Result<Vec<Plan>> {
    Ok(serde_json::from_str(content)?)
}

/// Load the plan list from a file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or does not hold a plan list.
pub fn load_plans(path: &Path) -> Result<Vec<Plan>> {
    let content = std::fs::read_to_string(path).map_err(|e| RatchetError::PlanRead {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    parse_plans(&content).map_err(|e| RatchetError::PlanParse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Serialize and write the plan list to a file.
///
/// The whole list is serialized before anything touches the disk, and the
/// write goes through a temp sibling that is renamed over the live file.
///
/// # Errors
///
/// Returns [`RatchetError::PlanWrite`] if serialization or the write fails.
pub fn save_plans(path: &Path, plans: &[Plan]) -> Result<()> {
    let json = serde_json::to_string_pretty(plans).map_err(|e| RatchetError::PlanWrite {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    write_atomic(path, json.as_bytes()).map_err(|e| RatchetError::PlanWrite {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    debug!("Wrote {} features to {}", plans.len(), path.display());
    Ok(())
}

/// Write bytes to `path` via a temp file in the same directory.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let temp_path = temp_sibling(path);
    std::fs::write(&temp_path, bytes)?;
    if let Err(e) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e);
    }
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "plan".to_string());
    path.with_file_name(format!(".{name}.tmp"))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // ------------------------------------------------------------------------
    // DeferReason tests
    // ------------------------------------------------------------------------

    #[test]
    fn test_defer_reason_round_trips_wire_names() {
        for reason in [
            DeferReason::IterationLimit,
            DeferReason::Deadline,
            DeferReason::Complexity,
            DeferReason::Manual,
            DeferReason::BlockedDuringExecution,
        ] {
            assert_eq!(reason.as_str().parse::<DeferReason>().unwrap(), reason);
        }
        assert!("sometime".parse::<DeferReason>().is_err());
    }

    // ------------------------------------------------------------------------
    // Plan serialization tests
    // ------------------------------------------------------------------------

    #[test]
    fn test_plan_parses_minimal_item() {
        let plans = parse_plans(r#"[{"id": 1, "description": "Add login"}]"#).unwrap();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].id, 1);
        assert!(plans[0].steps.is_empty());
        assert!(!plans[0].tested);
        assert!(plans[0].defer_reason.is_none());
    }

    #[test]
    fn test_plan_treats_empty_defer_reason_as_none() {
        let plans =
            parse_plans(r#"[{"id": 1, "description": "x", "deferred": false, "defer_reason": ""}]"#)
                .unwrap();
        assert!(plans[0].defer_reason.is_none());
    }

    #[test]
    fn test_plan_rejects_unknown_defer_reason() {
        let result = parse_plans(r#"[{"id": 1, "description": "x", "defer_reason": "bored"}]"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_plan_preserves_unknown_fields() {
        let input = r#"[{"id": 3, "description": "x", "priority": "high", "owner": {"name": "sam"}}]"#;
        let plans = parse_plans(input).unwrap();
        assert_eq!(plans[0].extra.get("priority").unwrap(), "high");

        let written = serde_json::to_string(&plans).unwrap();
        assert!(written.contains("\"priority\":\"high\""));
        assert!(written.contains("\"owner\""));
    }

    #[test]
    fn test_plan_serializes_defer_reason_as_snake_case() {
        let mut plan = Plan::new(2, "Blocked work");
        plan.defer(DeferReason::BlockedDuringExecution);
        let json = serde_json::to_string(&plan).unwrap();
        assert!(json.contains("\"defer_reason\":\"blocked_during_execution\""));
        assert!(json.contains("\"deferred\":true"));
    }

    #[test]
    fn test_next_pending_skips_tested_and_deferred() {
        let mut deferred = Plan::new(2, "b");
        deferred.defer(DeferReason::Manual);
        let plans = vec![Plan::new(1, "a").mark_tested(), deferred, Plan::new(3, "c")];
        assert_eq!(next_pending(&plans).map(|p| p.id), Some(3));
    }

    // ------------------------------------------------------------------------
    // Hashing tests
    // ------------------------------------------------------------------------

    #[test]
    fn test_content_hash_is_stable_hex() {
        let a = content_hash(b"[]");
        let b = content_hash(b"[]");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, content_hash(b"[ ]"));
    }

    // ------------------------------------------------------------------------
    // File I/O tests
    // ------------------------------------------------------------------------

    #[test]
    fn test_save_then_load_plans() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plans.json");
        let plans = vec![
            Plan::new(1, "Parse config").with_steps(["read", "validate"]),
            Plan::new(2, "Serve requests").with_category("http"),
        ];

        save_plans(&path, &plans).unwrap();
        let loaded = load_plans(&path).unwrap();
        assert_eq!(loaded, plans);
        assert!(!dir.path().join(".plans.json.tmp").exists());
    }

    #[test]
    fn test_load_plans_missing_file_is_read_error() {
        let dir = TempDir::new().unwrap();
        let err = load_plans(&dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, RatchetError::PlanRead { .. }));
    }

    #[test]
    fn test_load_plans_invalid_json_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plans.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = load_plans(&path).unwrap_err();
        assert!(matches!(err, RatchetError::PlanParse { .. }));
    }

    #[test]
    fn test_save_plans_into_missing_directory_is_write_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing_dir").join("plans.json");
        let err = save_plans(&path, &[Plan::new(1, "x")]).unwrap_err();
        assert!(matches!(err, RatchetError::PlanWrite { .. }));
    }
}
