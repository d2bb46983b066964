//! Failure classification from raw attempt output.
//!
//! Classification is a pure function of the output text and exit status.
//! Signals are checked in a fixed precedence:
//!
//! 1. test-failure markers
//! 2. typecheck / build-error markers
//! 3. non-zero exit status (`agent_error`)
//! 4. timeout markers
//!
//! The first group that matches decides the kind. Output with none of these
//! signals is not a failure.

use super::{Failure, FailureKind};
use crate::plan::FeatureId;
use regex::Regex;
use tracing::warn;

/// Longest message kept from a matching line.
pub const MAX_MESSAGE_CHARS: usize = 200;

/// Default size of the raw output excerpt stored on a failure.
pub const DEFAULT_MAX_EXCERPT_CHARS: usize = 2000;

const TEST_PATTERNS: &[&str] = &[
    r"(?m)^--- FAIL",
    r"(?m)^FAIL\b",
    r"test .+ \.\.\. FAILED",
    r"test result: FAILED",
    r"panicked at",
    r"AssertionError",
    r"(?m)^FAILED ",
    r"\b[1-9]\d* failed\b",
    r"assertion .+ failed",
];

const TYPECHECK_PATTERNS: &[&str] = &[
    r"error\[E\d+\]",
    r"error TS\d+",
    r"\.go:\d+:\d+: ",
    r"mismatched types",
    r"cannot find type",
    r"Found [1-9]\d* errors?",
    r"(?i)build failed",
    r"(?i)compilation failed",
    r"could not compile",
    r"SyntaxError",
];

const TIMEOUT_PATTERNS: &[&str] = &[
    r"(?i)timed out",
    r"(?i)deadline exceeded",
    r"(?i)\btimeout\b",
];

/// Maps attempt output to a [`Failure`].
#[derive(Debug, Clone)]
pub struct FailureClassifier {
    test: Vec<Regex>,
    typecheck: Vec<Regex>,
    timeout: Vec<Regex>,
    max_excerpt_chars: usize,
}

impl FailureClassifier {
    /// Create a classifier with the default marker sets.
    #[must_use]
    pub fn new() -> Self {
        Self {
            test: compile(TEST_PATTERNS),
            typecheck: compile(TYPECHECK_PATTERNS),
            timeout: compile(TIMEOUT_PATTERNS),
            max_excerpt_chars: DEFAULT_MAX_EXCERPT_CHARS,
        }
    }

    /// Change how much raw output is kept on each failure.
    #[must_use]
    pub fn with_max_excerpt_chars(mut self, max: usize) -> Self {
        self.max_excerpt_chars = max;
        self
    }

    /// Kind of failure the output shows, if any.
    #[must_use]
    pub fn kind_of(&self, output: &str, exit_code: i32) -> Option<FailureKind> {
        self.detect(output, exit_code).map(|(kind, _)| kind)
    }

    /// Classify one attempt.
    ///
    /// Returns `None` when the output carries no failure signal.
    #[must_use]
    pub fn classify(
        &self,
        output: &str,
        exit_code: i32,
        feature_id: FeatureId,
        iteration: u32,
    ) -> Option<Failure> {
        let (kind, message) = self.detect(output, exit_code)?;
        Some(
            Failure::new(kind, message, feature_id, iteration)
                .with_output_excerpt(truncate(output, self.max_excerpt_chars)),
        )
    }

    fn detect(&self, output: &str, exit_code: i32) -> Option<(FailureKind, String)> {
        if let Some(line) = first_match(&self.test, output) {
            return Some((FailureKind::Test, line));
        }
        if let Some(line) = first_match(&self.typecheck, output) {
            return Some((FailureKind::Typecheck, line));
        }
        if exit_code != 0 {
            let message = match output.lines().rev().map(str::trim).find(|l| !l.is_empty()) {
                Some(last) => format!("exit code {}: {}", exit_code, truncate(last, MAX_MESSAGE_CHARS)),
                None => format!("exit code {}", exit_code),
            };
            return Some((FailureKind::AgentError, message));
        }
        first_match(&self.timeout, output).map(|line| (FailureKind::Timeout, line))
    }
}

impl Default for FailureClassifier {
    fn default() -> Self {
        Self::new()
    }
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!("Dropping invalid failure pattern {:?}: {}", p, e);
                None
            }
        })
        .collect()
}

/// First output line matched by the first matching pattern.
fn first_match(patterns: &[Regex], output: &str) -> Option<String> {
    let regex = patterns.iter().find(|re| re.is_match(output))?;
    let line = output
        .lines()
        .find(|line| regex.is_match(line))
        .unwrap_or_else(|| output.lines().next().unwrap_or_default());
    Some(truncate(line.trim(), MAX_MESSAGE_CHARS))
}

/// Keep at most `max` characters.
pub(crate) fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(output: &str, exit_code: i32) -> Option<FailureKind> {
        FailureClassifier::new().kind_of(output, exit_code)
    }

    // ------------------------------------------------------------------------
    // Markers
    // ------------------------------------------------------------------------

    #[test]
    fn test_clean_output_is_not_a_failure() {
        assert_eq!(kind("Compiling ratchet\nFinished dev", 0), None);
        assert_eq!(kind("", 0), None);
    }

    #[test]
    fn test_passing_summaries_are_not_failures() {
        for output in [
            "running 5 tests\ntest result: ok. 5 passed; 0 failed; 0 ignored",
            "Found 0 errors. Watching for file changes.",
            "Tests:       12 passed, 12 total\nTest Suites: 3 passed, 3 total",
            "===== 8 passed, 0 failed in 0.42s =====",
        ] {
            assert_eq!(kind(output, 0), None, "{output}");
        }
    }

    #[test]
    fn test_nonzero_counts_still_fail() {
        assert_eq!(kind("Tests: 10 failed, 2 passed", 1), Some(FailureKind::Test));
        assert_eq!(kind("Found 10 errors in 3 files.", 1), Some(FailureKind::Typecheck));
    }

    #[test]
    fn test_all_marker_patterns_compile() {
        for table in [TEST_PATTERNS, TYPECHECK_PATTERNS, TIMEOUT_PATTERNS] {
            assert_eq!(compile(table).len(), table.len());
        }
    }

    #[test]
    fn test_detects_test_failures_across_toolchains() {
        for output in [
            "test auth::login ... FAILED",
            "test result: FAILED. 1 passed; 1 failed",
            "--- FAIL: TestLogin (0.00s)",
            "FAIL\tgithub.com/acme/app\t0.01s",
            "thread 'main' panicked at src/lib.rs:4:5",
            "E   AssertionError: expected 2",
            "FAILED tests/test_api.py::test_get - KeyError",
            "Tests: 3 failed, 10 passed",
        ] {
            assert_eq!(kind(output, 1), Some(FailureKind::Test), "{output}");
        }
    }

    #[test]
    fn test_detects_typecheck_failures() {
        for output in [
            "error[E0308]: mismatched types",
            "src/app.ts(3,7): error TS2322: Type 'string' is not assignable",
            "./main.go:12:5: undefined: foo",
            "Found 2 errors in 1 file.",
            "error: could not compile `ratchet`",
            "SyntaxError: invalid syntax",
        ] {
            assert_eq!(kind(output, 1), Some(FailureKind::Typecheck), "{output}");
        }
    }

    #[test]
    fn test_timeout_marker_with_clean_exit() {
        assert_eq!(kind("operation timed out after 600s", 0), Some(FailureKind::Timeout));
        assert_eq!(kind("context deadline exceeded", 0), Some(FailureKind::Timeout));
    }

    #[test]
    fn test_nonzero_exit_without_marker_is_agent_error() {
        assert_eq!(kind("something odd happened", 2), Some(FailureKind::AgentError));
        assert_eq!(kind("", 137), Some(FailureKind::AgentError));
    }

    // ------------------------------------------------------------------------
    // Precedence
    // ------------------------------------------------------------------------

    #[test]
    fn test_test_markers_beat_typecheck_markers() {
        let output = "error[E0308]: mismatched types\ntest result: FAILED";
        assert_eq!(kind(output, 1), Some(FailureKind::Test));
    }

    #[test]
    fn test_test_markers_count_even_with_clean_exit() {
        assert_eq!(kind("test foo ... FAILED", 0), Some(FailureKind::Test));
    }

    #[test]
    fn test_agent_error_beats_timeout_marker() {
        assert_eq!(kind("request timed out", 1), Some(FailureKind::AgentError));
    }

    // ------------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------------

    #[test]
    fn test_message_is_matching_line() {
        let classifier = FailureClassifier::new();
        let output = "running 2 tests\n  test parse::empty ... FAILED  \ndone";
        let failure = classifier.classify(output, 101, 3, 9).unwrap();
        assert_eq!(failure.message, "test parse::empty ... FAILED");
        assert_eq!(failure.feature_id, 3);
        assert_eq!(failure.iteration, 9);
        assert_eq!(failure.output_excerpt, output);
    }

    #[test]
    fn test_agent_error_message_uses_last_line() {
        let failure = FailureClassifier::new()
            .classify("starting\nlost connection\n\n", 3, 1, 1)
            .unwrap();
        assert_eq!(failure.message, "exit code 3: lost connection");

        let empty = FailureClassifier::new().classify("", 3, 1, 1).unwrap();
        assert_eq!(empty.message, "exit code 3");
    }

    #[test]
    fn test_excerpt_and_message_are_capped() {
        let long_line = format!("panicked at {}", "x".repeat(500));
        let failure = FailureClassifier::new()
            .with_max_excerpt_chars(50)
            .classify(&long_line, 1, 1, 1)
            .unwrap();
        assert_eq!(failure.message.chars().count(), MAX_MESSAGE_CHARS);
        assert_eq!(failure.output_excerpt.chars().count(), 50);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
