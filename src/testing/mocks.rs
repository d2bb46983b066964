//! Mock implementations of the collaborator traits.
//!
//! These mocks give recovery and replanning tests deterministic git and
//! agent behavior.

use super::traits::{AgentProcess, GitOperations};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

/// Mock implementation of git operations.
///
/// # Example
///
/// ```rust,ignore
/// let git = MockGitOperations::new()
///     .with_commit_hash("abc123")
///     .with_reset_error("index.lock exists");
///
/// assert!(git.reset_to_last_commit().is_err());
/// ```
#[derive(Debug, Default)]
pub struct MockGitOperations {
    commit_hash: String,
    reset_error: Option<String>,
    reset_count: AtomicU32,
}

impl MockGitOperations {
    /// Create a new mock with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the commit hash to return.
    #[must_use]
    pub fn with_commit_hash(mut self, hash: &str) -> Self {
        self.commit_hash = hash.to_string();
        self
    }

    /// Make every reset fail with the given message.
    #[must_use]
    pub fn with_reset_error(mut self, error: &str) -> Self {
        self.reset_error = Some(error.to_string());
        self
    }

    /// Number of reset attempts so far.
    pub fn reset_count(&self) -> u32 {
        self.reset_count.load(Ordering::SeqCst)
    }
}

impl GitOperations for MockGitOperations {
    fn get_commit_hash(&self) -> Result<String> {
        Ok(self.commit_hash.clone())
    }

    fn reset_to_last_commit(&self) -> Result<()> {
        self.reset_count.fetch_add(1, Ordering::SeqCst);
        match self.reset_error {
            Some(ref error) => bail!("{}", error),
            None => Ok(()),
        }
    }
}

/// Mock implementation of the replanning agent.
///
/// Thread-safe for use in async contexts.
///
/// # Example
///
/// ```rust,ignore
/// let agent = MockAgentProcess::new()
///     .with_response(r#"[{"id": 1, "description": "Smaller step"}]"#);
///
/// let text = agent.run_agent("replan").await?;
/// assert_eq!(agent.call_count(), 1);
/// ```
#[derive(Debug, Default)]
pub struct MockAgentProcess {
    response: String,
    error: Option<String>,
    call_count: AtomicU32,
    last_prompt: Mutex<Option<String>>,
}

impl MockAgentProcess {
    /// Create a new mock that answers with an empty string.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the text the agent answers with.
    #[must_use]
    pub fn with_response(mut self, response: &str) -> Self {
        self.response = response.to_string();
        self
    }

    /// Configure the mock to fail.
    #[must_use]
    pub fn with_error(mut self, error: &str) -> Self {
        self.error = Some(error.to_string());
        self
    }

    /// Get the number of times run_agent was called.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// The most recent prompt the agent received.
    pub fn last_prompt(&self) -> Option<String> {
        self.last_prompt
            .lock()
            .ok()
            .and_then(|guard| guard.clone())
    }
}

#[async_trait]
impl AgentProcess for MockAgentProcess {
    async fn run_agent(&self, prompt: &str) -> Result<String> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut guard) = self.last_prompt.lock() {
            *guard = Some(prompt.to_string());
        }

        if let Some(ref error) = self.error {
            bail!("{}", error)
        } else {
            Ok(self.response.clone())
        }
    }
}
