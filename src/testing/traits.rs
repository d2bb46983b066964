//! Trait definitions for the engine's external collaborators.
//!
//! Version control and the work-producing agent are the only outside
//! processes the engine talks to. Both sit behind traits so recovery and
//! replanning can be tested without a real repository or a real agent.

use anyhow::Result;
use async_trait::async_trait;

/// Abstraction for the version-control operations a rollback needs.
///
/// # Example
///
/// ```rust,ignore
/// use ratchet::testing::GitOperations;
///
/// fn roll_back(git: &dyn GitOperations) -> anyhow::Result<String> {
///     git.reset_to_last_commit()?;
///     git.get_commit_hash()
/// }
/// ```
pub trait GitOperations: Send + Sync {
    /// Get the current HEAD commit hash.
    ///
    /// # Errors
    ///
    /// Returns an error if git is not available or not in a repository.
    fn get_commit_hash(&self) -> Result<String>;

    /// Discard every uncommitted change, returning the tree to HEAD.
    ///
    /// # Errors
    ///
    /// Returns an error if the reset or clean fails.
    fn reset_to_last_commit(&self) -> Result<()>;
}

/// Abstraction for the agent that rewrites plans.
///
/// This trait is async because the agent runs as a child process and
/// replanning awaits it.
#[async_trait]
pub trait AgentProcess: Send + Sync {
    /// Send a prompt to the agent and return its full text response.
    ///
    /// # Errors
    ///
    /// Returns an error if the agent cannot be started, exits with a
    /// failure status, or does not answer in time.
    async fn run_agent(&self, prompt: &str) -> Result<String>;
}
