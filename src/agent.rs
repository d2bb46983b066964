//! Agent access over the `claude` CLI.
//!
//! The prompt goes in on stdin and the answer comes back on stdout. The
//! whole exchange runs under a timeout; a timed-out child is dropped and
//! cleaned up by tokio.

use crate::config::{RunConfig, DEFAULT_AGENT_TIMEOUT};
use crate::testing::AgentProcess;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command as AsyncCommand;
use tracing::debug;

const DEFAULT_PROGRAM: &str = "claude";

/// [`AgentProcess`] backed by the `claude` command line.
#[derive(Debug, Clone)]
pub struct ClaudeAgent {
    project_dir: PathBuf,
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl ClaudeAgent {
    /// Create an agent that runs in `project_dir`.
    #[must_use]
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
            program: DEFAULT_PROGRAM.to_string(),
            args: ["-p", "--output-format", "text"]
                .iter()
                .map(ToString::to_string)
                .collect(),
            timeout: DEFAULT_AGENT_TIMEOUT,
        }
    }

    /// Create an agent using the configured timeout.
    #[must_use]
    pub fn from_config(project_dir: impl Into<PathBuf>, config: &RunConfig) -> Self {
        Self::new(project_dir).with_timeout(config.agent_timeout)
    }

    /// Set how long to wait for an answer.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Pass `--model <model>` to the CLI.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.args.push("--model".to_string());
        self.args.push(model.into());
        self
    }

    /// Run a different program with different arguments.
    #[must_use]
    pub fn with_command(
        mut self,
        program: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.program = program.into();
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Configured timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl AgentProcess for ClaudeAgent {
    async fn run_agent(&self, prompt: &str) -> Result<String> {
        debug!(
            "Running {} ({} chars prompt, timeout {:?})",
            self.program,
            prompt.len(),
            self.timeout
        );

        let mut child = match AsyncCommand::new(&self.program)
            .args(&self.args)
            .current_dir(&self.project_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                bail!("The '{}' CLI is not installed or not in PATH", self.program);
            }
            Err(e) => bail!("Failed to spawn {}: {}", self.program, e),
        };

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .map_err(|e| anyhow!("Failed to write prompt to stdin: {}", e))?;
            stdin.flush().await?;
            drop(stdin);
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| anyhow!("{} timed out after {:?}", self.program, self.timeout))?
            .map_err(|e| anyhow!("Failed to read output: {}", e))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "{} exited with {}: {}",
                self.program,
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )
        }
    }
}
