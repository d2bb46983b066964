//! Git access over the `git` binary.

use crate::testing::GitOperations;
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// [`GitOperations`] backed by the `git` command line.
#[derive(Debug, Clone)]
pub struct GitCli {
    project_dir: PathBuf,
}

impl GitCli {
    /// Create a git handle for the repository at `project_dir`.
    #[must_use]
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
        }
    }

    /// The repository directory.
    #[must_use]
    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.project_dir)
            .output()
            .with_context(|| format!("Failed to run git {}", args.join(" ")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("git {} failed: {}", args.join(" "), stderr.trim());
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl GitOperations for GitCli {
    fn get_commit_hash(&self) -> Result<String> {
        self.run(&["rev-parse", "HEAD"])
    }

    fn reset_to_last_commit(&self) -> Result<()> {
        debug!("Resetting {} to HEAD", self.project_dir.display());
        self.run(&["reset", "--hard", "HEAD"])?;
        self.run(&["clean", "-fd"])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn git(dir: &Path, args: &[&str]) -> bool {
        Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// A repository with one commit, or `None` if git is unavailable.
    fn init_repo() -> Option<TempDir> {
        let dir = TempDir::new().unwrap();
        let path = dir.path();
        let ok = git(path, &["init", "-q"])
            && git(path, &["config", "user.email", "test@example.com"])
            && git(path, &["config", "user.name", "Test"]);
        if !ok {
            return None;
        }
        std::fs::write(path.join("tracked.txt"), "original\n").unwrap();
        if !(git(path, &["add", "."]) && git(path, &["commit", "-q", "-m", "init"])) {
            return None;
        }
        Some(dir)
    }

    #[test]
    fn test_commit_hash_outside_repo_is_error() {
        let dir = TempDir::new().unwrap();
        assert!(GitCli::new(dir.path()).get_commit_hash().is_err());
    }

    #[test]
    fn test_reset_discards_changes_and_untracked_files() {
        let Some(dir) = init_repo() else {
            return;
        };
        let path = dir.path();
        std::fs::write(path.join("tracked.txt"), "edited\n").unwrap();
        std::fs::write(path.join("scratch.txt"), "new\n").unwrap();

        let git = GitCli::new(path);
        let before = git.get_commit_hash().unwrap();
        git.reset_to_last_commit().unwrap();

        assert_eq!(
            std::fs::read_to_string(path.join("tracked.txt")).unwrap(),
            "original\n"
        );
        assert!(!path.join("scratch.txt").exists());
        assert_eq!(git.get_commit_hash().unwrap(), before);
        assert_eq!(before.len(), 40);
    }
}
