//! Read-only version-control queries
//!
//! The store records the HEAD commit of the working tree; it never commits.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tracing::debug;

use crate::{Error, Result};

/// Source of the commit SHA and working-tree cleanliness.
pub trait VersionControl: Send + Sync {
    /// Current HEAD commit, or `None` in a repository without commits.
    ///
    /// # Errors
    ///
    /// Returns `Error::GitState` if the working tree cannot be inspected.
    fn head_sha(&self) -> Result<Option<String>>;

    /// Whether the working tree has uncommitted changes. Advisory only.
    ///
    /// # Errors
    ///
    /// Returns `Error::GitState` if the working tree cannot be inspected.
    fn is_dirty(&self) -> Result<bool>;
}

/// [`VersionControl`] backed by the `git` binary.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    /// Probe the repository containing `workdir`.
    #[must_use]
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Run `git init` in `dir`.
    ///
    /// # Errors
    ///
    /// Returns `Error::GitState` if git is unavailable or the command fails.
    pub fn init_repository(dir: &Path) -> Result<()> {
        let output = git(dir, &["init", "--quiet"])?;
        if !output.status.success() {
            return Err(Error::GitState(format!(
                "git init failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    fn ensure_work_tree(&self) -> Result<()> {
        let output = git(&self.workdir, &["rev-parse", "--is-inside-work-tree"])?;
        if output.status.success() {
            Ok(())
        } else {
            Err(Error::GitState(format!(
                "{} is not inside a git working tree: {}",
                self.workdir.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

impl VersionControl for Git {
    fn head_sha(&self) -> Result<Option<String>> {
        self.ensure_work_tree()?;
        let output = git(&self.workdir, &["rev-parse", "--verify", "--quiet", "HEAD"])?;
        if !output.status.success() {
            debug!(workdir = %self.workdir.display(), "repository has no commits yet");
            return Ok(None);
        }
        let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(Some(sha).filter(|s| !s.is_empty()))
    }

    fn is_dirty(&self) -> Result<bool> {
        let output = git(&self.workdir, &["status", "--porcelain"])?;
        if !output.status.success() {
            return Err(Error::GitState(format!(
                "git status failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(!String::from_utf8_lossy(&output.stdout).trim().is_empty())
    }
}

fn git(dir: &Path, args: &[&str]) -> Result<Output> {
    Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(|e| Error::GitState(format!("failed to run git: {e}")))
}
