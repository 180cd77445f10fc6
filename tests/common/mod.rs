//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::path::Path;
use std::process::Command;

use ox_lab::config::{ConfigSchema, FieldSpec};
use ox_lab::entry::FnEntry;
use ox_lab::git::VersionControl;
use ox_lab::ExperimentStore;
use tempfile::TempDir;

/// Version control stub reporting a fixed commit.
#[derive(Debug, Clone)]
pub struct FixedSha(pub Option<&'static str>);

impl VersionControl for FixedSha {
    fn head_sha(&self) -> ox_lab::Result<Option<String>> {
        Ok(self.0.map(str::to_string))
    }

    fn is_dirty(&self) -> ox_lab::Result<bool> {
        Ok(false)
    }
}

pub const SHA: &str = "3f2a9c1e0b7d4a6f8e5c2b1a0d9e8f7c6b5a4d3e";

/// Empty project directory with a store using [`FixedSha`].
pub fn store() -> (TempDir, ExperimentStore) {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("ox.yaml"), "project:\n  name: test\n").unwrap();
    let store = ExperimentStore::with_vcs(tmp.path(), FixedSha(Some(SHA)));
    (tmp, store)
}

/// Schema of the learning-rate sweep entry point.
pub fn lr_schema() -> ConfigSchema {
    ConfigSchema::new(
        "train",
        vec![
            FieldSpec::float("lr").default(0.001).min(0.0).help("Learning rate"),
            FieldSpec::int("batch_size").default(32).min(1.0),
            FieldSpec::int("epochs").default(3).min(1.0),
        ],
    )
    .unwrap()
}

/// Entry point logging a decreasing loss per epoch, failing after
/// `fail_after` epochs when set.
pub fn lr_entry(fail_after: Option<i64>) -> FnEntry {
    FnEntry::new("train", lr_schema(), move |config, tracker| {
        let lr = config.f64("lr")?;
        for epoch in 0..config.i64("epochs")? {
            if fail_after == Some(epoch) {
                anyhow::bail!("loss became NaN at epoch {epoch}");
            }
            #[allow(clippy::cast_precision_loss)]
            let loss = 1.0 / (1.0 + lr * (epoch + 1) as f64);
            tracker.log_scalar("loss", loss, Some(epoch.unsigned_abs() + 1))?;
        }
        Ok(())
    })
}

pub fn args(raw: &[&str]) -> Vec<String> {
    raw.iter().map(ToString::to_string).collect()
}

/// Whether a usable `git` binary is on PATH.
pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .is_ok_and(|o| o.status.success())
}

/// Run git in `dir`, panicking on failure.
pub fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_AUTHOR_NAME", "Test")
        .env("GIT_AUTHOR_EMAIL", "test@example.com")
        .env("GIT_COMMITTER_NAME", "Test")
        .env("GIT_COMMITTER_EMAIL", "test@example.com")
        .status()
        .unwrap();
    assert!(status.success(), "git {args:?} failed");
}
