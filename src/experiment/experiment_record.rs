//! Experiment Record - one tracked run attempt

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Status;
use crate::config::Config;

/// Experiment Record represents one tracked run attempt.
///
/// The metadata is persisted as `experiment.json`; the config snapshot lives
/// next to it in `config.yaml` and is attached on load.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Experiment {
    #[serde(rename = "id")]
    slug: String,
    study: String,
    status: Status,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    git_sha: Option<String>,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    tracker_run_id: Option<String>,
    #[serde(skip)]
    config: Config,
}

impl Experiment {
    /// Create a builder for an experiment in `created` status.
    #[must_use]
    pub fn builder(slug: impl Into<String>, study: impl Into<String>) -> ExperimentBuilder {
        ExperimentBuilder::new(slug, study)
    }

    /// Get the globally unique slug.
    #[must_use]
    pub fn slug(&self) -> &str {
        &self.slug
    }

    /// Get the owning study slug.
    #[must_use]
    pub fn study(&self) -> &str {
        &self.study
    }

    /// Get the current status.
    #[must_use]
    pub const fn status(&self) -> Status {
        self.status
    }

    /// Get the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Get the last update timestamp.
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Get the git commit SHA, if one was captured.
    #[must_use]
    pub fn git_sha(&self) -> Option<&str> {
        self.git_sha.as_deref()
    }

    /// Get the invoking command line, if the experiment has been run.
    #[must_use]
    pub fn command(&self) -> Option<&str> {
        self.command.as_deref()
    }

    /// Get the tags in insertion order.
    #[must_use]
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Whether the experiment carries `tag`.
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Get the tracker run identifier, if the experiment has been run.
    #[must_use]
    pub fn tracker_run_id(&self) -> Option<&str> {
        self.tracker_run_id.as_deref()
    }

    /// Get the config snapshot.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn set_status(&mut self, status: Status, at: DateTime<Utc>) {
        self.status = status;
        self.updated_at = at;
    }

    pub(crate) fn set_git_sha(&mut self, sha: Option<String>) {
        self.git_sha = sha;
    }

    pub(crate) fn set_command(&mut self, command: impl Into<String>) {
        self.command = Some(command.into());
    }

    pub(crate) fn set_tracker_run_id(&mut self, run_id: impl Into<String>) {
        self.tracker_run_id = Some(run_id.into());
    }

    pub(crate) fn set_config(&mut self, config: Config) {
        self.config = config;
    }
}

/// Builder for `Experiment`.
#[derive(Debug)]
pub struct ExperimentBuilder {
    slug: String,
    study: String,
    status: Status,
    created_at: DateTime<Utc>,
    git_sha: Option<String>,
    tags: Vec<String>,
    config: Config,
}

impl ExperimentBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(slug: impl Into<String>, study: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            study: study.into(),
            status: Status::Created,
            created_at: Utc::now(),
            git_sha: None,
            tags: Vec::new(),
            config: Config::default(),
        }
    }

    /// Set the captured git SHA.
    #[must_use]
    pub fn git_sha(mut self, sha: Option<String>) -> Self {
        self.git_sha = sha;
        self
    }

    /// Add tags; duplicates are dropped, first occurrence wins.
    #[must_use]
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for tag in tags {
            let tag = tag.into();
            if !self.tags.contains(&tag) {
                self.tags.push(tag);
            }
        }
        self
    }

    /// Set the initial status (useful for fixtures).
    #[must_use]
    pub const fn status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    /// Set a custom creation timestamp (useful for deserialization/testing).
    #[must_use]
    pub const fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Attach a config snapshot.
    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Build the `Experiment`.
    #[must_use]
    pub fn build(self) -> Experiment {
        Experiment {
            slug: self.slug,
            study: self.study,
            status: self.status,
            created_at: self.created_at,
            updated_at: self.created_at,
            git_sha: self.git_sha,
            command: None,
            tags: self.tags,
            tracker_run_id: None,
            config: self.config,
        }
    }
}
