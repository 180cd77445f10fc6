//! Metric trackers
//!
//! A [`Tracker`] is an append-only sink for stepped metric observations,
//! bound to one run identifier. The local backend writes JSON lines; the
//! remote backend (cargo feature `remote`) posts the same observations to an
//! HTTP endpoint.

mod local;
#[cfg(feature = "remote")]
mod remote;

pub use local::{read_log, LocalTracker, LogEntry, RESERVED_KEYS};
#[cfg(feature = "remote")]
pub use remote::RemoteTracker;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::Config;
use crate::{Error, Result};

/// Metric name to value. Values are usually numbers but any JSON is kept.
pub type Metrics = Map<String, Value>;

/// Sink for metric observations of one run.
pub trait Tracker {
    /// Identifier of the run being tracked.
    fn run_id(&self) -> &str;

    /// Record one observation.
    ///
    /// # Errors
    ///
    /// Returns `Error::Tracker` if the run is finished, the sink fails, or a
    /// metric name collides with the backend's own keys ([`RESERVED_KEYS`]
    /// for the local log).
    fn log(&mut self, metrics: &Metrics, step: Option<u64>) -> Result<()>;

    /// Record a single named value.
    ///
    /// # Errors
    ///
    /// Same as [`Tracker::log`].
    fn log_scalar(&mut self, name: &str, value: f64, step: Option<u64>) -> Result<()> {
        let mut metrics = Metrics::new();
        metrics.insert(name.to_string(), Value::from(value));
        self.log(&metrics, step)
    }

    /// Close the run. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `Error::Tracker` if the final write fails.
    fn finish(&mut self) -> Result<()>;
}

/// Tracker backend selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// JSONL file under the project.
    #[default]
    Local,
    /// HTTP endpoint (requires the `remote` feature).
    Remote,
}

/// `tracker:` section of `ox.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrackerConfig {
    /// Which backend to use.
    pub backend: Backend,
    /// Directory for local logs, relative to the project root.
    pub output_dir: PathBuf,
    /// Base URL for the remote backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Local,
            output_dir: PathBuf::from(".ox/metrics"),
            endpoint: None,
        }
    }
}

impl TrackerConfig {
    /// Start a tracked run and write its config header.
    ///
    /// # Errors
    ///
    /// Returns `Error::Tracker` if the backend cannot be opened, or if the
    /// remote backend is selected without an endpoint or without the
    /// `remote` feature.
    pub fn open(&self, root: &Path, run_id: &str, config: &Config) -> Result<Box<dyn Tracker>> {
        match self.backend {
            Backend::Local => {
                let dir = if self.output_dir.is_absolute() {
                    self.output_dir.clone()
                } else {
                    root.join(&self.output_dir)
                };
                Ok(Box::new(LocalTracker::create(dir, run_id, config)?))
            }
            Backend::Remote => self.open_remote(run_id, config),
        }
    }

    #[cfg(feature = "remote")]
    fn open_remote(&self, run_id: &str, config: &Config) -> Result<Box<dyn Tracker>> {
        let endpoint = self.endpoint.as_deref().ok_or_else(|| {
            Error::Tracker("tracker.backend is `remote` but tracker.endpoint is not set".to_string())
        })?;
        Ok(Box::new(RemoteTracker::create(endpoint, run_id, config)?))
    }

    #[cfg(not(feature = "remote"))]
    #[allow(clippy::unused_self)]
    fn open_remote(&self, _run_id: &str, _config: &Config) -> Result<Box<dyn Tracker>> {
        Err(Error::Tracker(
            "the remote tracker backend requires building with `--features remote`".to_string(),
        ))
    }
}
