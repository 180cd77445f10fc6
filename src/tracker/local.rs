//! JSONL file tracker
//!
//! One file per run at `<output_dir>/<run_id>_metrics.jsonl`, opened in
//! append mode. Every line is flushed as soon as it is written, so a crashed
//! run keeps everything logged before the crash.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{Metrics, Tracker};
use crate::config::Config;
use crate::{Error, Result};

/// Line keys that metrics share their JSON object with.
pub const RESERVED_KEYS: [&str; 3] = ["type", "timestamp", "step"];

/// One line of a metrics log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LogEntry {
    /// Header written when the run starts.
    Config {
        /// Run identifier
        run_id: String,
        /// Resolved configuration
        config: Config,
    },
    /// One observation.
    Metrics {
        /// Wall-clock time of the observation
        timestamp: DateTime<Utc>,
        /// Optional step
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step: Option<u64>,
        /// Metric values, flattened into the line
        #[serde(flatten)]
        metrics: Metrics,
    },
    /// Trailer written by [`Tracker::finish`].
    Finish {
        /// Run identifier
        run_id: String,
        /// Wall-clock time of the finish
        timestamp: DateTime<Utc>,
        /// Highest step observed (0 when no step was given)
        total_steps: u64,
    },
}

/// [`Tracker`] writing JSON lines to a local file.
#[derive(Debug)]
pub struct LocalTracker {
    run_id: String,
    path: PathBuf,
    file: Option<File>,
    total_steps: u64,
}

impl LocalTracker {
    /// Open (or append to) the run's log file and write the config header.
    ///
    /// # Errors
    ///
    /// Returns `Error::Tracker` if the directory or file cannot be created.
    pub fn create(output_dir: impl AsRef<Path>, run_id: &str, config: &Config) -> Result<Self> {
        let output_dir = output_dir.as_ref();
        fs::create_dir_all(output_dir).map_err(|e| {
            Error::Tracker(format!("cannot create {}: {e}", output_dir.display()))
        })?;
        let path = output_dir.join(format!("{run_id}_metrics.jsonl"));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| Error::Tracker(format!("cannot open {}: {e}", path.display())))?;

        let mut tracker = Self {
            run_id: run_id.to_string(),
            path,
            file: Some(file),
            total_steps: 0,
        };
        tracker.write(&LogEntry::Config {
            run_id: run_id.to_string(),
            config: config.clone(),
        })?;
        info!(run_id, path = %tracker.path.display(), "local tracker logging");
        Ok(tracker)
    }

    /// Path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&mut self, entry: &LogEntry) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| Error::Tracker(format!("run `{}` is already finished", self.run_id)))?;
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        file.write_all(&line)
            .and_then(|()| file.flush())
            .map_err(|e| Error::Tracker(format!("write to {} failed: {e}", self.path.display())))
    }
}

impl Tracker for LocalTracker {
    fn run_id(&self) -> &str {
        &self.run_id
    }

    fn log(&mut self, metrics: &Metrics, step: Option<u64>) -> Result<()> {
        if let Some(name) = metrics.keys().find(|k| RESERVED_KEYS.contains(&k.as_str())) {
            return Err(Error::Tracker(format!(
                "metric name `{name}` is reserved in metrics logs (reserved: {})",
                RESERVED_KEYS.join(", ")
            )));
        }
        self.write(&LogEntry::Metrics {
            timestamp: Utc::now(),
            step,
            metrics: metrics.clone(),
        })?;
        if let Some(step) = step {
            self.total_steps = self.total_steps.max(step);
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.file.is_none() {
            return Ok(());
        }
        self.write(&LogEntry::Finish {
            run_id: self.run_id.clone(),
            timestamp: Utc::now(),
            total_steps: self.total_steps,
        })?;
        if let Some(file) = self.file.take() {
            file.sync_all()
                .map_err(|e| Error::Tracker(format!("sync of {} failed: {e}", self.path.display())))?;
        }
        debug!(run_id = self.run_id, "local tracker finished");
        Ok(())
    }
}

/// Parse a metrics log back into entries.
///
/// # Errors
///
/// Returns `Error::Io` if the file cannot be read and
/// `Error::Serialization` on a malformed line.
pub fn read_log(path: impl AsRef<Path>) -> Result<Vec<LogEntry>> {
    let reader = BufReader::new(File::open(path)?);
    let mut entries = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        entries.push(serde_json::from_str(&line)?);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn metrics(value: serde_json::Value) -> Metrics {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_log_lines_and_finish() {
        let tmp = TempDir::new().unwrap();
        let config = Config::from_map(metrics(json!({"lr": 0.01})));
        let mut tracker = LocalTracker::create(tmp.path(), "run-a", &config).unwrap();

        tracker.log(&metrics(json!({"loss": 0.9})), Some(1)).unwrap();
        tracker.log(&metrics(json!({"loss": 0.5})), Some(3)).unwrap();
        tracker.log(&metrics(json!({"note": "no step"})), None).unwrap();
        tracker.finish().unwrap();
        tracker.finish().unwrap();

        let entries = read_log(tmp.path().join("run-a_metrics.jsonl")).unwrap();
        assert_eq!(entries.len(), 5);
        assert!(matches!(&entries[0], LogEntry::Config { config: c, .. } if c == &config));
        match &entries[2] {
            LogEntry::Metrics { step, metrics, .. } => {
                assert_eq!(*step, Some(3));
                assert_eq!(metrics["loss"], json!(0.5));
            }
            other => panic!("unexpected entry {other:?}"),
        }
        assert!(matches!(&entries[4], LogEntry::Finish { total_steps: 3, .. }));
    }

    #[test]
    fn test_metrics_are_flattened_on_disk() {
        let tmp = TempDir::new().unwrap();
        let mut tracker = LocalTracker::create(tmp.path(), "r", &Config::default()).unwrap();
        tracker.log_scalar("acc", 0.75, Some(2)).unwrap();

        let raw = fs::read_to_string(tracker.path()).unwrap();
        let line: serde_json::Value = serde_json::from_str(raw.lines().nth(1).unwrap()).unwrap();
        assert_eq!(line["type"], "metrics");
        assert_eq!(line["step"], 2);
        assert_eq!(line["acc"], 0.75);
    }

    #[test]
    fn test_reserved_metric_names_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut tracker = LocalTracker::create(tmp.path(), "r", &Config::default()).unwrap();
        for name in RESERVED_KEYS {
            let err = tracker
                .log(&metrics(json!({ "loss": 0.5, name: 1 })), Some(1))
                .unwrap_err();
            assert!(matches!(err, Error::Tracker(msg) if msg.contains(name)));
        }
        tracker.log(&metrics(json!({"steps": 4, "kind": "eval"})), Some(2)).unwrap();
        tracker.finish().unwrap();

        let entries = read_log(tracker.path()).unwrap();
        assert_eq!(entries.len(), 3);
        assert!(matches!(&entries[2], LogEntry::Finish { total_steps: 2, .. }));
    }

    #[test]
    fn test_lines_visible_before_finish() {
        let tmp = TempDir::new().unwrap();
        let mut tracker = LocalTracker::create(tmp.path(), "r", &Config::default()).unwrap();
        tracker.log_scalar("loss", 1.0, Some(1)).unwrap();
        // No finish: simulates a crashed run.
        assert_eq!(read_log(tracker.path()).unwrap().len(), 2);
    }

    #[test]
    fn test_log_after_finish_fails() {
        let tmp = TempDir::new().unwrap();
        let mut tracker = LocalTracker::create(tmp.path(), "r", &Config::default()).unwrap();
        tracker.finish().unwrap();
        assert!(matches!(
            tracker.log_scalar("loss", 1.0, None),
            Err(Error::Tracker(_))
        ));
    }

    #[test]
    fn test_reopen_appends() {
        let tmp = TempDir::new().unwrap();
        for _ in 0..2 {
            let mut tracker = LocalTracker::create(tmp.path(), "r", &Config::default()).unwrap();
            tracker.finish().unwrap();
        }
        assert_eq!(read_log(tmp.path().join("r_metrics.jsonl")).unwrap().len(), 4);
    }
}
