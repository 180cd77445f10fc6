//! Run orchestration
//!
//! ```text
//! overrides ─┐
//! YAML file ─┼─> resolve ─> begin_run ─> tracker ─> entry.run ─> completed | failed
//! defaults  ─┘
//! ```
//!
//! The config is resolved before the experiment record is touched, so an
//! invalid config never leaves an experiment in `running`. Once the record
//! is `running`, every exit path moves it to a terminal status.

use std::path::Path;

use chrono::Utc;
use tracing::{info, warn};

use crate::config::{load_yaml_mapping, resolve, Config, FlagSet};
use crate::entry::EntryPoint;
use crate::experiment::{Experiment, ExperimentStore, RunStart, Status};
use crate::tracker::TrackerConfig;
use crate::{Error, Result};

/// What to run and how.
#[derive(Clone, Copy)]
pub struct RunRequest<'a> {
    /// Entry point to execute
    pub entry: &'a dyn EntryPoint,
    /// Optional YAML file layer
    pub config_path: Option<&'a Path>,
    /// Schema-derived flags, e.g. `["--lr", "0.01"]`
    pub overrides: &'a [String],
    /// Experiment to track; `None` runs ad hoc
    pub experiment: Option<&'a str>,
    /// Allow re-running a terminal (or stale running) experiment
    pub retry: bool,
    /// Invoking command line, recorded on the experiment
    pub command: &'a str,
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Tracker run identifier
    pub run_id: String,
    /// Resolved configuration
    pub config: Config,
    /// Final experiment record, in experiment mode
    pub experiment: Option<Experiment>,
}

/// Executes entry points against a project.
#[derive(Debug)]
pub struct Runner<'a> {
    root: &'a Path,
    tracker: &'a TrackerConfig,
    store: Option<&'a ExperimentStore>,
}

impl<'a> Runner<'a> {
    /// Runner writing tracker output under `root`, without experiment tracking.
    #[must_use]
    pub const fn new(root: &'a Path, tracker: &'a TrackerConfig) -> Self {
        Self {
            root,
            tracker,
            store: None,
        }
    }

    /// Enable experiment mode.
    #[must_use]
    pub const fn with_store(mut self, store: &'a ExperimentStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Resolve the config, run the entry point and record the outcome.
    ///
    /// # Errors
    ///
    /// Returns config errors (`Validation`, `Schema`, `NotFound`) before
    /// anything is recorded; store errors (`NotFound`, `Ambiguity`,
    /// `InvalidTransition`, `GitState`); `Tracker` errors; and
    /// `EntryFailed` carrying the callable's failure. In experiment mode the
    /// record ends `failed` for every error raised after it entered `running`.
    pub fn run(&self, request: &RunRequest<'_>) -> Result<RunOutcome> {
        let entry = request.entry;
        let flags = FlagSet::from_schema(entry.schema())?;
        let overrides = flags.parse(request.overrides)?;

        let store = match (request.experiment, self.store) {
            (Some(_), None) => {
                return Err(Error::Validation(
                    "--experiment requires running inside an ox project".to_string(),
                ))
            }
            (_, store) => store,
        };

        let file = match (request.config_path, request.experiment, store) {
            (Some(path), _, _) => load_yaml_mapping(path)?,
            (None, Some(slug), Some(store)) => load_yaml_mapping(&store.config_path(slug)?)?,
            _ => serde_json::Map::new(),
        };
        let config = resolve(entry.schema(), &file, &overrides)?;

        let (Some(slug), Some(store)) = (request.experiment, store) else {
            let run_id = format!("run-{}", Utc::now().format("%Y-%m-%dT%H-%M-%S-%6f"));
            info!(entry = entry.name(), run_id, "starting ad-hoc run");
            self.execute(entry, &run_id, &config)?;
            return Ok(RunOutcome {
                run_id,
                config,
                experiment: None,
            });
        };

        let start = RunStart {
            retry: request.retry,
            command: request.command,
            run_id: slug,
        };
        store.begin_run(slug, &start)?;
        info!(entry = entry.name(), experiment = slug, "starting run");

        let result = store
            .save_config_snapshot(slug, &config)
            .and_then(|_| self.execute(entry, slug, &config));

        let status = if result.is_ok() {
            Status::Completed
        } else {
            Status::Failed
        };
        let recorded = store.update_status(slug, status, false);

        match (result, recorded) {
            (Err(e), recorded) => {
                if let Err(record_err) = recorded {
                    warn!(experiment = slug, error = %record_err, "could not record failure");
                }
                warn!(experiment = slug, error = %e, "run failed");
                Err(e)
            }
            (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(experiment)) => {
                info!(experiment = slug, "run completed");
                Ok(RunOutcome {
                    run_id: slug.to_string(),
                    config,
                    experiment: Some(experiment),
                })
            }
        }
    }

    /// Open the tracker, invoke the entry point, and finish the tracker on
    /// both paths. The entry point's failure wins over a finish failure.
    fn execute(&self, entry: &dyn EntryPoint, run_id: &str, config: &Config) -> Result<()> {
        let mut tracker = self.tracker.open(self.root, run_id, config)?;
        let outcome = entry
            .run(config, tracker.as_mut())
            .map_err(|e| Error::EntryFailed {
                entry: entry.name().to_string(),
                message: format!("{e:#}"),
            });
        let finished = tracker.finish();
        outcome.and(finished)
    }
}

/// Reconstruct the invoking command line for the experiment record.
#[must_use]
pub fn command_line(
    entry: &str,
    config_path: Option<&Path>,
    experiment: Option<&str>,
    retry: bool,
    overrides: &[String],
) -> String {
    let mut parts = vec!["ox".to_string(), "run".to_string(), entry.to_string()];
    if let Some(path) = config_path {
        parts.push("--config".to_string());
        parts.push(path.display().to_string());
    }
    if let Some(id) = experiment {
        parts.push("--experiment".to_string());
        parts.push(id.to_string());
    }
    if retry {
        parts.push("--retry".to_string());
    }
    if !overrides.is_empty() {
        parts.push("--".to_string());
        parts.extend(overrides.iter().cloned());
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigSchema, FieldSpec};
    use crate::entry::FnEntry;
    use crate::git::VersionControl;
    use crate::tracker::{read_log, LogEntry};
    use tempfile::TempDir;

    struct NoGit;

    impl VersionControl for NoGit {
        fn head_sha(&self) -> Result<Option<String>> {
            Ok(None)
        }

        fn is_dirty(&self) -> Result<bool> {
            Ok(false)
        }
    }

    fn entry(fail: bool) -> FnEntry {
        let schema = ConfigSchema::new(
            "train",
            vec![
                FieldSpec::float("lr").default(0.001),
                FieldSpec::int("epochs").default(3),
            ],
        )
        .unwrap();
        FnEntry::new("train", schema, move |config, tracker| {
            for step in 0..config.i64("epochs")? {
                tracker.log_scalar("loss", 1.0 / (step + 1) as f64, Some(step as u64))?;
                if fail && step == 1 {
                    anyhow::bail!("diverged at step {step}");
                }
            }
            Ok(())
        })
    }

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_ad_hoc_run_writes_metrics() {
        let tmp = TempDir::new().unwrap();
        let tracker = TrackerConfig::default();
        let entry = entry(false);
        let overrides = args(&["--epochs", "2"]);
        let outcome = Runner::new(tmp.path(), &tracker)
            .run(&RunRequest {
                entry: &entry,
                config_path: None,
                overrides: &overrides,
                experiment: None,
                retry: false,
                command: "ox run train",
            })
            .unwrap();

        assert!(outcome.run_id.starts_with("run-"));
        assert_eq!(outcome.config.i64("epochs").unwrap(), 2);
        let log = tmp
            .path()
            .join(format!(".ox/metrics/{}_metrics.jsonl", outcome.run_id));
        assert_eq!(read_log(log).unwrap().len(), 4);
    }

    #[test]
    fn test_experiment_mode_requires_store() {
        let tmp = TempDir::new().unwrap();
        let tracker = TrackerConfig::default();
        let entry = entry(false);
        let err = Runner::new(tmp.path(), &tracker)
            .run(&RunRequest {
                entry: &entry,
                config_path: None,
                overrides: &[],
                experiment: Some("e"),
                retry: false,
                command: "",
            })
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_invalid_config_leaves_experiment_untouched() {
        let tmp = TempDir::new().unwrap();
        let store = ExperimentStore::with_vcs(tmp.path(), NoGit);
        store.create_study("s").unwrap();
        store.create_experiment("s", "e", &[] as &[&str]).unwrap();

        let tracker = TrackerConfig::default();
        let entry = entry(false);
        let overrides = args(&["--epochs", "many"]);
        let err = Runner::new(tmp.path(), &tracker)
            .with_store(&store)
            .run(&RunRequest {
                entry: &entry,
                config_path: None,
                overrides: &overrides,
                experiment: Some("e"),
                retry: false,
                command: "",
            })
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(store.load("e").unwrap().status(), Status::Created);
    }

    #[test]
    fn test_failure_marks_failed_and_keeps_metrics() {
        let tmp = TempDir::new().unwrap();
        let store = ExperimentStore::with_vcs(tmp.path(), NoGit);
        store.create_study("s").unwrap();
        store.create_experiment("s", "e", &[] as &[&str]).unwrap();

        let tracker = TrackerConfig::default();
        let entry = entry(true);
        let err = Runner::new(tmp.path(), &tracker)
            .with_store(&store)
            .run(&RunRequest {
                entry: &entry,
                config_path: None,
                overrides: &[],
                experiment: Some("e"),
                retry: false,
                command: "ox run train --experiment e",
            })
            .unwrap_err();

        match err {
            Error::EntryFailed { entry, message } => {
                assert_eq!(entry, "train");
                assert!(message.contains("diverged at step 1"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.load("e").unwrap().status(), Status::Failed);

        let entries = read_log(tmp.path().join(".ox/metrics/e_metrics.jsonl")).unwrap();
        let logged = entries
            .iter()
            .filter(|e| matches!(e, LogEntry::Metrics { .. }))
            .count();
        assert_eq!(logged, 2);
        assert!(matches!(entries.last(), Some(LogEntry::Finish { .. })));
    }

    #[test]
    fn test_command_line() {
        let line = command_line(
            "train.yaml",
            Some(Path::new("cfg.yaml")),
            Some("e"),
            true,
            &args(&["--lr", "0.1"]),
        );
        assert_eq!(line, "ox run train.yaml --config cfg.yaml --experiment e --retry -- --lr 0.1");
    }
}
