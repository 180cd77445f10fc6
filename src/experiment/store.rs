//! Experiment Store - on-disk studies and experiment records
//!
//! ## Layout
//!
//! ```text
//! <root>/studies/<study>/README.md
//! <root>/studies/<study>/experiments/<slug>/experiment.json
//! <root>/studies/<study>/experiments/<slug>/config.yaml
//! <root>/studies/<study>/experiments/<slug>/NOTES.md
//! ```
//!
//! Every metadata write goes through a temp file and a rename, so concurrent
//! readers in other processes never observe a partial record. There is no
//! cross-process locking: last writer wins.

use std::fmt;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info, warn};

use super::slug::{candidate, slugify};
use super::{Experiment, Status, Study, Transition};
use crate::config::{parse_yaml_mapping, Config};
use crate::git::{Git, VersionControl};
use crate::{Error, Result};

const STUDIES_DIR: &str = "studies";
const EXPERIMENTS_DIR: &str = "experiments";
const README_FILE: &str = "README.md";
const METADATA_FILE: &str = "experiment.json";
const CONFIG_FILE: &str = "config.yaml";
const NOTES_FILE: &str = "NOTES.md";
const CONFIG_PLACEHOLDER: &str = "# Experiment configuration\n";

/// Details recorded when an experiment starts executing.
#[derive(Debug, Clone)]
pub struct RunStart<'a> {
    /// Explicit signal that a terminal (or stale running) experiment may run again
    pub retry: bool,
    /// Invoking command line
    pub command: &'a str,
    /// Tracker run identifier bound to this attempt
    pub run_id: &'a str,
}

/// Filesystem-backed store of studies and experiments under a project root.
pub struct ExperimentStore {
    root: PathBuf,
    vcs: Box<dyn VersionControl>,
}

impl fmt::Debug for ExperimentStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExperimentStore")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl ExperimentStore {
    /// Open the store under `root`, probing git in the same directory.
    #[must_use]
    pub fn open(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let vcs = Git::new(root.clone());
        Self::with_vcs(root, vcs)
    }

    /// Open the store with a custom version-control backend.
    #[must_use]
    pub fn with_vcs(root: impl Into<PathBuf>, vcs: impl VersionControl + 'static) -> Self {
        Self {
            root: root.into(),
            vcs: Box::new(vcs),
        }
    }

    /// Project root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The version-control backend.
    #[must_use]
    pub fn vcs(&self) -> &dyn VersionControl {
        self.vcs.as_ref()
    }

    fn studies_dir(&self) -> PathBuf {
        self.root.join(STUDIES_DIR)
    }

    fn study_dir(&self, study: &str) -> PathBuf {
        self.studies_dir().join(study)
    }

    fn experiment_dir(&self, study: &str, slug: &str) -> PathBuf {
        self.study_dir(study).join(EXPERIMENTS_DIR).join(slug)
    }

    // ------------------------------------------------------------------
    // Studies
    // ------------------------------------------------------------------

    /// Create a study from a display name.
    ///
    /// # Errors
    ///
    /// Returns `Error::Conflict` if the slug is taken, `Error::Validation` if
    /// the name has no slug-able characters, `Error::Io` on filesystem errors.
    pub fn create_study(&self, name: &str) -> Result<Study> {
        let slug = slugify(name);
        if slug.is_empty() {
            return Err(Error::Validation(format!(
                "study name `{name}` does not contain any letters or digits"
            )));
        }

        fs::create_dir_all(self.studies_dir())?;
        let dir = self.study_dir(&slug);
        match fs::create_dir(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(Error::Conflict {
                    kind: "Study",
                    slug,
                });
            }
            Err(e) => return Err(e.into()),
        }
        fs::create_dir_all(dir.join(EXPERIMENTS_DIR))?;

        let study = Study::new(slug, name);
        atomic_write(&dir.join(README_FILE), study.readme().as_bytes())?;
        info!(study = study.slug(), "created study");
        Ok(study)
    }

    /// Load a study by slug.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the study does not exist and `Error::Io`
    /// if its README exists but cannot be read.
    pub fn study(&self, slug: &str) -> Result<Study> {
        let dir = self.study_dir(slug);
        if !dir.is_dir() {
            return Err(Error::not_found("Study", slug));
        }
        let readme = match fs::read_to_string(dir.join(README_FILE)) {
            Ok(readme) => readme,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Study::from_readme(slug, readme))
    }

    /// All studies, sorted by slug.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the studies directory cannot be read.
    pub fn studies(&self) -> Result<Vec<Study>> {
        self.study_slugs()?
            .into_iter()
            .map(|slug| self.study(&slug))
            .collect()
    }

    fn study_slugs(&self) -> Result<Vec<String>> {
        sorted_subdirs(&self.studies_dir())
    }

    // ------------------------------------------------------------------
    // Experiments
    // ------------------------------------------------------------------

    /// Create an experiment under `study`.
    ///
    /// The slug is unique across all studies: a name that normalizes to a
    /// taken slug gets a numeric suffix (`-2`, `-3`, ...). The experiment
    /// directory is claimed with an exclusive `create_dir`; a concurrent
    /// claim of the same slug in another study is detected afterwards and
    /// the later claimant moves on to the next suffix.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the study does not exist,
    /// `Error::GitState` if the working tree cannot be inspected,
    /// `Error::Validation` if the name has no slug-able characters.
    pub fn create_experiment<S: AsRef<str>>(
        &self,
        study: &str,
        name: &str,
        tags: &[S],
    ) -> Result<Experiment> {
        let study_slug = slugify(study);
        if !self.study_dir(&study_slug).is_dir() {
            return Err(Error::not_found("Study", study_slug));
        }

        let base = slugify(name);
        if base.is_empty() {
            return Err(Error::Validation(format!(
                "experiment name `{name}` does not contain any letters or digits"
            )));
        }

        let git_sha = self.vcs.head_sha()?;

        let mut attempt = 1;
        let (slug, dir) = loop {
            let slug = candidate(&base, attempt);
            attempt += 1;

            if !self.locate(&slug, false)?.is_empty() {
                continue;
            }

            let dir = self.experiment_dir(&study_slug, &slug);
            fs::create_dir_all(self.study_dir(&study_slug).join(EXPERIMENTS_DIR))?;
            match fs::create_dir(&dir) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }

            if self.locate(&slug, false)?.len() > 1 {
                warn!(slug, study = study_slug, "slug claimed concurrently in another study, retrying");
                fs::remove_dir(&dir)?;
                continue;
            }
            break (slug, dir);
        };

        let experiment = Experiment::builder(slug, study_slug)
            .git_sha(git_sha)
            .tags(tags.iter().map(AsRef::as_ref))
            .build();

        write_metadata(&dir, &experiment)?;
        atomic_write(&dir.join(CONFIG_FILE), CONFIG_PLACEHOLDER.as_bytes())?;
        atomic_write(&dir.join(NOTES_FILE), render_notes(name).as_bytes())?;

        info!(
            experiment = experiment.slug(),
            study = experiment.study(),
            "created experiment"
        );
        Ok(experiment)
    }

    /// Studies holding an experiment directory named `slug`.
    fn locate(&self, slug: &str, with_metadata: bool) -> Result<Vec<(String, PathBuf)>> {
        let mut found = Vec::new();
        for study in self.study_slugs()? {
            let dir = self.experiment_dir(&study, slug);
            let present = if with_metadata {
                dir.join(METADATA_FILE).is_file()
            } else {
                dir.is_dir()
            };
            if present {
                found.push((study, dir));
            }
        }
        Ok(found)
    }

    fn find(&self, slug: &str) -> Result<PathBuf> {
        let mut found = self.locate(slug, true)?;
        match found.len() {
            0 => Err(Error::not_found("Experiment", slug)),
            1 => Ok(found.remove(0).1),
            _ => Err(Error::Ambiguity {
                slug: slug.to_string(),
                studies: found.into_iter().map(|(study, _)| study).collect(),
            }),
        }
    }

    /// Directory holding the experiment's files.
    ///
    /// # Errors
    ///
    /// Same as [`ExperimentStore::load`].
    pub fn experiment_path(&self, slug: &str) -> Result<PathBuf> {
        self.find(slug)
    }

    /// Load an experiment by slug, searching every study.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if no study holds the slug and
    /// `Error::Ambiguity` if more than one does.
    pub fn load(&self, slug: &str) -> Result<Experiment> {
        read_experiment(&self.find(slug)?)
    }

    /// All readable experiments, sorted by study then slug.
    ///
    /// Malformed records are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if a directory cannot be listed.
    pub fn list(&self) -> Result<Vec<Experiment>> {
        let mut experiments = Vec::new();
        for study in self.study_slugs()? {
            let exp_root = self.study_dir(&study).join(EXPERIMENTS_DIR);
            for slug in sorted_subdirs(&exp_root)? {
                let dir = exp_root.join(&slug);
                if !dir.join(METADATA_FILE).is_file() {
                    continue;
                }
                match read_experiment(&dir) {
                    Ok(exp) => experiments.push(exp),
                    Err(e) => warn!(path = %dir.display(), error = %e, "skipping malformed experiment"),
                }
            }
        }
        Ok(experiments)
    }

    /// Set the status of an experiment and refresh its update timestamp.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidTransition` when entering `running` from a
    /// terminal state or from `running` without `retry`, plus any error of
    /// [`ExperimentStore::load`].
    pub fn update_status(&self, slug: &str, status: Status, retry: bool) -> Result<Experiment> {
        let dir = self.find(slug)?;
        let mut experiment = read_experiment(&dir)?;
        check_transition(&experiment, status, retry)?;
        experiment.set_status(status, Utc::now());
        write_metadata(&dir, &experiment)?;
        Ok(experiment)
    }

    /// Move an experiment to `running`, recording the command, tracker run
    /// and current git SHA in the same write.
    ///
    /// A dirty working tree is reported as a warning only.
    ///
    /// # Errors
    ///
    /// Same as [`ExperimentStore::update_status`], plus `Error::GitState`.
    pub fn begin_run(&self, slug: &str, start: &RunStart<'_>) -> Result<Experiment> {
        let dir = self.find(slug)?;
        let mut experiment = read_experiment(&dir)?;
        check_transition(&experiment, Status::Running, start.retry)?;

        experiment.set_git_sha(self.vcs.head_sha()?);
        match self.vcs.is_dirty() {
            Ok(true) => warn!(
                experiment = slug,
                "working tree has uncommitted changes; the recorded SHA will not reproduce this run"
            ),
            Ok(false) => {}
            Err(e) => debug!(error = %e, "could not check working tree cleanliness"),
        }
        experiment.set_command(start.command);
        experiment.set_tracker_run_id(start.run_id);
        experiment.set_status(Status::Running, Utc::now());
        write_metadata(&dir, &experiment)?;
        Ok(experiment)
    }

    /// Persist the resolved config next to the experiment record.
    ///
    /// Returns `false` (and writes nothing) when the stored snapshot is
    /// already byte-identical.
    ///
    /// # Errors
    ///
    /// Same as [`ExperimentStore::load`], plus `Error::Io`.
    pub fn save_config_snapshot(&self, slug: &str, config: &Config) -> Result<bool> {
        let path = self.find(slug)?.join(CONFIG_FILE);
        let content = config.to_yaml()?;
        if fs::read(&path).is_ok_and(|existing| existing == content.as_bytes()) {
            debug!(experiment = slug, "config snapshot unchanged");
            return Ok(false);
        }
        atomic_write(&path, content.as_bytes())?;
        debug!(experiment = slug, "config snapshot written");
        Ok(true)
    }

    /// Path of the experiment's `config.yaml`.
    ///
    /// # Errors
    ///
    /// Same as [`ExperimentStore::load`].
    pub fn config_path(&self, slug: &str) -> Result<PathBuf> {
        Ok(self.find(slug)?.join(CONFIG_FILE))
    }

    /// Contents of the experiment's `NOTES.md`, if present.
    ///
    /// # Errors
    ///
    /// Same as [`ExperimentStore::load`].
    pub fn notes(&self, slug: &str) -> Result<Option<String>> {
        let path = self.find(slug)?.join(NOTES_FILE);
        match fs::read_to_string(path) {
            Ok(notes) => Ok(Some(notes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn check_transition(experiment: &Experiment, to: Status, retry: bool) -> Result<()> {
    let from = experiment.status();
    match from.transition(to, retry) {
        Transition::Expected => {
            info!(experiment = experiment.slug(), %from, %to, "status change");
            Ok(())
        }
        Transition::OutOfOrder => {
            warn!(experiment = experiment.slug(), %from, %to, "out-of-order status change");
            Ok(())
        }
        Transition::Forbidden => Err(Error::InvalidTransition {
            slug: experiment.slug().to_string(),
            from: from.to_string(),
            to: to.to_string(),
        }),
    }
}

fn read_experiment(dir: &Path) -> Result<Experiment> {
    let raw = fs::read_to_string(dir.join(METADATA_FILE))?;
    let mut experiment: Experiment = serde_json::from_str(&raw)?;

    let config_path = dir.join(CONFIG_FILE);
    if config_path.is_file() {
        let mapping = parse_yaml_mapping(&fs::read_to_string(&config_path)?)?;
        experiment.set_config(Config::from_map(mapping));
    }
    Ok(experiment)
}

fn write_metadata(dir: &Path, experiment: &Experiment) -> Result<()> {
    let mut bytes = serde_json::to_vec_pretty(experiment)?;
    bytes.push(b'\n');
    atomic_write(&dir.join(METADATA_FILE), &bytes)
}

/// Write `bytes` to a temp file beside `path`, fsync, then rename over `path`.
fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tmpfile");
    let tmp = parent.join(format!(
        ".{name}.tmp.{}.{}",
        std::process::id(),
        Utc::now().timestamp_micros()
    ));

    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    if let Ok(dir) = fs::File::open(parent) {
        let _ = dir.sync_all();
    }
    Ok(())
}

fn sorted_subdirs(dir: &Path) -> Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if !name.starts_with('.') {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

fn render_notes(name: &str) -> String {
    format!(
        "# {name}\n\
         \n\
         ## Setup\n\
         \n\
         <!-- Describe what this experiment tests -->\n\
         \n\
         ## Observations\n\
         \n\
         <!-- Notes during and after the run -->\n\
         \n\
         ## Results\n\
         \n\
         <!-- Key metrics and outcomes -->\n"
    )
}
