//! Project root, settings and scaffolding
//!
//! A project is any directory holding an `ox.yaml`. Commands find it by
//! walking up from the working directory.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::experiment::slugify;
use crate::git::Git;
use crate::tracker::TrackerConfig;
use crate::{Error, Result};

/// Name of the project settings file.
pub const PROJECT_FILE: &str = "ox.yaml";

/// `project:` section of `ox.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectSection {
    /// Display name; the directory name is used when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Parsed `ox.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Project metadata
    pub project: ProjectSection,
    /// Metric tracker settings
    pub tracker: TrackerConfig,
}

impl ProjectConfig {
    /// Read `<root>/ox.yaml`. An empty file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the file cannot be read and
    /// `Error::Serialization` if it is malformed.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(PROJECT_FILE);
        let raw = fs::read_to_string(&path)?;
        debug!(path = %path.display(), "loading project settings");
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str::<Option<Self>>(&raw)?.unwrap_or_default())
    }

    /// Display name, falling back to the root directory name.
    #[must_use]
    pub fn display_name(&self, root: &Path) -> String {
        self.project.name.clone().unwrap_or_else(|| {
            root.file_name()
                .map_or_else(|| root.display().to_string(), |n| n.to_string_lossy().into_owned())
        })
    }
}

/// Find the nearest ancestor of `start` (inclusive) holding `ox.yaml`.
///
/// # Errors
///
/// Returns `Error::NotFound` if no ancestor is a project.
pub fn find_root(start: &Path) -> Result<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(PROJECT_FILE).is_file())
        .map(Path::to_path_buf)
        .ok_or_else(|| {
            Error::not_found(
                "Project",
                format!(
                    "no {PROJECT_FILE} in {} or any parent directory (run `ox init <name>` to create one)",
                    start.display()
                ),
            )
        })
}

const GITIGNORE: &str = ".ox/metrics/\ntarget/\n";

const EXAMPLE_MANIFEST: &str = "\
# Entry point manifest: `ox run entries/train.yaml -- --lr 0.01`
command: [sh, train.sh]
fields:
  - name: lr
    type: float
    default: 0.001
    min: 0
    help: Learning rate
  - name: batch_size
    type: int
    default: 32
    min: 1
  - name: epochs
    type: int
    default: 10
    min: 1
";

const EXAMPLE_SCRIPT: &str = r#"#!/bin/sh
# Example entry point. The resolved config arrives as JSON in $OX_CONFIG and
# the run id in $OX_RUN_ID. Lines shaped like {"metrics": {...}, "step": N}
# are recorded by the tracker; anything else is printed as-is.
echo "run $OX_RUN_ID with config $OX_CONFIG"
step=1
while [ "$step" -le 3 ]; do
  echo "{\"metrics\": {\"loss\": 0.$((10 - step))}, \"step\": $step}"
  step=$((step + 1))
done
"#;

/// Create a project named `name` in `dir`.
///
/// `dir` is created when missing. Writes `ox.yaml`, `studies/`,
/// `.ox/metrics/`, `.gitignore` and an example entry point under `entries/`,
/// then runs `git init`. Nothing is committed.
///
/// # Errors
///
/// Returns `Error::Conflict` if `dir` already holds a project, `Error::Io`
/// on filesystem errors and `Error::GitState` if `git init` fails.
pub fn init(dir: &Path, name: &str) -> Result<PathBuf> {
    if dir.join(PROJECT_FILE).exists() {
        return Err(Error::Conflict {
            kind: "Project",
            slug: dir.display().to_string(),
        });
    }

    fs::create_dir_all(dir.join("studies"))?;
    fs::create_dir_all(dir.join(".ox").join("metrics"))?;
    fs::create_dir_all(dir.join("entries"))?;

    let settings = ProjectConfig {
        project: ProjectSection {
            name: Some(name.to_string()),
        },
        tracker: TrackerConfig::default(),
    };
    fs::write(dir.join(PROJECT_FILE), serde_yaml::to_string(&settings)?)?;
    fs::write(dir.join("entries").join("train.yaml"), EXAMPLE_MANIFEST)?;
    fs::write(dir.join("entries").join("train.sh"), EXAMPLE_SCRIPT)?;

    let gitignore = dir.join(".gitignore");
    if !gitignore.exists() {
        fs::write(&gitignore, GITIGNORE)?;
    }

    if !dir.join(".git").exists() {
        Git::init_repository(dir)?;
    }
    info!(project = name, path = %dir.display(), "initialized project");
    Ok(dir.to_path_buf())
}

/// Directory `ox init <name>` creates under `parent`.
#[must_use]
pub fn project_dir(parent: &Path, name: &str) -> PathBuf {
    parent.join(slugify(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::ScriptEntry;
    use crate::entry::EntryPoint;
    use tempfile::TempDir;

    #[test]
    fn test_find_root_walks_up() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(PROJECT_FILE), "").unwrap();
        let nested = tmp.path().join("studies/a/experiments");
        fs::create_dir_all(&nested).unwrap();
        assert_eq!(find_root(&nested).unwrap(), tmp.path());
    }

    #[test]
    fn test_find_root_outside_project() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            find_root(tmp.path()),
            Err(Error::NotFound { kind: "Project", .. })
        ));
    }

    #[test]
    fn test_load_defaults_and_overrides() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(PROJECT_FILE), "").unwrap();
        let config = ProjectConfig::load(tmp.path()).unwrap();
        assert_eq!(config, ProjectConfig::default());

        fs::write(
            tmp.path().join(PROJECT_FILE),
            "project:\n  name: Vision\ntracker:\n  output_dir: logs\n",
        )
        .unwrap();
        let config = ProjectConfig::load(tmp.path()).unwrap();
        assert_eq!(config.display_name(tmp.path()), "Vision");
        assert_eq!(config.tracker.output_dir, Path::new("logs"));
    }

    #[test]
    fn test_settings_round_trip() {
        let settings = ProjectConfig {
            project: ProjectSection {
                name: Some("My: Project".to_string()),
            },
            tracker: TrackerConfig::default(),
        };
        let text = serde_yaml::to_string(&settings).unwrap();
        assert!(!text.contains("endpoint"));
        assert_eq!(serde_yaml::from_str::<ProjectConfig>(&text).unwrap(), settings);
    }

    #[test]
    fn test_example_manifest_is_valid() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("train.yaml");
        fs::write(&path, EXAMPLE_MANIFEST).unwrap();
        let entry = ScriptEntry::load(&path).unwrap();
        assert_eq!(entry.name(), "train");
        assert_eq!(entry.schema().fields().len(), 3);
    }

    #[test]
    fn test_project_dir_is_slugged() {
        assert_eq!(
            project_dir(Path::new("/work"), "My Project"),
            Path::new("/work/my-project")
        );
    }
}
