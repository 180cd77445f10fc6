//! Manifest-described external entry points
//!
//! ```yaml
//! name: train                 # optional, defaults to the file stem
//! command: [python3, train.py]
//! fields:
//!   - name: lr
//!     type: float
//!     default: 0.001
//!     min: 0
//!   - name: epochs
//!     type: int
//!     default: 10
//! ```
//!
//! The command runs in the manifest's directory with the resolved config in
//! `OX_CONFIG` (JSON) and the run id in `OX_RUN_ID`. Each stdout line shaped
//! like `{"metrics": {...}, "step": 3}` is forwarded to the tracker; other
//! lines pass through to our stdout.

use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::EntryPoint;
use crate::config::{Config, ConfigSchema, FieldSpec};
use crate::tracker::{Metrics, Tracker};
use crate::{Error, Result};

/// Environment variable carrying the resolved config as JSON.
pub const CONFIG_ENV: &str = "OX_CONFIG";
/// Environment variable carrying the tracker run id.
pub const RUN_ID_ENV: &str = "OX_RUN_ID";

/// On-disk manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Program and arguments
    pub command: Vec<String>,
    /// Config fields, in flag order
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

/// [`EntryPoint`] running an external command.
#[derive(Debug, Clone)]
pub struct ScriptEntry {
    name: String,
    schema: ConfigSchema,
    command: Vec<String>,
    workdir: PathBuf,
}

impl ScriptEntry {
    /// Load a manifest file.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the file cannot be read, `Error::Serialization`
    /// on malformed YAML, `Error::Validation` on an empty command and
    /// `Error::Schema` on an invalid field list.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let manifest: Manifest = serde_yaml::from_str(&raw)?;
        let workdir = path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("entry")
            .to_string();
        debug!(path = %path.display(), "loaded entry manifest");
        Self::from_manifest(manifest, stem, workdir)
    }

    /// Build from a parsed manifest.
    ///
    /// # Errors
    ///
    /// Same as [`ScriptEntry::load`], minus I/O and parsing.
    pub fn from_manifest(manifest: Manifest, default_name: String, workdir: PathBuf) -> Result<Self> {
        if manifest.command.is_empty() {
            return Err(Error::Validation(format!(
                "entry manifest `{default_name}` has an empty command"
            )));
        }
        let name = manifest.name.unwrap_or(default_name);
        let schema = ConfigSchema::new(name.clone(), manifest.fields)?;
        Ok(Self {
            name,
            schema,
            command: manifest.command,
            workdir,
        })
    }

    fn program(&self) -> PathBuf {
        let program = Path::new(&self.command[0]);
        if program.is_relative() && program.components().count() > 1 {
            self.workdir.join(program)
        } else {
            program.to_path_buf()
        }
    }
}

impl EntryPoint for ScriptEntry {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> &ConfigSchema {
        &self.schema
    }

    fn run(&self, config: &Config, tracker: &mut dyn Tracker) -> anyhow::Result<()> {
        let program = self.program();
        let config_json = serde_json::to_string(config)?;

        let mut child = Command::new(&program)
            .args(&self.command[1..])
            .current_dir(&self.workdir)
            .env(CONFIG_ENV, config_json)
            .env(RUN_ID_ENV, tracker.run_id())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("failed to start `{}`", program.display()))?;
        info!(entry = self.name, pid = child.id(), "started entry process");

        let stdout = child
            .stdout
            .take()
            .context("child stdout was not captured")?;
        if let Err(err) = forward_output(stdout, tracker) {
            if let Err(kill) = child.kill().and_then(|()| child.wait().map(drop)) {
                debug!(entry = self.name, error = %kill, "could not stop entry process");
            }
            return Err(err);
        }

        let status = child.wait().context("failed to wait for entry process")?;
        if !status.success() {
            bail!("`{}` exited with {status}", self.command.join(" "));
        }
        Ok(())
    }
}

/// Route metrics lines to `tracker` and echo everything else. Output that is
/// not UTF-8 is echoed lossily.
fn forward_output(stdout: impl Read, tracker: &mut dyn Tracker) -> anyhow::Result<()> {
    let mut reader = BufReader::new(stdout);
    let mut echo = std::io::stdout().lock();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .context("failed to read entry output")?;
        if read == 0 {
            return Ok(());
        }
        let text = String::from_utf8_lossy(&buf);
        let line = text.trim_end_matches(|c: char| c == '\n' || c == '\r');
        match parse_metrics_line(line) {
            Some((metrics, step)) => tracker.log(&metrics, step)?,
            None => writeln!(echo, "{line}")?,
        }
    }
}

/// Recognize a `{"metrics": {...}, "step": n}` line.
fn parse_metrics_line(line: &str) -> Option<(Metrics, Option<u64>)> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    let Value::Object(mut object) = serde_json::from_str(trimmed).ok()? else {
        return None;
    };
    let Value::Object(metrics) = object.remove("metrics")? else {
        return None;
    };
    let step = match object.remove("step") {
        None | Some(Value::Null) => None,
        Some(value) => Some(value.as_u64()?),
    };
    Some((metrics, step))
}
