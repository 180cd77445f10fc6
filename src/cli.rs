//! `ox` command-line interface
//!
//! Commands write to a caller-supplied writer so they can be driven from
//! tests; [`main_with`] wires them to stdout/stderr and the process exit code.

use std::collections::BTreeMap;
use std::env;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::entry::EntryRegistry;
use crate::experiment::{slugify, Experiment, ExperimentStore, Status};
use crate::project::{self, ProjectConfig};
use crate::query::query_experiments;
use crate::run::{command_line, RunRequest, Runner};
use crate::Error;

/// Lightweight experiment management for AI research
#[derive(Parser, Debug)]
#[command(name = "ox", version, about, long_about = None)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug); RUST_LOG takes precedence
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Command to run; without one, prints a project summary
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Top-level commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Scaffold a new project (in ./<name>, or here when no name is given)
    Init {
        /// Project name
        name: Option<String>,
    },
    /// Create a study or an experiment
    #[command(subcommand)]
    New(NewCommand),
    /// Run an entry point, optionally tracked as an experiment
    ///
    /// Config overrides follow `--`, e.g. `ox run train -- --lr 0.01`.
    Run {
        /// Registered entry point name or path to an entry manifest
        entry: String,
        /// YAML config file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Experiment to track
        #[arg(long)]
        experiment: Option<String>,
        /// Re-run an experiment that already finished (or is stuck running)
        #[arg(long)]
        retry: bool,
        /// Schema-derived config flags
        #[arg(last = true)]
        overrides: Vec<String>,
    },
    /// List experiments
    Ls {
        /// Only experiments in this study
        #[arg(long)]
        study: Option<String>,
        /// Only experiments with this status
        #[arg(long)]
        status: Option<Status>,
        /// Only experiments carrying this tag
        #[arg(long)]
        tag: Option<String>,
    },
    /// Filter experiments with a SQL WHERE clause over metadata and config columns
    Query {
        /// Expression, e.g. "lr < 0.05 AND status = 'completed' ORDER BY lr"
        expression: String,
    },
    /// Show one experiment
    Show {
        /// Experiment slug
        id: String,
    },
    /// Show running experiments, or the status of one
    Status {
        /// Experiment slug
        id: Option<String>,
    },
    /// Print the JSON schema of an entry point's config
    ConfigSchema {
        /// Registered entry point name or path to an entry manifest
        entry: String,
    },
    /// Mark an experiment as cancelled
    Cancel {
        /// Experiment slug
        id: String,
    },
}

/// `ox new` subcommands.
#[derive(Subcommand, Debug)]
pub enum NewCommand {
    /// Create a study
    Study {
        /// Display name
        name: String,
    },
    /// Create an experiment in a study
    Experiment {
        /// Study slug or name
        study: String,
        /// Experiment name
        name: String,
        /// Tags (repeatable)
        #[arg(short, long = "tag")]
        tags: Vec<String>,
    },
}

/// Parse the process arguments, run the command and map the result to an
/// exit code. Errors are printed to stderr as `Error: <message>`.
#[must_use]
pub fn main_with(registry: &EntryRegistry) -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = env::current_dir()
        .context("cannot determine the working directory")
        .and_then(|cwd| execute(cli, &cwd, registry, &mut io::stdout().lock()));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

/// Run one parsed command from `cwd`.
///
/// # Errors
///
/// Any library error, or a failed write to `out`.
pub fn execute<W: Write>(
    cli: Cli,
    cwd: &Path,
    registry: &EntryRegistry,
    out: &mut W,
) -> anyhow::Result<()> {
    let Some(command) = cli.command else {
        return summary(cwd, out);
    };

    match command {
        Command::Init { name } => init(cwd, name.as_deref(), out),
        Command::New(NewCommand::Study { name }) => {
            let root = project::find_root(cwd)?;
            let study = ExperimentStore::open(&root).create_study(&name)?;
            writeln!(out, "Created study: {}", study.slug())?;
            writeln!(
                out,
                "  Edit studies/{}/README.md to add goals and hypotheses",
                study.slug()
            )?;
            Ok(())
        }
        Command::New(NewCommand::Experiment { study, name, tags }) => {
            let root = project::find_root(cwd)?;
            let store = ExperimentStore::open(&root);
            let experiment = store.create_experiment(&study, &name, &tags)?;
            let config = store.config_path(experiment.slug())?;
            writeln!(out, "Created experiment: {}/{}", experiment.study(), experiment.slug())?;
            writeln!(out, "  Edit config: {}", relative(&root, &config).display())?;
            Ok(())
        }
        Command::Run {
            entry,
            config,
            experiment,
            retry,
            overrides,
        } => run(
            cwd,
            registry,
            &entry,
            config.as_deref(),
            experiment.as_deref(),
            retry,
            &overrides,
            out,
        ),
        Command::Ls { study, status, tag } => {
            let root = project::find_root(cwd)?;
            let study = study.as_deref().map(slugify);
            let experiments: Vec<_> = ExperimentStore::open(&root)
                .list()?
                .into_iter()
                .filter(|e| study.as_deref().map_or(true, |s| e.study() == s))
                .filter(|e| status.map_or(true, |s| e.status() == s))
                .filter(|e| tag.as_deref().map_or(true, |t| e.has_tag(t)))
                .collect();
            if experiments.is_empty() {
                writeln!(out, "No experiments found.")?;
            } else {
                print_table(out, &experiments)?;
            }
            Ok(())
        }
        Command::Query { expression } => {
            let root = project::find_root(cwd)?;
            let experiments = ExperimentStore::open(&root).list()?;
            let result = query_experiments(&experiments, &expression)?;
            if result.is_empty() {
                writeln!(out, "No matching experiments.")?;
            }
            for row in result.rows() {
                writeln!(out, "{}", serde_json::to_string_pretty(&row)?)?;
            }
            Ok(())
        }
        Command::Show { id } => show(cwd, &id, out),
        Command::Status { id } => {
            let root = project::find_root(cwd)?;
            let store = ExperimentStore::open(&root);
            if let Some(id) = id {
                let exp = store.load(&id)?;
                writeln!(out, "Experiment: {}", exp.slug())?;
                writeln!(out, "Status:     {}", exp.status())?;
                writeln!(out, "Updated:    {}", exp.updated_at().to_rfc3339())?;
                if let Some(command) = exp.command() {
                    writeln!(out, "Command:    {command}")?;
                }
                return Ok(());
            }
            let running: Vec<_> = store
                .list()?
                .into_iter()
                .filter(|e| e.status() == Status::Running)
                .collect();
            if running.is_empty() {
                writeln!(out, "No experiments currently running.")?;
            } else {
                print_table(out, &running)?;
            }
            Ok(())
        }
        Command::ConfigSchema { entry } => {
            let entry = registry.discover(&entry, cwd)?;
            let schema = entry.schema().json_schema()?;
            writeln!(out, "{}", serde_json::to_string_pretty(&schema)?)?;
            Ok(())
        }
        Command::Cancel { id } => {
            let root = project::find_root(cwd)?;
            let exp = ExperimentStore::open(&root).update_status(&id, Status::Cancelled, false)?;
            writeln!(out, "Cancelled experiment: {}", exp.slug())?;
            Ok(())
        }
    }
}

fn summary<W: Write>(cwd: &Path, out: &mut W) -> anyhow::Result<()> {
    let root = match project::find_root(cwd) {
        Ok(root) => root,
        Err(Error::NotFound { .. }) => {
            writeln!(out, "ox - lightweight experiment management for AI research")?;
            writeln!(out)?;
            writeln!(out, "Not inside an ox project. Run 'ox init <name>' to create one.")?;
            writeln!(out, "Run 'ox --help' for all commands.")?;
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let settings = ProjectConfig::load(&root)?;
    let store = ExperimentStore::open(&root);
    let studies = store.studies()?;
    let experiments = store.list()?;

    let mut by_status: BTreeMap<&str, usize> = BTreeMap::new();
    for exp in &experiments {
        *by_status.entry(exp.status().as_str()).or_default() += 1;
    }

    writeln!(out, "ox - {}", settings.display_name(&root))?;
    writeln!(out, "  root: {}", root.display())?;
    writeln!(out, "  studies: {}", studies.len())?;
    writeln!(out, "  experiments: {}", experiments.len())?;
    if by_status.is_empty() {
        writeln!(out)?;
        writeln!(out, "No experiments yet. Get started:")?;
        writeln!(out, "  ox new study \"my study\"")?;
        writeln!(out, "  ox new experiment my-study baseline")?;
    } else {
        let counts: Vec<_> = by_status
            .iter()
            .map(|(status, n)| format!("{n} {status}"))
            .collect();
        writeln!(out, "  ({})", counts.join(", "))?;
    }
    Ok(())
}

fn init<W: Write>(cwd: &Path, name: Option<&str>, out: &mut W) -> anyhow::Result<()> {
    let (dir, name) = match name {
        Some(name) => {
            let dir = project::project_dir(cwd, name);
            if dir.exists() {
                return Err(Error::Conflict {
                    kind: "Directory",
                    slug: dir.display().to_string(),
                }
                .into());
            }
            (dir, name.to_string())
        }
        None => {
            let name = cwd
                .file_name()
                .map_or_else(|| "project".to_string(), |n| n.to_string_lossy().into_owned());
            (cwd.to_path_buf(), name)
        }
    };

    let dir = project::init(&dir, &name)?;
    writeln!(out, "Project created at {}", dir.display())?;
    writeln!(out, "  Example entry point: entries/train.yaml")?;
    writeln!(out, "  ox new study \"my study\" && ox new experiment my-study baseline")?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run<W: Write>(
    cwd: &Path,
    registry: &EntryRegistry,
    entry_spec: &str,
    config: Option<&Path>,
    experiment: Option<&str>,
    retry: bool,
    overrides: &[String],
    out: &mut W,
) -> anyhow::Result<()> {
    let entry = registry.discover(entry_spec, cwd)?;

    let root = match project::find_root(cwd) {
        Ok(root) => Some(root),
        Err(Error::NotFound { .. }) => {
            warn!("not inside an ox project (no ox.yaml found); using default tracker settings");
            None
        }
        Err(e) => return Err(e.into()),
    };
    let settings = match &root {
        Some(root) => ProjectConfig::load(root)?,
        None => ProjectConfig::default(),
    };
    let store = root.as_deref().map(ExperimentStore::open);

    let config_path = config.map(|p| cwd.join(p));
    let command = command_line(entry_spec, config, experiment, retry, overrides);
    let tracker_root = root.as_deref().unwrap_or(cwd);

    let mut runner = Runner::new(tracker_root, &settings.tracker);
    if let Some(store) = &store {
        runner = runner.with_store(store);
    }
    let outcome = runner.run(&RunRequest {
        entry: entry.as_ref(),
        config_path: config_path.as_deref(),
        overrides,
        experiment,
        retry,
        command: &command,
    })?;

    writeln!(out, "Run completed successfully. (run id: {})", outcome.run_id)?;
    Ok(())
}

fn show<W: Write>(cwd: &Path, id: &str, out: &mut W) -> anyhow::Result<()> {
    let root = project::find_root(cwd)?;
    let store = ExperimentStore::open(&root);
    let exp = store.load(id)?;

    writeln!(out, "Experiment: {}", exp.slug())?;
    writeln!(out, "Study:      {}", exp.study())?;
    writeln!(out, "Status:     {}", exp.status())?;
    writeln!(out, "Created:    {}", exp.created_at().to_rfc3339())?;
    writeln!(out, "Updated:    {}", exp.updated_at().to_rfc3339())?;
    if let Some(sha) = exp.git_sha() {
        writeln!(out, "Git SHA:    {sha}")?;
    }
    if let Some(command) = exp.command() {
        writeln!(out, "Command:    {command}")?;
    }
    if !exp.tags().is_empty() {
        writeln!(out, "Tags:       {}", exp.tags().join(", "))?;
    }
    if let Some(run_id) = exp.tracker_run_id() {
        writeln!(out, "Tracker ID: {run_id}")?;
    }

    if !exp.config().is_empty() {
        writeln!(out, "\nConfig:")?;
        for (key, value) in exp.config().iter() {
            writeln!(out, "  {key}: {value}")?;
        }
    }

    if let Some(notes) = store.notes(id)? {
        let path = store.experiment_path(id)?.join("NOTES.md");
        writeln!(out, "\nNotes ({}):", relative(&root, &path).display())?;
        writeln!(out, "{notes}")?;
    }
    Ok(())
}

fn print_table<W: Write>(out: &mut W, experiments: &[Experiment]) -> io::Result<()> {
    let headers = ["ID", "Study", "Status", "Tags", "Updated"];
    let rows: Vec<[String; 5]> = experiments
        .iter()
        .map(|e| {
            [
                e.slug().to_string(),
                e.study().to_string(),
                e.status().to_string(),
                e.tags().join(", "),
                e.updated_at().format("%Y-%m-%dT%H:%M:%S").to_string(),
            ]
        })
        .collect();

    let mut widths = headers.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    writeln!(out, "{}", render_row(&headers, &widths))?;
    writeln!(out, "{}", widths.map(|w| "-".repeat(w)).join("  "))?;
    for row in &rows {
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        writeln!(out, "{}", render_row(&cells, &widths))?;
    }
    Ok(())
}

fn render_row(cells: &[&str], widths: &[usize]) -> String {
    cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{cell:<width$}"))
        .collect::<Vec<_>>()
        .join("  ")
        .trim_end()
        .to_string()
}

fn relative(root: &Path, path: &Path) -> PathBuf {
    path.strip_prefix(root).unwrap_or(path).to_path_buf()
}
