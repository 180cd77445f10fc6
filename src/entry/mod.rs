//! Entry points
//!
//! An entry point pairs a [`ConfigSchema`] with a callable taking the
//! resolved [`Config`] and a [`Tracker`]. Entry points are either registered
//! in-process (library users build their own `ox` binary around
//! [`crate::cli::main_with`]) or described by a YAML manifest and executed
//! as a child process (see [`ScriptEntry`]).

mod script;

pub use script::{Manifest, ScriptEntry};

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::config::{Config, ConfigSchema};
use crate::tracker::Tracker;
use crate::{Error, Result};

/// A runnable unit with a declared config schema.
pub trait EntryPoint: Send + Sync {
    /// Name used on the command line and in error messages.
    fn name(&self) -> &str;

    /// Declared config fields.
    fn schema(&self) -> &ConfigSchema;

    /// Execute with a resolved config, logging metrics to `tracker`.
    ///
    /// # Errors
    ///
    /// Any error fails the run; its full cause chain is preserved.
    fn run(&self, config: &Config, tracker: &mut dyn Tracker) -> anyhow::Result<()>;
}

type EntryFn = dyn Fn(&Config, &mut dyn Tracker) -> anyhow::Result<()> + Send + Sync;

/// [`EntryPoint`] backed by a closure.
pub struct FnEntry {
    name: String,
    schema: ConfigSchema,
    func: Box<EntryFn>,
}

impl FnEntry {
    /// Wrap a closure.
    pub fn new<F>(name: impl Into<String>, schema: ConfigSchema, func: F) -> Self
    where
        F: Fn(&Config, &mut dyn Tracker) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            schema,
            func: Box::new(func),
        }
    }
}

impl fmt::Debug for FnEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnEntry")
            .field("name", &self.name)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

impl EntryPoint for FnEntry {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> &ConfigSchema {
        &self.schema
    }

    fn run(&self, config: &Config, tracker: &mut dyn Tracker) -> anyhow::Result<()> {
        (self.func)(config, tracker)
    }
}

/// Named entry points available to `ox run` and `ox config-schema`.
#[derive(Clone, Default)]
pub struct EntryRegistry {
    entries: BTreeMap<String, Arc<dyn EntryPoint>>,
}

impl fmt::Debug for EntryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

impl EntryRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entry point under its own name.
    ///
    /// # Errors
    ///
    /// Returns `Error::Conflict` if the name is already registered.
    pub fn register(&mut self, entry: impl EntryPoint + 'static) -> Result<()> {
        let name = entry.name().to_string();
        if self.entries.contains_key(&name) {
            return Err(Error::Conflict {
                kind: "Entry point",
                slug: name,
            });
        }
        self.entries.insert(name, Arc::new(entry));
        Ok(())
    }

    /// Register a closure.
    ///
    /// # Errors
    ///
    /// Returns `Error::Conflict` if the name is already registered.
    pub fn register_fn<F>(&mut self, name: &str, schema: ConfigSchema, func: F) -> Result<()>
    where
        F: Fn(&Config, &mut dyn Tracker) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(FnEntry::new(name, schema, func))
    }

    /// Registered entry point by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn EntryPoint>> {
        self.entries.get(name).cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Resolve `spec` to an entry point: a registered name first, otherwise a
    /// manifest path relative to `cwd`.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if `spec` is neither, plus any manifest
    /// loading error.
    pub fn discover(&self, spec: &str, cwd: &Path) -> Result<Arc<dyn EntryPoint>> {
        if let Some(entry) = self.get(spec) {
            debug!(entry = spec, "using registered entry point");
            return Ok(entry);
        }

        let path = cwd.join(spec);
        if path.is_file() {
            return Ok(Arc::new(ScriptEntry::load(&path)?));
        }

        let registered: Vec<_> = self.names().collect();
        let hint = if registered.is_empty() {
            "no entry points are registered and no manifest exists at that path".to_string()
        } else {
            format!("registered entry points: {}", registered.join(", "))
        };
        Err(Error::not_found("Entry point", format!("{spec} ({hint})")))
    }
}
