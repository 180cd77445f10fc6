//! # ox-lab: Lightweight Experiment Tracking
//!
//! **Version**: 0.1.0
//!
//! ox-lab records research experiments on disk, next to the code that
//! produces them: studies group experiments, each experiment carries its git
//! SHA, status, tags and a snapshot of the config it ran with, and metrics
//! stream to an append-only JSONL log.
//!
//! ## Design Principles
//!
//! - **Explicit schemas**: config fields are declared once and drive CLI
//!   flags, validation and the JSON-schema document alike
//! - **Fail loudly**: invalid configs, slug collisions and disallowed status
//!   moves are errors, never silent coercions
//! - **Plain files**: every record is human-readable and atomically replaced
//!
//! ## Example Usage
//!
//! ```rust
//! use ox_lab::config::{resolve, ConfigSchema, FieldSpec, FlagSet};
//! use serde_json::Map;
//!
//! let schema = ConfigSchema::new(
//!     "train",
//!     vec![
//!         FieldSpec::float("lr").default(0.001).min(0.0),
//!         FieldSpec::int("epochs").default(10),
//!         FieldSpec::bool("debug").default(false),
//!     ],
//! )?;
//!
//! let overrides = FlagSet::from_schema(&schema)?.parse(["--lr", "0.01", "--debug"])?;
//! let config = resolve(&schema, &Map::new(), &overrides)?;
//!
//! assert!((config.f64("lr")? - 0.01).abs() < f64::EPSILON);
//! assert_eq!(config.i64("epochs")?, 10);
//! assert!(config.bool("debug")?);
//! # Ok::<(), ox_lab::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod cli;
pub mod config;
pub mod entry;
pub mod error;
pub mod experiment;
pub mod git;
pub mod project;
pub mod query;
pub mod run;
pub mod tracker;

pub use config::{Config, ConfigSchema, FieldSpec, FieldType};
pub use entry::{EntryPoint, EntryRegistry};
pub use error::{Error, Result};
pub use experiment::{Experiment, ExperimentStore, Status, Study};
pub use tracker::Tracker;
