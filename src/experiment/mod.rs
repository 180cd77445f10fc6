//! Experiment Tracking Records
//!
//! Studies group experiments; each experiment is one run attempt with a
//! lifecycle status, a git SHA and a config snapshot.
//!
//! ## Schema Overview
//!
//! ```text
//! Study (1) ──< Experiment (N)
//!                   │
//!                   ├── experiment.json   [metadata]
//!                   ├── config.yaml       [resolved config snapshot]
//!                   └── NOTES.md
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use ox_lab::experiment::{Experiment, Status};
//!
//! let experiment = Experiment::builder("lr-0-01", "lr-sweep")
//!     .tags(["baseline"])
//!     .build();
//!
//! assert_eq!(experiment.status(), Status::Created);
//! assert!(experiment.has_tag("baseline"));
//! ```

mod experiment_record;
mod slug;
mod status;
mod store;
mod study_record;

pub use experiment_record::{Experiment, ExperimentBuilder};
pub use slug::slugify;
pub use status::{Status, Transition};
pub use store::{ExperimentStore, RunStart};
pub use study_record::Study;
