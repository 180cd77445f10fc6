//! Error types for ox-lab
//!
//! Every failure is surfaced to the invoking command unchanged; nothing in the
//! core retries or recovers silently.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// ox-lab error types
#[derive(Error, Debug)]
pub enum Error {
    /// Config values do not satisfy the schema
    #[error("Validation error: {0}")]
    Validation(String),

    /// Schema cannot be represented as CLI flags / schema document
    #[error("Schema error: {0}")]
    Schema(String),

    /// Slug collision on creation
    #[error("{kind} already exists: {slug}")]
    Conflict {
        /// Record kind ("Study", "Experiment")
        kind: &'static str,
        /// Colliding slug
        slug: String,
    },

    /// Unknown identifier
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Record kind ("Study", "Experiment", "Entry point", ...)
        kind: &'static str,
        /// Requested identifier
        id: String,
    },

    /// Duplicate slug detected while loading
    #[error("Experiment slug `{slug}` is ambiguous: found in studies {}", studies.join(", "))]
    Ambiguity {
        /// Duplicated slug
        slug: String,
        /// Studies holding the slug
        studies: Vec<String>,
    },

    /// Disallowed status move
    #[error("Invalid transition for `{slug}`: {from} -> {to}\nRe-run with --retry to start a new attempt")]
    InvalidTransition {
        /// Experiment slug
        slug: String,
        /// Current status
        from: String,
        /// Requested status
        to: String,
    },

    /// Malformed or type-inconsistent filter expression
    #[error("Query error: {0}")]
    Query(String),

    /// Version-control inspection failed
    #[error("Git state error: {0}")]
    GitState(String),

    /// The entry point's callable failed
    #[error("Entry point `{entry}` failed: {message}")]
    EntryFailed {
        /// Entry point name
        entry: String,
        /// Failure detail, including its cause chain
        message: String,
    },

    /// Metric tracker backend failure
    #[error("Tracker error: {0}")]
    Tracker(String),

    /// JSON / YAML encoding or decoding failure
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
