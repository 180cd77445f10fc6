//! Experiment lifecycle status

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Lifecycle status of an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Record exists, never run.
    Created,
    /// An attempt is executing.
    Running,
    /// Last attempt returned normally.
    Completed,
    /// Last attempt raised a failure.
    Failed,
    /// Stopped by an external action.
    Cancelled,
}

impl Status {
    /// All statuses, in lifecycle order.
    pub const ALL: [Self; 5] = [
        Self::Created,
        Self::Running,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    /// Lowercase name as stored on disk.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether no attempt is in flight and none will follow without a retry.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Classify a move from `self` to `to`.
    ///
    /// Entering `running` from a terminal state, or from `running` itself
    /// (two attempts racing on one record), needs the explicit retry signal.
    #[must_use]
    pub const fn transition(self, to: Self, retry: bool) -> Transition {
        match (self, to) {
            (Self::Created, Self::Running) => Transition::Expected,
            (_, Self::Running) if retry => Transition::Expected,
            (_, Self::Running) => Transition::Forbidden,
            (Self::Running, Self::Completed | Self::Failed | Self::Cancelled)
            | (Self::Created, Self::Cancelled | Self::Created) => Transition::Expected,
            _ => Transition::OutOfOrder,
        }
    }
}

/// Outcome of [`Status::transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Normal lifecycle move.
    Expected,
    /// Accepted, but logged as a probable caller error.
    OutOfOrder,
    /// Rejected with `Error::InvalidTransition`.
    Forbidden,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                Error::Validation(format!(
                    "unknown status `{s}` (expected one of: created, running, completed, failed, cancelled)"
                ))
            })
    }
}
