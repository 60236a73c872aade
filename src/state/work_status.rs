//! Work status definitions for tracking harvest progress
//!
//! Models and year variants move through these states exactly once per epoch.

use std::fmt;

/// Represents the processing status of a checkpointed unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkStatus {
    /// Discovered but not yet processed
    Pending,

    /// Processed successfully
    Done,

    /// Processing failed permanently (unparseable code, rejected price lookup)
    Error,
}

impl WorkStatus {
    /// Returns true if no further processing is needed
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Returns true if a row in this status may move to `next`
    ///
    /// Only `Pending -> Done` and `Pending -> Error` are allowed. Terminal rows
    /// are left alone until the whole epoch is cleared.
    pub fn can_transition_to(&self, next: WorkStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Done) | (Self::Pending, Self::Error)
        )
    }

    /// Converts the status to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Done => "done",
            Self::Error => "error",
        }
    }

    /// Parses a status from its database string representation
    ///
    /// Returns None if the string doesn't match any known status.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "done" => Some(Self::Done),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Returns all possible statuses
    pub fn all() -> [Self; 3] {
        [Self::Pending, Self::Done, Self::Error]
    }
}

impl fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
