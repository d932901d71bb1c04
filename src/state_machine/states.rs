use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a chunk, owned exclusively by the master.
///
/// `Waiting → Active → Complete`, with `Active → Waiting` reserved for
/// requeueing work held by a lost or timed-out worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChunkStatus {
    /// Partitioned and ready to be handed to a worker
    Waiting,
    /// Held by exactly one worker
    Active,
    /// Reported complete by the worker that held it
    Complete,
}

impl ChunkStatus {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete)
    }

    /// Check if a worker currently holds the chunk
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Check if the chunk can be handed out
    pub fn is_assignable(&self) -> bool {
        matches!(self, Self::Waiting)
    }
}

impl fmt::Display for ChunkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => write!(f, "WAITING"),
            Self::Active => write!(f, "ACTIVE"),
            Self::Complete => write!(f, "COMPLETE"),
        }
    }
}

impl std::str::FromStr for ChunkStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WAITING" => Ok(Self::Waiting),
            "ACTIVE" => Ok(Self::Active),
            "COMPLETE" => Ok(Self::Complete),
            _ => Err(format!("Invalid chunk status: {s}")),
        }
    }
}

impl Default for ChunkStatus {
    fn default() -> Self {
        Self::Waiting
    }
}
