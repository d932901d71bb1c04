use serde::{Deserialize, Serialize};

use crate::types::WorkerId;

/// Events that drive chunk state transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ChunkEvent {
    /// Hand the chunk to a worker
    Assign { worker_id: WorkerId },
    /// The holding worker reported completion
    Complete { worker_id: WorkerId },
    /// Take the chunk back from its holder (worker lost or timed out)
    Requeue { reason: String },
}

impl ChunkEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Assign { .. } => "assign",
            Self::Complete { .. } => "complete",
            Self::Requeue { .. } => "requeue",
        }
    }

    pub fn requeue(reason: impl Into<String>) -> Self {
        Self::Requeue {
            reason: reason.into(),
        }
    }
}
