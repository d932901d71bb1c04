use thiserror::Error;

use crate::types::{ChunkIndex, WorkerId};

/// Error types for chunk state machine operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateMachineError {
    #[error("Invalid transition for chunk {chunk}: {from} on {event}")]
    InvalidTransition {
        chunk: ChunkIndex,
        from: String,
        event: &'static str,
    },

    #[error("Guard condition failed for chunk {chunk}: {reason}")]
    GuardFailed { chunk: ChunkIndex, reason: String },

    #[error("Unknown chunk index {0}")]
    UnknownChunk(ChunkIndex),

    #[error("Worker {worker_id} already holds chunk {held}")]
    WorkerBusy { worker_id: WorkerId, held: ChunkIndex },
}

/// Result type alias for state machine operations
pub type StateMachineResult<T> = Result<T, StateMachineError>;

/// Helper function to create guard failures
pub fn guard_failed(chunk: ChunkIndex, reason: impl Into<String>) -> StateMachineError {
    StateMachineError::GuardFailed {
        chunk,
        reason: reason.into(),
    }
}
