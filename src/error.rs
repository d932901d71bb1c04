//! Error types for docshift.
//!
//! Every fatal condition in a migration run surfaces as a [`DocshiftError`].
//! Per-document write failures are not errors at this level: they are logged
//! by the worker and the chunk still completes.

use thiserror::Error;

use crate::diff::PatchError;
use crate::provider::ProviderError;
use crate::state_machine::StateMachineError;

#[derive(Debug, Error)]
pub enum DocshiftError {
    /// Missing or invalid script, configuration or environment.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// The selector matched zero documents.
    #[error("No documents were found using the provided selector")]
    NoMatchingDocuments,

    /// Unrecognized or malformed IPC message.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// A worker received work before its handshake completed, or a handshake
    /// step was repeated.
    #[error("Precondition error: {0}")]
    PreconditionError(String),

    /// A worker acknowledged a handshake step with `success: false`.
    #[error("Handshake with worker {worker_id} failed: {reason}")]
    HandshakeError { worker_id: u64, reason: String },

    #[error("Provider error: {0}")]
    ProviderError(#[from] ProviderError),

    /// A transform program failed to compile or to apply to a document.
    #[error("Transform error: {0}")]
    TransformError(String),

    #[error("Patch error: {0}")]
    PatchError(#[from] PatchError),

    #[error("Diff ledger error: {0}")]
    LedgerError(String),

    #[error("State machine error: {0}")]
    StateMachineError(#[from] StateMachineError),

    /// A worker disappeared and nothing is left to pick up its chunk.
    #[error("Worker {worker_id} was lost; unfinished chunks: {chunks:?}")]
    WorkerLost { worker_id: u64, chunks: Vec<usize> },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DocshiftError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::ConfigurationError(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::ProtocolError(msg.into())
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::PreconditionError(msg.into())
    }

    pub fn transform(msg: impl Into<String>) -> Self {
        Self::TransformError(msg.into())
    }
}

impl From<config::ConfigError> for DocshiftError {
    fn from(err: config::ConfigError) -> Self {
        DocshiftError::ConfigurationError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DocshiftError>;
