//! # Worker Execution Engine
//!
//! A worker is driven entirely by the master's messages: a two-step
//! handshake installs the database connection and the transform, then each
//! `RECEIVE_CHUNK` runs the chunk pipeline and `STOP` ends the process.

pub mod context;
pub mod engine;
pub mod executor;
pub mod ledger;

pub use context::WorkerContext;
pub use engine::run_worker;
pub use executor::{execute_chunk, ChunkOutcome};
pub use ledger::{DiffLedger, LedgerEntry, LEDGER_SUFFIX};
