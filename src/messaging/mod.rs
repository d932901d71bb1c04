//! # Master/Worker IPC
//!
//! Typed messages and their newline-delimited JSON framing. The master writes
//! [`MasterMessage`]s to a worker's stdin and reads [`WorkerMessage`]s from
//! its stdout.

pub mod codec;
pub mod protocol;

pub use codec::{MessageReader, MessageWriter};
pub use protocol::{
    Ack, ChunkAssignment, MasterMessage, MigrationArgs, ProtocolMessage, WorkerMessage,
};
