// Chunk state machine for the migration master.
//
// The tracker is owned by the master's event loop and mutated from a single
// logical thread, so it carries no internal locking.

pub mod chunk_tracker;
pub mod errors;
pub mod events;
pub mod states;

pub use chunk_tracker::{ChunkEntry, ChunkTracker, TrackerCounts};
pub use errors::{StateMachineError, StateMachineResult};
pub use events::ChunkEvent;
pub use states::ChunkStatus;
