//! Identifier types shared across the master, worker and protocol layers.

/// Opaque document identifier, as returned by the provider's selector query.
pub type DocumentId = String;

/// Index of a chunk within a job, in `[0, chunk_count)`.
pub type ChunkIndex = usize;

/// Master-assigned worker identifier. Stable for the lifetime of a job and
/// independent of the OS process id.
pub type WorkerId = u64;
