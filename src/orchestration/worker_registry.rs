//! Master-side record of every worker in a job.
//!
//! Owned by the master's event loop and mutated only from there, so it needs
//! no locking.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{DocshiftError, Result};
use crate::types::{ChunkIndex, WorkerId};

/// Lifecycle phase of a worker, from the master's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerPhase {
    /// Spawned; handshake not yet acknowledged
    Starting,
    /// Holding a chunk
    Busy,
    /// `STOP` sent, waiting for `PROCESS_FINISHED`
    Stopping,
    Finished,
    /// Exited unexpectedly or was terminated
    Lost,
}

impl WorkerPhase {
    /// Whether the worker can still be handed a chunk later on
    pub fn can_take_work(&self) -> bool {
        matches!(self, Self::Starting | Self::Busy)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Lost)
    }
}

impl fmt::Display for WorkerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Starting => "starting",
            Self::Busy => "busy",
            Self::Stopping => "stopping",
            Self::Finished => "finished",
            Self::Lost => "lost",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct WorkerHandle {
    pub id: WorkerId,
    /// OS pid, when the worker is a child process
    pub pid: Option<u32>,
    pub phase: WorkerPhase,
    pub args_acked: bool,
    pub transform_acked: bool,
    pub assigned_chunk: Option<ChunkIndex>,
    pub completed_chunks: Vec<ChunkIndex>,
    pub registered_at: DateTime<Utc>,
}

impl WorkerHandle {
    fn new(id: WorkerId, pid: Option<u32>) -> Self {
        Self {
            id,
            pid,
            phase: WorkerPhase::Starting,
            args_acked: false,
            transform_acked: false,
            assigned_chunk: None,
            completed_chunks: Vec::new(),
            registered_at: Utc::now(),
        }
    }

    pub fn handshake_complete(&self) -> bool {
        self.args_acked && self.transform_acked
    }

    pub fn assign(&mut self, chunk: ChunkIndex) {
        self.phase = WorkerPhase::Busy;
        self.assigned_chunk = Some(chunk);
    }

    /// Clear the assignment, returning the chunk that was held
    pub fn release(&mut self) -> Option<ChunkIndex> {
        self.assigned_chunk.take()
    }
}

#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: BTreeMap<WorkerId, WorkerHandle>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: WorkerId, pid: Option<u32>) -> Result<()> {
        if self.workers.contains_key(&id) {
            warn!(worker_id = id, "Attempted to register a worker twice");
            return Err(DocshiftError::precondition(format!(
                "worker {id} is already registered"
            )));
        }
        self.workers.insert(id, WorkerHandle::new(id, pid));
        debug!(worker_id = id, pid = pid, "Worker registered");
        Ok(())
    }

    pub fn get(&self, id: WorkerId) -> Result<&WorkerHandle> {
        self.workers
            .get(&id)
            .ok_or_else(|| DocshiftError::protocol(format!("message from unknown worker {id}")))
    }

    pub fn get_mut(&mut self, id: WorkerId) -> Result<&mut WorkerHandle> {
        self.workers
            .get_mut(&id)
            .ok_or_else(|| DocshiftError::protocol(format!("message from unknown worker {id}")))
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn ids(&self) -> Vec<WorkerId> {
        self.workers.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkerHandle> {
        self.workers.values()
    }

    /// Every worker has reached `Finished` or `Lost`
    pub fn all_terminal(&self) -> bool {
        self.workers.values().all(|w| w.phase.is_terminal())
    }

    /// Some worker may still pick up a waiting chunk
    pub fn any_can_take_work(&self) -> bool {
        self.workers.values().any(|w| w.phase.can_take_work())
    }

    pub fn lost(&self) -> Vec<WorkerId> {
        self.workers
            .values()
            .filter(|w| w.phase == WorkerPhase::Lost)
            .map(|w| w.id)
            .collect()
    }
}
