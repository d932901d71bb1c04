use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::debug;

use super::{
    errors::{guard_failed, StateMachineError, StateMachineResult},
    events::ChunkEvent,
    states::ChunkStatus,
};
use crate::types::{ChunkIndex, WorkerId};

/// Per-chunk bookkeeping kept alongside the status
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkEntry {
    pub status: ChunkStatus,
    /// Worker currently holding the chunk (only while `Active`)
    pub holder: Option<WorkerId>,
    pub assigned_at: Option<Instant>,
    /// Number of times the chunk has been handed out
    pub assignments: u32,
    pub completed_by: Option<WorkerId>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerCounts {
    pub waiting: usize,
    pub active: usize,
    pub complete: usize,
}

/// Status of every chunk in a job, keyed by index
///
/// Iteration is in index order, which is what makes "lowest-index waiting
/// chunk first" a plain scan.
#[derive(Debug, Clone, Default)]
pub struct ChunkTracker {
    entries: BTreeMap<ChunkIndex, ChunkEntry>,
}

impl ChunkTracker {
    /// Create a tracker with every chunk in `Waiting`
    pub fn new(chunk_count: usize) -> Self {
        let entries = (0..chunk_count)
            .map(|index| (index, ChunkEntry::default()))
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn status(&self, index: ChunkIndex) -> Option<ChunkStatus> {
        self.entries.get(&index).map(|entry| entry.status)
    }

    pub fn entry(&self, index: ChunkIndex) -> Option<&ChunkEntry> {
        self.entries.get(&index)
    }

    /// Apply an event to a chunk, returning the new status
    pub fn transition(
        &mut self,
        index: ChunkIndex,
        event: ChunkEvent,
    ) -> StateMachineResult<ChunkStatus> {
        let current = self
            .entries
            .get(&index)
            .ok_or(StateMachineError::UnknownChunk(index))?
            .status;
        let target = Self::determine_target_state(index, current, &event)?;

        self.check_guards(index, &event)?;

        let entry = self
            .entries
            .get_mut(&index)
            .ok_or(StateMachineError::UnknownChunk(index))?;
        match &event {
            ChunkEvent::Assign { worker_id } => {
                entry.holder = Some(*worker_id);
                entry.assigned_at = Some(Instant::now());
                entry.assignments += 1;
            }
            ChunkEvent::Complete { worker_id } => {
                entry.holder = None;
                entry.assigned_at = None;
                entry.completed_by = Some(*worker_id);
            }
            ChunkEvent::Requeue { .. } => {
                entry.holder = None;
                entry.assigned_at = None;
            }
        }
        entry.status = target;

        debug!(
            chunk = index,
            event = event.event_type(),
            from = %current,
            to = %target,
            "Chunk transitioned"
        );

        Ok(target)
    }

    /// Determine the target state based on current state and event
    pub fn determine_target_state(
        index: ChunkIndex,
        current: ChunkStatus,
        event: &ChunkEvent,
    ) -> StateMachineResult<ChunkStatus> {
        let target = match (current, event) {
            (ChunkStatus::Waiting, ChunkEvent::Assign { .. }) => ChunkStatus::Active,
            (ChunkStatus::Active, ChunkEvent::Complete { .. }) => ChunkStatus::Complete,
            (ChunkStatus::Active, ChunkEvent::Requeue { .. }) => ChunkStatus::Waiting,
            (from, _) => {
                return Err(StateMachineError::InvalidTransition {
                    chunk: index,
                    from: from.to_string(),
                    event: event.event_type(),
                })
            }
        };

        Ok(target)
    }

    fn check_guards(&self, index: ChunkIndex, event: &ChunkEvent) -> StateMachineResult<()> {
        match event {
            // One chunk per worker at a time
            ChunkEvent::Assign { worker_id } => {
                if let Some(held) = self.active_for(*worker_id) {
                    return Err(StateMachineError::WorkerBusy {
                        worker_id: *worker_id,
                        held,
                    });
                }
            }
            // Only the holder may complete a chunk
            ChunkEvent::Complete { worker_id } => {
                let holder = self.entries.get(&index).and_then(|entry| entry.holder);
                if holder != Some(*worker_id) {
                    return Err(guard_failed(
                        index,
                        format!("worker {worker_id} reported completion but holder is {holder:?}"),
                    ));
                }
            }
            ChunkEvent::Requeue { .. } => {}
        }

        Ok(())
    }

    /// Lowest-index chunk still waiting for a worker
    pub fn next_waiting(&self) -> Option<ChunkIndex> {
        self.entries
            .iter()
            .find(|(_, entry)| entry.status.is_assignable())
            .map(|(index, _)| *index)
    }

    /// Chunk currently held by `worker_id`, if any
    pub fn active_for(&self, worker_id: WorkerId) -> Option<ChunkIndex> {
        self.entries
            .iter()
            .find(|(_, entry)| entry.status.is_active() && entry.holder == Some(worker_id))
            .map(|(index, _)| *index)
    }

    /// Active chunks assigned longer ago than `timeout`
    pub fn expired(&self, now: Instant, timeout: Duration) -> Vec<(ChunkIndex, WorkerId)> {
        self.entries
            .iter()
            .filter_map(|(index, entry)| match (entry.status, entry.holder, entry.assigned_at) {
                (ChunkStatus::Active, Some(holder), Some(assigned_at))
                    if now.saturating_duration_since(assigned_at) > timeout =>
                {
                    Some((*index, holder))
                }
                _ => None,
            })
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.entries.values().all(|entry| entry.status.is_terminal())
    }

    /// Chunks that have not reached `Complete`
    pub fn unfinished(&self) -> Vec<ChunkIndex> {
        self.entries
            .iter()
            .filter(|(_, entry)| !entry.status.is_terminal())
            .map(|(index, _)| *index)
            .collect()
    }

    pub fn assignment_count(&self, index: ChunkIndex) -> u32 {
        self.entries
            .get(&index)
            .map(|entry| entry.assignments)
            .unwrap_or(0)
    }

    pub fn counts(&self) -> TrackerCounts {
        self.entries
            .values()
            .fold(TrackerCounts::default(), |mut counts, entry| {
                match entry.status {
                    ChunkStatus::Waiting => counts.waiting += 1,
                    ChunkStatus::Active => counts.active += 1,
                    ChunkStatus::Complete => counts.complete += 1,
                }
                counts
            })
    }
}
