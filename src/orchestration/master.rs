//! # Master Core
//!
//! The master's decision logic, free of I/O. Every input (a worker message,
//! a disconnect, a timeout tick) goes in, and the messages to send come
//! back out as [`Directive`]s for the supervisor to deliver.
//!
//! Assignment policy: a worker that finishes its handshake, or reports a
//! completed chunk, receives the lowest-index `WAITING` chunk. When nothing
//! is waiting it receives `STOP`.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::worker_registry::{WorkerPhase, WorkerRegistry};
use crate::error::{DocshiftError, Result};
use crate::logging::{log_chunk_operation, log_worker_operation};
use crate::messaging::{Ack, ChunkAssignment, MasterMessage, MigrationArgs, WorkerMessage};
use crate::partition::Chunk;
use crate::state_machine::{ChunkEvent, ChunkTracker, StateMachineError};
use crate::types::{ChunkIndex, WorkerId};

/// An action the supervisor must carry out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Send(WorkerId, MasterMessage),
    /// Kill the worker; its chunk has already been requeued
    Terminate(WorkerId),
}

/// Summary of a finished job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub chunk_count: usize,
    pub document_count: usize,
    pub worker_count: usize,
    pub chunks_by_worker: BTreeMap<WorkerId, Vec<ChunkIndex>>,
    pub requeues: u32,
    pub lost_workers: Vec<WorkerId>,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

#[derive(Debug)]
pub struct MasterCore {
    chunks: Vec<Chunk>,
    tracker: ChunkTracker,
    registry: WorkerRegistry,
    args: MigrationArgs,
    transform_source: String,
    requeues: u32,
    started: Instant,
    started_at: DateTime<Utc>,
}

impl MasterCore {
    pub fn new(chunks: Vec<Chunk>, args: MigrationArgs, transform_source: String) -> Self {
        let tracker = ChunkTracker::new(chunks.len());
        Self {
            chunks,
            tracker,
            registry: WorkerRegistry::new(),
            args,
            transform_source,
            requeues: 0,
            started: Instant::now(),
            started_at: Utc::now(),
        }
    }

    pub fn tracker(&self) -> &ChunkTracker {
        &self.tracker
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    pub fn register_worker(&mut self, id: WorkerId, pid: Option<u32>) -> Result<()> {
        self.registry.register(id, pid)?;
        log_worker_operation("register", id, pid, "starting", None);
        Ok(())
    }

    /// The two configuration messages every worker receives first
    pub fn handshake(&self, id: WorkerId) -> Vec<Directive> {
        vec![
            Directive::Send(id, MasterMessage::ReceiveMigrationArgs(self.args.clone())),
            Directive::Send(
                id,
                MasterMessage::ReceiveTransform(self.transform_source.clone()),
            ),
        ]
    }

    /// React to a message from worker `id`
    pub fn handle(&mut self, id: WorkerId, message: WorkerMessage) -> Result<Vec<Directive>> {
        let phase = self.registry.get(id)?.phase;
        if phase == WorkerPhase::Lost {
            warn!(worker_id = id, ?message, "Ignoring message from a worker already written off");
            return Ok(Vec::new());
        }

        match message {
            WorkerMessage::AckMigrationArgs(ack) => self.on_ack(id, ack, "migration args"),
            WorkerMessage::AckTransform(ack) => self.on_ack(id, ack, "transform"),
            WorkerMessage::ChunkCompleted(index) => self.on_chunk_completed(id, index),
            WorkerMessage::ProcessFinished => {
                let handle = self.registry.get_mut(id)?;
                if handle.phase != WorkerPhase::Stopping {
                    return Err(DocshiftError::protocol(format!(
                        "worker {id} finished while {}",
                        handle.phase
                    )));
                }
                handle.phase = WorkerPhase::Finished;
                log_worker_operation("finish", id, handle.pid, "finished", None);
                Ok(Vec::new())
            }
        }
    }

    fn on_ack(&mut self, id: WorkerId, ack: Ack, step: &str) -> Result<Vec<Directive>> {
        if !ack.success {
            return Err(DocshiftError::HandshakeError {
                worker_id: id,
                reason: format!(
                    "{step} rejected: {}",
                    ack.error.as_deref().unwrap_or("no reason given")
                ),
            });
        }

        let handle = self.registry.get_mut(id)?;
        if handle.phase != WorkerPhase::Starting {
            return Err(DocshiftError::protocol(format!(
                "worker {id} acknowledged {step} while {}",
                handle.phase
            )));
        }
        let flag = if step == "transform" {
            &mut handle.transform_acked
        } else {
            &mut handle.args_acked
        };
        if *flag {
            return Err(DocshiftError::protocol(format!(
                "worker {id} acknowledged {step} twice"
            )));
        }
        *flag = true;
        debug!(worker_id = id, step, "Handshake step acknowledged");

        if handle.handshake_complete() {
            log_worker_operation("handshake", id, handle.pid, "ready", None);
            return Ok(vec![self.assign_next(id)?]);
        }
        Ok(Vec::new())
    }

    fn on_chunk_completed(&mut self, id: WorkerId, index: ChunkIndex) -> Result<Vec<Directive>> {
        let handle = self.registry.get_mut(id)?;
        if handle.assigned_chunk != Some(index) {
            return Err(DocshiftError::protocol(format!(
                "worker {id} reported chunk {index} but holds {:?}",
                handle.assigned_chunk
            )));
        }
        handle.release();
        handle.completed_chunks.push(index);

        self.tracker
            .transition(index, ChunkEvent::Complete { worker_id: id })
            .map_err(|e| match e {
                StateMachineError::GuardFailed { .. } => DocshiftError::protocol(e.to_string()),
                other => other.into(),
            })?;
        log_chunk_operation("complete", index, Some(id), "complete", None);

        let counts = self.tracker.counts();
        info!(
            complete = counts.complete,
            active = counts.active,
            waiting = counts.waiting,
            total = self.tracker.len(),
            "Chunk progress"
        );

        Ok(vec![self.assign_next(id)?])
    }

    /// Hand `id` the lowest waiting chunk, or tell it to stop
    fn assign_next(&mut self, id: WorkerId) -> Result<Directive> {
        let Some(index) = self.tracker.next_waiting() else {
            self.registry.get_mut(id)?.phase = WorkerPhase::Stopping;
            debug!(worker_id = id, "No chunks waiting; stopping worker");
            return Ok(Directive::Send(id, MasterMessage::Stop));
        };

        self.tracker
            .transition(index, ChunkEvent::Assign { worker_id: id })?;
        self.registry.get_mut(id)?.assign(index);
        log_chunk_operation("assign", index, Some(id), "active", None);

        let ids = self
            .chunks
            .get(index)
            .map(|chunk| chunk.ids.clone())
            .ok_or(StateMachineError::UnknownChunk(index))?;
        Ok(Directive::Send(
            id,
            MasterMessage::ReceiveChunk(ChunkAssignment { index, ids }),
        ))
    }

    /// A worker's channel closed
    ///
    /// Expected after `PROCESS_FINISHED`. Otherwise the worker is written off
    /// and its chunk goes back to `WAITING`.
    pub fn worker_disconnected(&mut self, id: WorkerId) -> Result<Vec<Directive>> {
        let handle = self.registry.get_mut(id)?;
        match handle.phase {
            WorkerPhase::Finished | WorkerPhase::Lost => return Ok(Vec::new()),
            _ => {}
        }

        let previous = handle.phase;
        handle.phase = WorkerPhase::Lost;
        let pid = handle.pid;
        let held = handle.release();
        warn!(worker_id = id, pid = pid, phase = %previous, held_chunk = ?held, "Worker exited unexpectedly");
        log_worker_operation("disconnect", id, pid, "lost", Some(&previous.to_string()));

        if let Some(index) = held {
            self.requeue(index, "worker exited")?;
        }
        self.ensure_progress(id)?;
        Ok(Vec::new())
    }

    /// Requeue chunks held longer than `timeout` and terminate their workers
    pub fn check_timeouts(&mut self, now: Instant, timeout: Duration) -> Result<Vec<Directive>> {
        let mut directives = Vec::new();
        for (index, worker_id) in self.tracker.expired(now, timeout) {
            let handle = self.registry.get_mut(worker_id)?;
            handle.release();
            handle.phase = WorkerPhase::Lost;
            warn!(
                chunk = index,
                worker_id,
                timeout_ms = timeout.as_millis() as u64,
                "Chunk timed out; terminating worker"
            );
            self.requeue(index, "chunk timed out")?;
            directives.push(Directive::Terminate(worker_id));
            self.ensure_progress(worker_id)?;
        }
        Ok(directives)
    }

    fn requeue(&mut self, index: ChunkIndex, reason: &str) -> Result<()> {
        self.tracker.transition(index, ChunkEvent::requeue(reason))?;
        self.requeues += 1;
        log_chunk_operation("requeue", index, None, "waiting", Some(reason));
        Ok(())
    }

    /// Fail when unfinished chunks remain but no worker can take them
    fn ensure_progress(&self, lost: WorkerId) -> Result<()> {
        if !self.tracker.is_complete() && !self.registry.any_can_take_work() {
            return Err(DocshiftError::WorkerLost {
                worker_id: lost,
                chunks: self.tracker.unfinished(),
            });
        }
        Ok(())
    }

    /// Every chunk is complete and every worker is done
    pub fn is_finished(&self) -> bool {
        self.tracker.is_complete() && self.registry.all_terminal()
    }

    pub fn report(&self) -> MigrationReport {
        MigrationReport {
            chunk_count: self.chunks.len(),
            document_count: self.chunks.iter().map(Chunk::len).sum(),
            worker_count: self.registry.len(),
            chunks_by_worker: self
                .registry
                .iter()
                .map(|w| (w.id, w.completed_chunks.clone()))
                .collect(),
            requeues: self.requeues,
            lost_workers: self.registry.lost(),
            started_at: self.started_at,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::partition;
    use crate::provider::ProviderConfig;
    use crate::state_machine::ChunkStatus;
    use std::path::PathBuf;

    fn core(ids: &[&str], chunk_size: usize, workers: &[WorkerId]) -> MasterCore {
        let chunks = partition(ids.iter().map(|s| s.to_string()).collect(), chunk_size).unwrap();
        let args = MigrationArgs {
            database_name: "db".into(),
            provider: ProviderConfig::Memory,
            ledger_dir: PathBuf::from("."),
        };
        let mut core = MasterCore::new(chunks, args, "[]".into());
        for id in workers {
            core.register_worker(*id, None).unwrap();
        }
        core
    }

    fn ready(core: &mut MasterCore, id: WorkerId) -> Vec<Directive> {
        assert!(core
            .handle(id, WorkerMessage::AckMigrationArgs(Ack::ok()))
            .unwrap()
            .is_empty());
        core.handle(id, WorkerMessage::AckTransform(Ack::ok())).unwrap()
    }

    fn assigned(directives: &[Directive]) -> Option<ChunkIndex> {
        match directives {
            [Directive::Send(_, MasterMessage::ReceiveChunk(a))] => Some(a.index),
            _ => None,
        }
    }

    #[test]
    fn test_handshake_sends_args_then_transform() {
        let core = core(&["a"], 1, &[1]);
        let directives = core.handshake(1);
        assert!(matches!(
            directives[0],
            Directive::Send(1, MasterMessage::ReceiveMigrationArgs(_))
        ));
        assert_eq!(
            directives[1],
            Directive::Send(1, MasterMessage::ReceiveTransform("[]".into()))
        );
    }

    #[test]
    fn test_single_worker_runs_every_chunk_in_order() {
        let mut core = core(&["1", "2", "3"], 2, &[1]);
        assert_eq!(assigned(&ready(&mut core, 1)), Some(0));

        let next = core.handle(1, WorkerMessage::ChunkCompleted(0)).unwrap();
        match &next[..] {
            [Directive::Send(1, MasterMessage::ReceiveChunk(a))] => {
                assert_eq!(a.index, 1);
                assert_eq!(a.ids, vec!["3".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }

        let stop = core.handle(1, WorkerMessage::ChunkCompleted(1)).unwrap();
        assert_eq!(stop, vec![Directive::Send(1, MasterMessage::Stop)]);
        assert!(!core.is_finished());

        core.handle(1, WorkerMessage::ProcessFinished).unwrap();
        assert!(core.is_finished());

        let report = core.report();
        assert_eq!(report.chunk_count, 2);
        assert_eq!(report.document_count, 3);
        assert_eq!(report.chunks_by_worker[&1], vec![0, 1]);
        assert_eq!(report.requeues, 0);
    }

    #[test]
    fn test_workers_get_distinct_chunks() {
        let mut core = core(&["1", "2", "3"], 1, &[1, 2, 3]);
        let a = assigned(&ready(&mut core, 2)).unwrap();
        let b = assigned(&ready(&mut core, 1)).unwrap();
        let c = assigned(&ready(&mut core, 3)).unwrap();
        assert_eq!((a, b, c), (0, 1, 2));
        assert_eq!(core.tracker().counts().active, 3);
    }

    #[test]
    fn test_extra_worker_is_stopped_after_handshake() {
        let mut core = core(&["1"], 1, &[1, 2]);
        assert_eq!(assigned(&ready(&mut core, 1)), Some(0));
        assert_eq!(
            ready(&mut core, 2),
            vec![Directive::Send(2, MasterMessage::Stop)]
        );
    }

    #[test]
    fn test_failed_ack_is_a_handshake_error() {
        let mut core = core(&["1"], 1, &[1]);
        let err = core
            .handle(1, WorkerMessage::AckTransform(Ack::failed("bad program")))
            .unwrap_err();
        match err {
            DocshiftError::HandshakeError { worker_id, reason } => {
                assert_eq!(worker_id, 1);
                assert!(reason.contains("bad program"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(core.tracker().status(0), Some(ChunkStatus::Waiting));
    }

    #[test]
    fn test_duplicate_ack_is_a_protocol_error() {
        let mut core = core(&["1"], 1, &[1]);
        core.handle(1, WorkerMessage::AckMigrationArgs(Ack::ok()))
            .unwrap();
        assert!(matches!(
            core.handle(1, WorkerMessage::AckMigrationArgs(Ack::ok()))
                .unwrap_err(),
            DocshiftError::ProtocolError(_)
        ));
    }

    #[test]
    fn test_completion_from_non_holder_is_fatal() {
        let mut core = core(&["1", "2"], 1, &[1, 2]);
        ready(&mut core, 1);
        ready(&mut core, 2);
        let err = core
            .handle(2, WorkerMessage::ChunkCompleted(0))
            .unwrap_err();
        assert!(matches!(err, DocshiftError::ProtocolError(_)));
        assert_eq!(core.tracker().status(0), Some(ChunkStatus::Active));
    }

    #[test]
    fn test_completed_chunk_is_never_reported_twice() {
        let mut core = core(&["1", "2"], 1, &[1]);
        ready(&mut core, 1);
        core.handle(1, WorkerMessage::ChunkCompleted(0)).unwrap();
        assert!(core.handle(1, WorkerMessage::ChunkCompleted(0)).is_err());
    }

    #[test]
    fn test_finish_without_stop_is_a_protocol_error() {
        let mut core = core(&["1"], 1, &[1]);
        ready(&mut core, 1);
        assert!(matches!(
            core.handle(1, WorkerMessage::ProcessFinished).unwrap_err(),
            DocshiftError::ProtocolError(_)
        ));
    }

    #[test]
    fn test_unknown_worker() {
        let mut core = core(&["1"], 1, &[1]);
        assert!(core.handle(7, WorkerMessage::ProcessFinished).is_err());
    }

    #[test]
    fn test_crash_requeues_chunk_for_next_completion() {
        let mut core = core(&["1", "2", "3"], 1, &[1, 2]);
        assert_eq!(assigned(&ready(&mut core, 1)), Some(0));
        assert_eq!(assigned(&ready(&mut core, 2)), Some(1));

        core.worker_disconnected(1).unwrap();
        assert_eq!(core.tracker().status(0), Some(ChunkStatus::Waiting));

        // Worker 2 picks the requeued chunk before chunk 2
        let next = core.handle(2, WorkerMessage::ChunkCompleted(1)).unwrap();
        assert_eq!(assigned(&next), Some(0));
        let next = core.handle(2, WorkerMessage::ChunkCompleted(0)).unwrap();
        assert_eq!(assigned(&next), Some(2));
        core.handle(2, WorkerMessage::ChunkCompleted(2)).unwrap();
        core.handle(2, WorkerMessage::ProcessFinished).unwrap();

        assert!(core.is_finished());
        let report = core.report();
        assert_eq!(report.requeues, 1);
        assert_eq!(report.lost_workers, vec![1]);
        assert_eq!(report.chunks_by_worker[&2], vec![1, 0, 2]);
    }

    #[test]
    fn test_crash_with_nobody_left_is_worker_lost() {
        let mut core = core(&["1", "2"], 1, &[1]);
        ready(&mut core, 1);
        match core.worker_disconnected(1).unwrap_err() {
            DocshiftError::WorkerLost { worker_id, chunks } => {
                assert_eq!(worker_id, 1);
                assert_eq!(chunks, vec![0, 1]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_disconnect_after_finish_is_normal() {
        let mut core = core(&["1"], 1, &[1]);
        ready(&mut core, 1);
        core.handle(1, WorkerMessage::ChunkCompleted(0)).unwrap();
        core.handle(1, WorkerMessage::ProcessFinished).unwrap();
        assert!(core.worker_disconnected(1).unwrap().is_empty());
        assert!(core.report().lost_workers.is_empty());
    }

    #[test]
    fn test_timeout_of_every_worker_is_worker_lost() {
        let mut core = core(&["1", "2"], 1, &[1, 2]);
        ready(&mut core, 1);
        ready(&mut core, 2);

        let later = Instant::now() + Duration::from_secs(60);
        let err = core.check_timeouts(later, Duration::from_secs(1)).unwrap_err();
        // Both workers expired at once: nobody is left to run the chunks
        assert!(matches!(err, DocshiftError::WorkerLost { .. }));
    }

    #[test]
    fn test_timeout_of_one_worker() {
        let mut core = core(&["1", "2", "3"], 1, &[1, 2]);
        ready(&mut core, 1);
        std::thread::sleep(Duration::from_millis(20));
        ready(&mut core, 2);

        let now = Instant::now();
        let directives = core
            .check_timeouts(now, Duration::from_millis(10))
            .unwrap();
        assert_eq!(directives, vec![Directive::Terminate(1)]);
        assert_eq!(core.tracker().status(0), Some(ChunkStatus::Waiting));

        // A late report from the terminated worker is ignored
        assert!(core
            .handle(1, WorkerMessage::ChunkCompleted(0))
            .unwrap()
            .is_empty());
        let next = core.handle(2, WorkerMessage::ChunkCompleted(1)).unwrap();
        assert_eq!(assigned(&next), Some(0));
    }
}
