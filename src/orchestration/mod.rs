//! # Master Orchestration
//!
//! - [`master`]: the pure decision core (chunk assignment, handshake,
//!   completion, crash and timeout handling)
//! - [`worker_registry`]: the master's view of each worker
//! - [`supervisor`]: spawning workers and running the event loop
//! - [`job`]: id discovery and partitioning ahead of a run

pub mod job;
pub mod master;
pub mod supervisor;
pub mod worker_registry;

pub use job::{run_migration, MigrationJob};
pub use master::{Directive, MasterCore, MigrationReport};
pub use supervisor::{
    supervise, InProcessSpawner, ProcessSpawner, SpawnedWorker, SupervisorSettings,
    WorkerControl, WorkerSpawner,
};
pub use worker_registry::{WorkerHandle, WorkerPhase, WorkerRegistry};
