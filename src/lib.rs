#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # docshift
//!
//! Chunked, multi-process document migrations with a rollback ledger.
//!
//! ## Overview
//!
//! A master process finds every document matching a selector, splits the
//! sorted ids into fixed-size chunks and hands them out one at a time to a
//! pool of worker processes. Each worker fetches its chunk, applies a
//! declarative transform to every document, records a reversible diff per
//! document in a ledger file, and writes the documents back.
//!
//! ## Module Organization
//!
//! - [`partition`] - Splitting the id list into chunks
//! - [`state_machine`] - Chunk lifecycle (`WAITING → ACTIVE → COMPLETE`)
//! - [`messaging`] - Master/worker IPC protocol and framing
//! - [`orchestration`] - Master core, worker registry and supervisor
//! - [`worker`] - Worker handshake and chunk pipeline
//! - [`transform`] - Declarative transforms and migration scripts
//! - [`diff`] - Invertible JSON patches
//! - [`provider`] - Document storage contract and reference stores
//! - [`config`] - Layered configuration
//! - [`logging`] - Structured logging setup
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use docshift::config::MigrationConfig;
//! use docshift::orchestration::{run_migration, MigrationJob, ProcessSpawner};
//! use docshift::provider::DefaultConnector;
//! use docshift::transform::load_script;
//!
//! # async fn example() -> docshift::Result<()> {
//! let mut config = MigrationConfig::load(None)?;
//! config.database_name = Some("orders".to_string());
//!
//! let script = load_script(&config.script_path)?;
//! let job = MigrationJob::from_config(&config, script)?;
//! let report = run_migration(&job, &DefaultConnector, &ProcessSpawner::current_exe()?).await?;
//! println!("migrated {} documents", report.document_count);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod diff;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod orchestration;
pub mod partition;
pub mod provider;
pub mod state_machine;
pub mod transform;
pub mod types;
pub mod worker;

pub use config::MigrationConfig;
pub use error::{DocshiftError, Result};
pub use orchestration::{run_migration, MigrationJob, MigrationReport};
pub use partition::{partition, Chunk};
pub use provider::{Document, DocumentProvider, ProviderConfig};
pub use state_machine::{ChunkStatus, ChunkTracker};
pub use transform::{MigrationScript, Transform};
pub use types::{ChunkIndex, DocumentId, WorkerId};
