//! Job setup: discover ids, partition, then hand off to the supervisor.

use std::path::PathBuf;
use std::time::Duration;

use tracing::info;

use super::master::{MasterCore, MigrationReport};
use super::supervisor::{supervise, SupervisorSettings, WorkerSpawner};
use crate::config::MigrationConfig;
use crate::error::{DocshiftError, Result};
use crate::messaging::MigrationArgs;
use crate::partition::{partition, prepare_ids};
use crate::provider::{ProviderConfig, ProviderConnector, Selector};
use crate::transform::{MigrationScript, Transform};

/// Everything the master needs for one run
#[derive(Debug, Clone)]
pub struct MigrationJob {
    pub database_name: String,
    pub provider: ProviderConfig,
    pub selector: Selector,
    pub transform: Transform,
    pub chunk_size: usize,
    pub worker_count: usize,
    pub settle_delay: Duration,
    pub chunk_timeout: Option<Duration>,
    pub ledger_dir: PathBuf,
}

impl MigrationJob {
    pub fn from_config(config: &MigrationConfig, script: MigrationScript) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            database_name: config.database_name()?.to_string(),
            provider: config.provider.clone(),
            selector: script.selector,
            transform: script.transform,
            chunk_size: config.chunk_size,
            worker_count: config.worker_count,
            settle_delay: config.settle_delay(),
            chunk_timeout: config.chunk_timeout(),
            ledger_dir: config.ledger_dir.clone(),
        })
    }
}

/// Run a migration end to end
///
/// Fails with [`DocshiftError::NoMatchingDocuments`] before spawning any
/// worker when the selector matches nothing.
pub async fn run_migration(
    job: &MigrationJob,
    connector: &dyn ProviderConnector,
    spawner: &dyn WorkerSpawner,
) -> Result<MigrationReport> {
    if job.worker_count == 0 {
        return Err(DocshiftError::configuration(
            "worker_count must be greater than 0",
        ));
    }

    let provider = connector.connect(&job.database_name, &job.provider).await?;
    let ids = prepare_ids(provider.find_ids(&job.selector).await?);
    if ids.is_empty() {
        return Err(DocshiftError::NoMatchingDocuments);
    }

    let document_count = ids.len();
    let chunks = partition(ids, job.chunk_size)?;
    let worker_count = job.worker_count.min(chunks.len());
    info!(
        database = %job.database_name,
        documents = document_count,
        chunks = chunks.len(),
        workers = worker_count,
        "Starting migration"
    );

    let args = MigrationArgs {
        database_name: job.database_name.clone(),
        provider: job.provider.clone(),
        ledger_dir: job.ledger_dir.clone(),
    };
    let core = MasterCore::new(chunks, args, job.transform.source().to_string());

    supervise(
        core,
        spawner,
        SupervisorSettings {
            worker_count,
            settle_delay: job.settle_delay,
            chunk_timeout: job.chunk_timeout,
        },
    )
    .await
}
