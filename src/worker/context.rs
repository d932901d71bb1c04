use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::error::{DocshiftError, Result};
use crate::messaging::MigrationArgs;
use crate::provider::{DocumentProvider, ProviderConnector};
use crate::transform::{FunctionRegistry, Transform};

/// Per-process worker state, filled in by the handshake
///
/// The provider and the transform are each installed exactly once. A chunk
/// cannot run until both are present.
#[derive(Debug)]
pub struct WorkerContext {
    connector: Arc<dyn ProviderConnector>,
    registry: FunctionRegistry,
    provider: Option<Arc<dyn DocumentProvider>>,
    transform: Option<Transform>,
    ledger_dir: Option<PathBuf>,
    database_name: Option<String>,
}

impl WorkerContext {
    pub fn new(connector: Arc<dyn ProviderConnector>) -> Self {
        Self::with_registry(connector, FunctionRegistry::builtin())
    }

    pub fn with_registry(connector: Arc<dyn ProviderConnector>, registry: FunctionRegistry) -> Self {
        Self {
            connector,
            registry,
            provider: None,
            transform: None,
            ledger_dir: None,
            database_name: None,
        }
    }

    /// Connect to the job's database
    pub async fn configure(&mut self, args: MigrationArgs) -> Result<()> {
        if self.provider.is_some() {
            return Err(DocshiftError::precondition(
                "migration args were already received",
            ));
        }

        let provider = self
            .connector
            .connect(&args.database_name, &args.provider)
            .await?;

        info!(
            database = %args.database_name,
            ledger_dir = %args.ledger_dir.display(),
            "Worker connected to database"
        );
        self.provider = Some(provider);
        self.ledger_dir = Some(args.ledger_dir);
        self.database_name = Some(args.database_name);
        Ok(())
    }

    /// Compile and install the transform program
    pub fn install_transform(&mut self, source: &str) -> Result<()> {
        if self.transform.is_some() {
            return Err(DocshiftError::precondition("transform was already received"));
        }
        let transform = Transform::compile_with(source, &self.registry)?;
        info!(steps = transform.len(), "Worker installed transform");
        self.transform = Some(transform);
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.provider.is_some() && self.transform.is_some()
    }

    pub fn provider(&self) -> Result<&Arc<dyn DocumentProvider>> {
        self.provider
            .as_ref()
            .ok_or_else(|| DocshiftError::precondition("no database connection; migration args not received"))
    }

    pub fn transform(&self) -> Result<&Transform> {
        self.transform
            .as_ref()
            .ok_or_else(|| DocshiftError::precondition("no transform installed"))
    }

    pub fn ledger_dir(&self) -> Result<&Path> {
        self.ledger_dir
            .as_deref()
            .ok_or_else(|| DocshiftError::precondition("no ledger directory; migration args not received"))
    }

    pub fn database_name(&self) -> Option<&str> {
        self.database_name.as_deref()
    }
}
