//! Shared helpers for the integration suites.

#![allow(dead_code)]

pub mod spawners;
pub mod strategies;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use docshift::orchestration::MigrationJob;
use docshift::provider::{
    Document, DocumentProvider, MemoryProvider, ProviderConfig, ProviderResult, Selector,
    WriteResult,
};
use docshift::types::DocumentId;
use docshift::transform::Transform;
use docshift::worker::{DiffLedger, LEDGER_SUFFIX};
use serde_json::{json, Value};

/// Memory provider seeded with `documents`
pub fn seeded_provider(documents: Vec<Value>) -> Arc<MemoryProvider> {
    Arc::new(MemoryProvider::with_documents(documents).expect("seed documents"))
}

/// Job over `database` with a fast settle delay and no chunk timeout
pub fn job(
    selector: Value,
    transform: &str,
    chunk_size: usize,
    worker_count: usize,
    ledger_dir: &Path,
) -> MigrationJob {
    MigrationJob {
        database_name: "test-db".to_string(),
        provider: ProviderConfig::Memory,
        selector: Selector::parse(&selector).expect("valid selector"),
        transform: Transform::compile(transform).expect("valid transform"),
        chunk_size,
        worker_count,
        settle_delay: Duration::from_millis(1),
        chunk_timeout: None,
        ledger_dir: ledger_dir.to_path_buf(),
    }
}

/// Ledger file names in `dir`, sorted
pub fn ledger_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .expect("ledger dir")
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(LEDGER_SUFFIX))
        .collect();
    names.sort();
    names
}

/// Load every ledger in `dir`
pub async fn load_ledgers(dir: &Path) -> Vec<DiffLedger> {
    let mut ledgers = Vec::new();
    for name in ledger_files(dir) {
        let path: PathBuf = dir.join(name);
        ledgers.push(DiffLedger::load(&path).await.expect("ledger loads"));
    }
    ledgers
}

/// Store where another writer edits `contended` just before every bulk write,
/// so the migration's write of that document hits a stale `_rev`
#[derive(Debug)]
pub struct ContendedProvider {
    pub inner: Arc<MemoryProvider>,
    pub contended: &'static str,
}

#[async_trait]
impl DocumentProvider for ContendedProvider {
    async fn find_ids(&self, selector: &Selector) -> ProviderResult<Vec<DocumentId>> {
        self.inner.find_ids(selector).await
    }

    async fn get_documents(&self, ids: &[DocumentId]) -> ProviderResult<Vec<Document>> {
        self.inner.get_documents(ids).await
    }

    async fn bulk_write(&self, documents: Vec<Document>) -> ProviderResult<Vec<WriteResult>> {
        if documents.iter().any(|d| d["_id"] == json!(self.contended)) {
            if let Some(mut current) = self.inner.get(self.contended) {
                current["edited_elsewhere"] = json!(true);
                self.inner.insert(current)?;
            }
        }
        self.inner.bulk_write(documents).await
    }
}
