//! # Document Providers
//!
//! The storage contract the migration runs against. A provider answers three
//! questions: which documents match a selector, what do those documents look
//! like right now, and did a bulk write of new revisions go through.
//!
//! Documents are plain JSON objects carrying CouchDB-style `_id` and `_rev`
//! members. Revisions are `{generation}-{token}` and every successful write
//! bumps the generation. A write whose `_rev` does not match the stored
//! revision is rejected with a `conflict` result rather than an error, so a
//! single bad document never fails a whole chunk.

pub mod directory;
pub mod memory;
pub mod selector;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::types::DocumentId;

pub use directory::DirectoryProvider;
pub use memory::MemoryProvider;
pub use selector::Selector;

/// A stored document, always a JSON object
pub type Document = Value;

pub const ID_FIELD: &str = "_id";
pub const REV_FIELD: &str = "_rev";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Outcome of writing a single document in a bulk write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteResult {
    pub id: DocumentId,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WriteResult {
    pub fn success(id: impl Into<DocumentId>, rev: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ok: true,
            rev: Some(rev.into()),
            error: None,
        }
    }

    pub fn failure(id: impl Into<DocumentId>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ok: false,
            rev: None,
            error: Some(error.into()),
        }
    }

    pub fn conflict(id: impl Into<DocumentId>) -> Self {
        Self::failure(id, "conflict")
    }
}

#[async_trait]
pub trait DocumentProvider: Send + Sync + std::fmt::Debug {
    /// Ids of every document matching `selector`, in no particular order
    async fn find_ids(&self, selector: &Selector) -> ProviderResult<Vec<DocumentId>>;

    /// Best-effort bulk fetch; ids that do not exist are simply absent
    async fn get_documents(&self, ids: &[DocumentId]) -> ProviderResult<Vec<Document>>;

    /// Write every document, reporting per-document success
    async fn bulk_write(&self, documents: Vec<Document>) -> ProviderResult<Vec<WriteResult>>;
}

/// Which provider a job talks to, shipped to workers in the migration args
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProviderConfig {
    /// Process-local store; only meaningful for in-process workers
    #[default]
    Memory,
    /// One JSON file per document under `path/<database_name>`
    Directory { path: PathBuf },
}

/// Builds a provider from a database name and provider config
///
/// The master and every worker connect independently.
#[async_trait]
pub trait ProviderConnector: Send + Sync + std::fmt::Debug {
    async fn connect(
        &self,
        database_name: &str,
        config: &ProviderConfig,
    ) -> ProviderResult<Arc<dyn DocumentProvider>>;
}

/// Connects using the provider config alone
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultConnector;

#[async_trait]
impl ProviderConnector for DefaultConnector {
    async fn connect(
        &self,
        database_name: &str,
        config: &ProviderConfig,
    ) -> ProviderResult<Arc<dyn DocumentProvider>> {
        if database_name.is_empty() {
            return Err(ProviderError::Connection(
                "database name must not be empty".to_string(),
            ));
        }
        match config {
            ProviderConfig::Memory => {
                tracing::warn!(
                    database = database_name,
                    "Connecting to a fresh in-memory provider; contents are not shared between processes"
                );
                Ok(Arc::new(MemoryProvider::new()))
            }
            ProviderConfig::Directory { path } => {
                let provider = DirectoryProvider::open(path.join(database_name)).await?;
                Ok(Arc::new(provider))
            }
        }
    }
}

/// Hands out the same provider regardless of arguments
///
/// Used when master and workers share one process.
#[derive(Debug, Clone)]
pub struct SharedConnector {
    provider: Arc<dyn DocumentProvider>,
}

impl SharedConnector {
    pub fn new(provider: Arc<dyn DocumentProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl ProviderConnector for SharedConnector {
    async fn connect(
        &self,
        _database_name: &str,
        _config: &ProviderConfig,
    ) -> ProviderResult<Arc<dyn DocumentProvider>> {
        Ok(Arc::clone(&self.provider))
    }
}

pub fn document_id(document: &Document) -> Option<&str> {
    document.get(ID_FIELD).and_then(Value::as_str)
}

pub fn document_rev(document: &Document) -> Option<&str> {
    document.get(REV_FIELD).and_then(Value::as_str)
}

/// Generation number of a `{generation}-{token}` revision
pub fn revision_generation(rev: &str) -> Option<u64> {
    rev.split_once('-').and_then(|(generation, _)| generation.parse().ok())
}

/// Revision following `current` (or the first revision for a new document)
pub fn next_revision(current: Option<&str>) -> String {
    let generation = current.and_then(revision_generation).unwrap_or(0) + 1;
    format!("{generation}-{}", Uuid::new_v4().simple())
}

/// Validate an incoming write against the stored revision and stamp the new one
///
/// Returns the new revision, or `None` when the write conflicts.
pub(crate) fn stamp_revision(incoming: &mut Document, stored: Option<&str>) -> Option<String> {
    let claimed = document_rev(incoming);
    if claimed != stored {
        return None;
    }
    let rev = next_revision(stored);
    if let Some(object) = incoming.as_object_mut() {
        object.insert(REV_FIELD.to_string(), Value::String(rev.clone()));
    }
    Some(rev)
}
