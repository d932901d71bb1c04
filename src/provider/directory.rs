use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs;
use tracing::{debug, warn};

use super::{
    document_id, document_rev, next_revision, stamp_revision, Document, DocumentProvider,
    ProviderError, ProviderResult, Selector, WriteResult, ID_FIELD, REV_FIELD,
};
use crate::types::DocumentId;

const EXTENSION: &str = "json";

/// One JSON file per document in a directory
///
/// File names are the percent-escaped document id, so any id is representable.
/// Writes go through a temporary file and a rename.
#[derive(Debug, Clone)]
pub struct DirectoryProvider {
    root: PathBuf,
}

impl DirectoryProvider {
    /// Open an existing database directory
    pub async fn open(root: impl Into<PathBuf>) -> ProviderResult<Self> {
        let root = root.into();
        let metadata = fs::metadata(&root).await.map_err(|e| {
            ProviderError::Connection(format!("cannot open {}: {e}", root.display()))
        })?;
        if !metadata.is_dir() {
            return Err(ProviderError::Connection(format!(
                "{} is not a directory",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    /// Open a database directory, creating it if needed
    pub async fn create(root: impl Into<PathBuf>) -> ProviderResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Insert or overwrite a document without revision checks
    pub async fn insert(&self, mut document: Document) -> ProviderResult<String> {
        let id = document_id(&document)
            .ok_or_else(|| ProviderError::InvalidDocument(format!("missing {ID_FIELD}")))?
            .to_string();
        let stored = self.read(&id).await?;
        let stored_rev = stored.as_ref().and_then(document_rev);
        let rev = next_revision(stored_rev);
        if let Some(object) = document.as_object_mut() {
            object.insert(REV_FIELD.to_string(), Value::String(rev.clone()));
        }
        self.persist(&id, &document).await?;
        Ok(rev)
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}.{EXTENSION}", escape_file_name(id)))
    }

    async fn read(&self, id: &str) -> ProviderResult<Option<Document>> {
        match fs::read(self.path_for(id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn persist(&self, id: &str, document: &Document) -> ProviderResult<()> {
        let target = self.path_for(id);
        let staging = target.with_extension(format!("{EXTENSION}.tmp"));
        fs::write(&staging, serde_json::to_vec_pretty(document)?).await?;
        fs::rename(&staging, &target).await?;
        Ok(())
    }

    async fn load_all(&self) -> ProviderResult<Vec<Document>> {
        let mut entries = fs::read_dir(&self.root).await?;
        let mut documents = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let bytes = fs::read(&path).await?;
            match serde_json::from_slice::<Document>(&bytes) {
                Ok(document) => documents.push(document),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable document file"),
            }
        }
        Ok(documents)
    }
}

#[async_trait]
impl DocumentProvider for DirectoryProvider {
    async fn find_ids(&self, selector: &Selector) -> ProviderResult<Vec<DocumentId>> {
        let documents = self.load_all().await?;
        Ok(documents
            .iter()
            .filter(|document| selector.matches(document))
            .filter_map(|document| document_id(document).map(str::to_string))
            .collect())
    }

    async fn get_documents(&self, ids: &[DocumentId]) -> ProviderResult<Vec<Document>> {
        let mut documents = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(document) = self.read(id).await? {
                documents.push(document);
            }
        }
        Ok(documents)
    }

    async fn bulk_write(&self, incoming: Vec<Document>) -> ProviderResult<Vec<WriteResult>> {
        let mut results = Vec::with_capacity(incoming.len());

        for mut document in incoming {
            let Some(id) = document_id(&document).map(str::to_string) else {
                results.push(WriteResult::failure("", format!("missing {ID_FIELD}")));
                continue;
            };
            let stored = match self.read(&id).await {
                Ok(stored) => stored,
                Err(e) => {
                    results.push(WriteResult::failure(id, e.to_string()));
                    continue;
                }
            };
            let stored_rev = stored.as_ref().and_then(document_rev);

            let Some(rev) = stamp_revision(&mut document, stored_rev) else {
                debug!(document_id = %id, "Rejected write with stale revision");
                results.push(WriteResult::conflict(id));
                continue;
            };
            match self.persist(&id, &document).await {
                Ok(()) => results.push(WriteResult::success(id, rev)),
                Err(e) => results.push(WriteResult::failure(id, e.to_string())),
            }
        }

        Ok(results)
    }
}

/// Percent-escape everything outside `[A-Za-z0-9_-]`
pub fn escape_file_name(id: &str) -> String {
    let mut escaped = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            escaped.push(byte as char);
        } else {
            escaped.push_str(&format!("%{byte:02X}"));
        }
    }
    escaped
}
