use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use super::{
    document_id, next_revision, stamp_revision, Document, DocumentProvider, ProviderError,
    ProviderResult, Selector, WriteResult, ID_FIELD, REV_FIELD,
};
use crate::types::DocumentId;

/// Process-local document store with revision checking
#[derive(Debug, Default)]
pub struct MemoryProvider {
    documents: Mutex<BTreeMap<DocumentId, Document>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store; each document receives a first revision
    pub fn with_documents(documents: impl IntoIterator<Item = Document>) -> ProviderResult<Self> {
        let provider = Self::new();
        for document in documents {
            provider.insert(document)?;
        }
        Ok(provider)
    }

    /// Insert or overwrite a document without revision checks
    pub fn insert(&self, mut document: Document) -> ProviderResult<String> {
        let id = document_id(&document)
            .ok_or_else(|| ProviderError::InvalidDocument(format!("missing {ID_FIELD}")))?
            .to_string();
        let mut documents = self.documents.lock();
        let stored_rev = documents
            .get(&id)
            .and_then(|stored| stored.get(REV_FIELD))
            .and_then(Value::as_str);
        let rev = next_revision(stored_rev);
        if let Some(object) = document.as_object_mut() {
            object.insert(REV_FIELD.to_string(), Value::String(rev.clone()));
        }
        documents.insert(id, document);
        Ok(rev)
    }

    pub fn get(&self, id: &str) -> Option<Document> {
        self.documents.lock().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.documents.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.lock().is_empty()
    }
}

#[async_trait]
impl DocumentProvider for MemoryProvider {
    async fn find_ids(&self, selector: &Selector) -> ProviderResult<Vec<DocumentId>> {
        let documents = self.documents.lock();
        Ok(documents
            .iter()
            .filter(|(_, document)| selector.matches(document))
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn get_documents(&self, ids: &[DocumentId]) -> ProviderResult<Vec<Document>> {
        let documents = self.documents.lock();
        Ok(ids
            .iter()
            .filter_map(|id| documents.get(id).cloned())
            .collect())
    }

    async fn bulk_write(&self, incoming: Vec<Document>) -> ProviderResult<Vec<WriteResult>> {
        let mut documents = self.documents.lock();
        let mut results = Vec::with_capacity(incoming.len());

        for mut document in incoming {
            let Some(id) = document_id(&document).map(str::to_string) else {
                results.push(WriteResult::failure("", format!("missing {ID_FIELD}")));
                continue;
            };
            if !document.is_object() {
                results.push(WriteResult::failure(id, "document must be an object"));
                continue;
            }
            let stored_rev = documents
                .get(&id)
                .and_then(|stored| stored.get(REV_FIELD))
                .and_then(Value::as_str)
                .map(str::to_string);

            match stamp_revision(&mut document, stored_rev.as_deref()) {
                Some(rev) => {
                    documents.insert(id.clone(), document);
                    results.push(WriteResult::success(id, rev));
                }
                None => {
                    debug!(document_id = %id, "Rejected write with stale revision");
                    results.push(WriteResult::conflict(id));
                }
            }
        }

        Ok(results)
    }
}
