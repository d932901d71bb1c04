//! # Diff Ledger
//!
//! One JSON file per chunk, written before the chunk's documents are written
//! back. The file maps each document id to the revision it was fetched at and
//! the patch the transform produced:
//!
//! ```json
//! {"1": {"revision": "1-4f2a...", "diff": [{"op": "test", "path": "/v", "value": 1},
//!                                          {"op": "replace", "path": "/v", "value": 10}]}}
//! ```
//!
//! Files are named `{chunk}__{first_id}__{last_id}.diff.json` and never
//! overwritten. If the name is taken a numbered suffix is used instead.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::diff::{self, Patch};
use crate::error::{DocshiftError, Result};
use crate::provider::directory::escape_file_name;
use crate::provider::Document;
use crate::types::{ChunkIndex, DocumentId};

pub const LEDGER_SUFFIX: &str = ".diff.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Revision the document had when it was fetched
    pub revision: Option<String>,
    pub diff: Patch,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DiffLedger {
    chunk: ChunkIndex,
    entries: BTreeMap<DocumentId, LedgerEntry>,
}

impl DiffLedger {
    pub fn new(chunk: ChunkIndex) -> Self {
        Self {
            chunk,
            entries: BTreeMap::new(),
        }
    }

    pub fn chunk(&self) -> ChunkIndex {
        self.chunk
    }

    pub fn record(&mut self, id: impl Into<DocumentId>, revision: Option<String>, diff: Patch) {
        self.entries
            .insert(id.into(), LedgerEntry { revision, diff });
    }

    pub fn get(&self, id: &str) -> Option<&LedgerEntry> {
        self.entries.get(id)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&DocumentId, &LedgerEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries whose patch changes the document
    pub fn changed(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| !entry.diff.is_empty())
            .count()
    }

    /// `{chunk}__{first}__{last}.diff.json`
    pub fn file_name(chunk: ChunkIndex, first_id: &str, last_id: &str) -> String {
        format!(
            "{chunk}__{}__{}{LEDGER_SUFFIX}",
            escape_file_name(first_id),
            escape_file_name(last_id)
        )
    }

    /// Persist the ledger under `dir`, never replacing an existing file
    pub async fn write(&self, dir: &Path, first_id: &str, last_id: &str) -> Result<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;
        let body = serde_json::to_vec_pretty(&self.entries)?;
        let base = Self::file_name(self.chunk, first_id, last_id);
        let stem = base.strip_suffix(LEDGER_SUFFIX).unwrap_or(&base);

        for attempt in 0u32..1000 {
            let name = match attempt {
                0 => base.clone(),
                n => format!("{stem}.{n}{LEDGER_SUFFIX}"),
            };
            let path = dir.join(&name);
            let opened = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;
            match opened {
                Ok(mut file) => {
                    file.write_all(&body).await?;
                    file.sync_all().await?;
                    debug!(chunk = self.chunk, path = %path.display(), entries = self.len(), "Diff ledger written");
                    return Ok(path);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    warn!(
                        chunk = self.chunk,
                        path = %path.display(),
                        "Ledger file already exists, trying next suffix"
                    );
                }
                Err(e) => {
                    return Err(DocshiftError::LedgerError(format!(
                        "cannot create {}: {e}",
                        path.display()
                    )))
                }
            }
        }

        Err(DocshiftError::LedgerError(format!(
            "no free ledger file name for {base} in {}",
            dir.display()
        )))
    }

    /// Read a ledger file back; the chunk index is taken from the file name
    pub async fn load(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let entries: BTreeMap<DocumentId, LedgerEntry> = serde_json::from_slice(&bytes)
            .map_err(|e| DocshiftError::LedgerError(format!("{}: {e}", path.display())))?;
        let chunk = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.split("__").next())
            .and_then(|index| index.parse().ok())
            .ok_or_else(|| {
                DocshiftError::LedgerError(format!(
                    "{} is not a ledger file name",
                    path.display()
                ))
            })?;
        Ok(Self { chunk, entries })
    }

    /// Replay the recorded patch on a pre-image
    pub fn replay(&self, id: &str, before: &Document) -> Result<Document> {
        let entry = self.entry_for(id)?;
        Ok(diff::apply(&entry.diff, before)?)
    }

    /// Undo the recorded patch on a post-image
    pub fn revert(&self, id: &str, after: &Document) -> Result<Document> {
        let entry = self.entry_for(id)?;
        let undo = diff::inverse(&entry.diff)?;
        Ok(diff::apply(&undo, after)?)
    }

    fn entry_for(&self, id: &str) -> Result<&LedgerEntry> {
        self.entries.get(id).ok_or_else(|| {
            DocshiftError::LedgerError(format!("chunk {} has no entry for {id}", self.chunk))
        })
    }
}
