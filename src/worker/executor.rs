//! Chunk pipeline: fetch, transform, diff, persist ledger, write back.

use std::path::PathBuf;
use std::time::Instant;

use tracing::{error, info, warn};

use super::context::WorkerContext;
use super::ledger::DiffLedger;
use crate::diff;
use crate::error::Result;
use crate::messaging::ChunkAssignment;
use crate::provider::{document_id, document_rev};
use crate::types::ChunkIndex;

/// What happened to one chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkOutcome {
    pub index: ChunkIndex,
    pub requested: usize,
    pub fetched: usize,
    pub changed: usize,
    pub written: usize,
    pub failed: usize,
    pub ledger_path: Option<PathBuf>,
}

/// Run the pipeline for one chunk
///
/// Individual write failures are logged and counted; they do not fail the
/// chunk. Anything else (fetch errors, a transform error, a ledger that
/// cannot be written) does.
pub async fn execute_chunk(ctx: &WorkerContext, assignment: &ChunkAssignment) -> Result<ChunkOutcome> {
    let provider = ctx.provider()?;
    let transform = ctx.transform()?;
    let ledger_dir = ctx.ledger_dir()?;
    let started = Instant::now();

    let originals = provider.get_documents(&assignment.ids).await?;
    if originals.len() != assignment.ids.len() {
        warn!(
            chunk = assignment.index,
            requested = assignment.ids.len(),
            fetched = originals.len(),
            "Some documents in the chunk no longer exist"
        );
    }

    let mut ledger = DiffLedger::new(assignment.index);
    let mut transformed = Vec::with_capacity(originals.len());
    for original in &originals {
        let Some(id) = document_id(original) else {
            warn!(chunk = assignment.index, "Skipping fetched document without _id");
            continue;
        };
        let updated = transform.apply(original)?;
        let patch = diff::diff(original, &updated);
        ledger.record(id, document_rev(original).map(str::to_string), patch);
        transformed.push(updated);
    }

    let ledger_path = match (assignment.ids.first(), assignment.ids.last()) {
        (Some(first), Some(last)) if !ledger.is_empty() => {
            Some(ledger.write(ledger_dir, first, last).await?)
        }
        _ => None,
    };

    let results = if transformed.is_empty() {
        Vec::new()
    } else {
        provider.bulk_write(transformed).await?
    };

    let mut failed = 0;
    for result in results.iter().filter(|result| !result.ok) {
        failed += 1;
        error!(
            chunk = assignment.index,
            document_id = %result.id,
            error = result.error.as_deref().unwrap_or("unknown"),
            "Failed to write document"
        );
    }

    let outcome = ChunkOutcome {
        index: assignment.index,
        requested: assignment.ids.len(),
        fetched: originals.len(),
        changed: ledger.changed(),
        written: results.len() - failed,
        failed,
        ledger_path,
    };

    info!(
        chunk = outcome.index,
        fetched = outcome.fetched,
        changed = outcome.changed,
        written = outcome.written,
        failed = outcome.failed,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Chunk processed"
    );

    Ok(outcome)
}
