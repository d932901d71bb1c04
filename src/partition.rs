//! Chunk partitioning.
//!
//! Splits the sorted, deduplicated id list into fixed-size chunks. Chunk
//! boundaries are computed once per job and never re-sliced.

use serde::{Deserialize, Serialize};

use crate::error::{DocshiftError, Result};
pub use crate::types::{ChunkIndex, DocumentId};

pub const DEFAULT_CHUNK_SIZE: usize = 10_000;

/// A contiguous slice of the job's id list, handed to one worker at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: ChunkIndex,
    pub ids: Vec<DocumentId>,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn first_id(&self) -> Option<&str> {
        self.ids.first().map(String::as_str)
    }

    pub fn last_id(&self) -> Option<&str> {
        self.ids.last().map(String::as_str)
    }
}

/// Sort and deduplicate the raw ids returned by the provider.
pub fn prepare_ids(mut ids: Vec<DocumentId>) -> Vec<DocumentId> {
    ids.sort();
    ids.dedup();
    ids
}

/// Partition `ids` into chunks of `chunk_size`; the final chunk holds the
/// remainder. An empty input produces no chunks.
pub fn partition(ids: Vec<DocumentId>, chunk_size: usize) -> Result<Vec<Chunk>> {
    if chunk_size == 0 {
        return Err(DocshiftError::configuration(
            "chunk_size must be greater than 0",
        ));
    }

    let mut chunks = Vec::with_capacity(ids.len().div_ceil(chunk_size));
    let mut remaining = ids.into_iter().peekable();
    let mut index = 0;

    while remaining.peek().is_some() {
        let ids: Vec<DocumentId> = remaining.by_ref().take(chunk_size).collect();
        chunks.push(Chunk { index, ids });
        index += 1;
    }

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> Vec<DocumentId> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_even_split() {
        let input = ids(&[
            "123", "245", "678", "91011", "121314", "151617", "91011", "121314", "151617",
        ]);
        let chunks = partition(input.clone(), 3).unwrap();

        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.len() == 3));
        let flattened: Vec<DocumentId> = chunks.into_iter().flat_map(|c| c.ids).collect();
        assert_eq!(flattened, input);
    }

    #[test]
    fn test_remainder_chunk() {
        let input = ids(&[
            "123123",
            "213123124",
            "213123123",
            "32112",
            "123123",
            "asdasdasd",
            "asdasdas",
            "12312312",
            "dassadsad",
            "21321123",
            "sadfdfsgfds",
            "213123124",
            "213123",
        ]);
        let chunks = partition(input.clone(), 5).unwrap();

        let sizes: Vec<usize> = chunks.iter().map(Chunk::len).collect();
        assert_eq!(sizes, vec![5, 5, 3]);
        let indexes: Vec<ChunkIndex> = chunks.iter().map(|c| c.index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
        let flattened: Vec<DocumentId> = chunks.into_iter().flat_map(|c| c.ids).collect();
        assert_eq!(flattened, input);
    }

    #[test]
    fn test_empty_input_yields_no_chunks() {
        assert!(partition(Vec::new(), 10).unwrap().is_empty());
    }

    #[test]
    fn test_zero_chunk_size_is_rejected() {
        let err = partition(ids(&["a"]), 0).unwrap_err();
        assert!(matches!(err, DocshiftError::ConfigurationError(_)));
    }

    #[test]
    fn test_prepare_ids_sorts_and_dedups() {
        let prepared = prepare_ids(ids(&["c", "a", "b", "a", "c"]));
        assert_eq!(prepared, ids(&["a", "b", "c"]));
    }

    #[test]
    fn test_chunk_bounds() {
        let chunks = partition(ids(&["1", "2", "3"]), 2).unwrap();
        assert_eq!(chunks[0].first_id(), Some("1"));
        assert_eq!(chunks[0].last_id(), Some("2"));
        assert_eq!(chunks[1].first_id(), Some("3"));
        assert_eq!(chunks[1].last_id(), Some("3"));
    }
}
