mod common;

use common::strategies::*;
use docshift::diff::{apply, diff, inverse};
use docshift::partition::{partition, prepare_ids};
use docshift::worker::DiffLedger;
use proptest::prelude::*;

proptest! {
    /// Property: chunks cover every id exactly once, in order, with only the last chunk short
    #[test]
    fn partition_covers_every_id_once(raw in id_list_strategy(), chunk_size in 1usize..50) {
        let ids = prepare_ids(raw);
        let chunks = partition(ids.clone(), chunk_size).unwrap();

        prop_assert_eq!(chunks.len(), ids.len().div_ceil(chunk_size));
        for (position, chunk) in chunks.iter().enumerate() {
            prop_assert_eq!(chunk.index, position);
            prop_assert!(!chunk.is_empty());
            if position + 1 < chunks.len() {
                prop_assert_eq!(chunk.len(), chunk_size);
            }
        }
        let flattened: Vec<String> = chunks.into_iter().flat_map(|c| c.ids).collect();
        prop_assert_eq!(flattened, ids);
    }

    /// Property: prepared ids are strictly increasing
    #[test]
    fn prepared_ids_are_sorted_and_unique(raw in id_list_strategy()) {
        let ids = prepare_ids(raw);
        prop_assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    }

    /// Property: a diff applied to its pre-image yields the post-image
    #[test]
    fn diff_replays_to_the_post_image(before in json_value_strategy(), after in json_value_strategy()) {
        let patch = diff(&before, &after);
        prop_assert_eq!(apply(&patch, &before).unwrap(), after);
    }

    /// Property: the inverse of a diff restores the pre-image
    #[test]
    fn inverse_diff_restores_the_pre_image(before in document_strategy(), after in document_strategy()) {
        let patch = diff(&before, &after);
        let undo = inverse(&patch).unwrap();
        prop_assert_eq!(apply(&undo, &after).unwrap(), before);
    }

    /// Property: identical documents diff to nothing
    #[test]
    fn identical_documents_have_empty_diffs(document in document_strategy()) {
        prop_assert!(diff(&document, &document.clone()).is_empty());
    }

    /// Property: ledger file names never contain path separators
    #[test]
    fn ledger_file_names_are_flat(first in document_id_strategy(), last in document_id_strategy(), chunk in 0usize..1000) {
        let name = DiffLedger::file_name(chunk, &first, &last);
        prop_assert!(!name.contains('/'));
        let expected_prefix = format!("{chunk}__");
        prop_assert!(name.starts_with(&expected_prefix));
        prop_assert!(name.ends_with(".diff.json"));
    }
}
