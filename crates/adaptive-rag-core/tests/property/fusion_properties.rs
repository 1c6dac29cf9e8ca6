use std::collections::BTreeMap;

use adaptive_rag_core::search::{fuse, FusionParams};
use adaptive_rag_core::store::ChunkCandidate;
use proptest::prelude::*;

fn candidate(ordinal: u32, score: f64) -> ChunkCandidate {
    ChunkCandidate {
        chunk_id: format!("chunk-{:03}", ordinal),
        document_id: "doc".to_string(),
        ordinal,
        title: "notes.txt".to_string(),
        text: format!("Chunk number {} talks about topic {}.", ordinal, ordinal % 7),
        raw_score: score,
    }
}

fn list(scores: BTreeMap<u32, f64>) -> Vec<ChunkCandidate> {
    scores.into_iter().map(|(o, s)| candidate(o, s)).collect()
}

fn scores() -> impl Strategy<Value = BTreeMap<u32, f64>> {
    prop::collection::btree_map(0u32..40, 0.0f64..1.0, 0..20)
}

fn weights() -> impl Strategy<Value = FusionParams> {
    (0.0f64..1.0, 0.0f64..1.0, 1usize..80).prop_map(|(d, s, preview_chars)| FusionParams {
        dense_weight: d,
        sparse_weight: s,
        overfetch_factor: 4,
        preview_chars,
    })
}

proptest! {
    #[test]
    fn fusion_ignores_input_order(d in scores(), s in scores(), k in 1usize..15, p in weights()) {
        let dense = list(d);
        let sparse = list(s);
        let forward = fuse(&dense, &sparse, k, &p);
        let mut dense_rev = dense.clone();
        dense_rev.reverse();
        let mut sparse_rev = sparse.clone();
        sparse_rev.reverse();
        prop_assert_eq!(forward, fuse(&dense_rev, &sparse_rev, k, &p));
    }

    #[test]
    fn results_are_sorted_bounded_and_truncated(d in scores(), s in scores(), k in 1usize..15, p in weights()) {
        let results = fuse(&list(d), &list(s), k, &p);
        prop_assert!(results.len() <= k);
        for r in &results {
            prop_assert!(r.score >= 0.0);
            prop_assert!(r.score <= p.dense_weight + p.sparse_weight + 1e-9);
        }
        for w in results.windows(2) {
            prop_assert!(
                w[0].score > w[1].score
                    || (w[0].score == w[1].score && w[0].ordinal <= w[1].ordinal)
            );
        }
    }

    #[test]
    fn preview_is_a_prefix_of_chunk_text(d in scores(), p in weights()) {
        let dense = list(d);
        for r in fuse(&dense, &[], 10, &p) {
            let source = dense.iter().find(|c| c.chunk_id == r.chunk_id).unwrap();
            prop_assert!(source.text.starts_with(&r.preview_text));
            prop_assert!(r.preview_text.chars().count() <= p.preview_chars);
        }
    }
}

#[test]
fn chunks_in_both_lists_outrank_single_list_chunks() {
    // 20 chunks; ordinals 0..10 dense-only, 10..17 sparse-only, 17..20 in both.
    // Every list shares the same raw score, so only list membership differs.
    let mut dense: Vec<_> = (0..10).map(|o| candidate(o, 0.8)).collect();
    let mut sparse: Vec<_> = (10..17).map(|o| candidate(o, 3.0)).collect();
    for o in 17..20 {
        dense.push(candidate(o, 0.8));
        sparse.push(candidate(o, 3.0));
    }
    let results = fuse(&dense, &sparse, 5, &FusionParams::default());
    assert_eq!(results.len(), 5);
    let top: Vec<u32> = results.iter().take(3).map(|r| r.ordinal).collect();
    assert_eq!(top, vec![17, 18, 19]);
    assert!(results[2].score > results[3].score);
}
