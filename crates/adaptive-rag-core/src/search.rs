//! Hybrid retrieval: dense + sparse candidate fusion.
//!
//! The search algorithm works entirely through the [`VectorStore`] trait.
//! The caller encodes the question (with the same embedder and sparse
//! encoder used at ingestion) and passes both encodings in.
//!
//! # Hybrid Scoring Algorithm
//!
//! 1. Fetch `N = k × overfetch_factor` dense candidates (cosine similarity).
//! 2. Fetch `N` sparse candidates (sparse dot product).
//! 3. Normalize each list to `[0, 1]` independently with min-max scaling.
//! 4. Merge: `score = w_dense × dense + w_sparse × sparse`; a chunk missing
//!    from one list gets 0 for that list.
//! 5. Sort by score (desc), chunk ordinal (asc), chunk id (asc).
//! 6. Truncate to `k`.

use std::collections::BTreeMap;

use anyhow::Result;

use crate::models::{RetrievalResult, SparseVector};
use crate::store::{ChunkCandidate, VectorStore};

/// Fusion tuning parameters, decoupled from application config.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionParams {
    pub dense_weight: f64,
    pub sparse_weight: f64,
    /// Candidates fetched per list, as a multiple of `k`.
    pub overfetch_factor: usize,
    /// Maximum characters of chunk text in `preview_text`.
    pub preview_chars: usize,
}

impl Default for FusionParams {
    fn default() -> Self {
        Self {
            dense_weight: 0.5,
            sparse_weight: 0.5,
            overfetch_factor: 4,
            preview_chars: 200,
        }
    }
}

impl FusionParams {
    /// Candidates to fetch from each list for a top-`k` search.
    pub fn candidate_count(&self, k: usize) -> usize {
        k.saturating_mul(self.overfetch_factor.max(1))
    }
}

/// Run a hybrid search against a [`VectorStore`].
///
/// An empty sparse encoding skips the sparse query; an empty dense vector
/// skips the dense query. Store errors are returned to the caller.
pub async fn search(
    store: &dyn VectorStore,
    dense: &[f32],
    sparse: &SparseVector,
    k: usize,
    params: &FusionParams,
) -> Result<Vec<RetrievalResult>> {
    if k == 0 {
        return Ok(Vec::new());
    }
    let n = params.candidate_count(k);

    let dense_candidates = if dense.is_empty() {
        Vec::new()
    } else {
        store.dense_search(dense, n).await?
    };
    let sparse_candidates = if sparse.is_empty() {
        Vec::new()
    } else {
        store.sparse_search(sparse, n).await?
    };

    Ok(fuse(&dense_candidates, &sparse_candidates, k, params))
}

/// Fuse two candidate lists into the top-`k` [`RetrievalResult`]s.
pub fn fuse(
    dense: &[ChunkCandidate],
    sparse: &[ChunkCandidate],
    k: usize,
    params: &FusionParams,
) -> Vec<RetrievalResult> {
    struct Scored<'a> {
        candidate: &'a ChunkCandidate,
        dense: f64,
        sparse: f64,
    }

    // Keyed by chunk id so merge order never depends on list order.
    let mut merged: BTreeMap<&str, Scored> = BTreeMap::new();
    for (c, s) in normalize_scores(dense) {
        merged.insert(
            &c.chunk_id,
            Scored {
                candidate: c,
                dense: s,
                sparse: 0.0,
            },
        );
    }
    for (c, s) in normalize_scores(sparse) {
        merged
            .entry(&c.chunk_id)
            .or_insert(Scored {
                candidate: c,
                dense: 0.0,
                sparse: 0.0,
            })
            .sparse = s;
    }

    let mut scored: Vec<(f64, &ChunkCandidate)> = merged
        .into_values()
        .map(|s| {
            let fused = params.dense_weight * s.dense + params.sparse_weight * s.sparse;
            (fused, s.candidate)
        })
        .collect();

    scored.sort_by(|(sa, a), (sb, b)| {
        sb.total_cmp(sa)
            .then(a.ordinal.cmp(&b.ordinal))
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    scored.truncate(k);

    scored
        .into_iter()
        .map(|(score, c)| RetrievalResult {
            chunk_id: c.chunk_id.clone(),
            document_id: c.document_id.clone(),
            ordinal: c.ordinal,
            score,
            source_label: c.title.clone(),
            preview_text: preview(&c.text, params.preview_chars),
            text: c.text.clone(),
        })
        .collect()
}

/// Min-max normalize raw scores to `[0.0, 1.0]`.
///
/// If all scores are equal, they are normalized to `1.0`.
pub fn normalize_scores(candidates: &[ChunkCandidate]) -> Vec<(&ChunkCandidate, f64)> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let s_min = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::INFINITY, f64::min);
    let s_max = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|c| {
            let norm = if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (c.raw_score - s_min) / (s_max - s_min)
            };
            (c, norm)
        })
        .collect()
}

/// The first `max_chars` characters of `text`.
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte, _)) => text[..byte].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(id: &str, ordinal: u32, score: f64) -> ChunkCandidate {
        ChunkCandidate {
            chunk_id: id.to_string(),
            document_id: "d1".to_string(),
            ordinal,
            title: "doc.txt".to_string(),
            text: format!("text of {}", id),
            raw_score: score,
        }
    }

    fn ids(results: &[RetrievalResult]) -> Vec<&str> {
        results.iter().map(|r| r.chunk_id.as_str()).collect()
    }

    #[test]
    fn test_normalize_empty() {
        assert!(normalize_scores(&[]).is_empty());
    }

    #[test]
    fn test_normalize_range() {
        let candidates = vec![cand("c1", 0, 10.0), cand("c2", 1, 5.0), cand("c3", 2, 0.0)];
        let result = normalize_scores(&candidates);
        assert!((result[0].1 - 1.0).abs() < 1e-9);
        assert!((result[1].1 - 0.5).abs() < 1e-9);
        assert!(result[2].1.abs() < 1e-9);
    }

    #[test]
    fn test_normalize_all_equal() {
        let candidates = vec![cand("c1", 0, 3.0), cand("c2", 1, 3.0)];
        for (_, score) in normalize_scores(&candidates) {
            assert!((score - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_dense_only_weight_follows_dense_order() {
        let dense = vec![cand("a", 0, 0.9), cand("b", 1, 0.5), cand("c", 2, 0.1)];
        let sparse = vec![cand("c", 2, 9.0), cand("b", 1, 1.0)];
        let params = FusionParams {
            dense_weight: 1.0,
            sparse_weight: 0.0,
            ..Default::default()
        };
        assert_eq!(ids(&fuse(&dense, &sparse, 3, &params)), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_missing_list_contributes_zero() {
        let dense = vec![cand("a", 0, 0.9), cand("b", 1, 0.1)];
        let sparse = vec![cand("a", 0, 2.0), cand("c", 2, 1.0)];
        let results = fuse(&dense, &sparse, 5, &FusionParams::default());
        let score = |id: &str| results.iter().find(|r| r.chunk_id == id).unwrap().score;
        assert!((score("a") - 1.0).abs() < 1e-9);
        assert!(score("b").abs() < 1e-9);
        assert!(score("c").abs() < 1e-9);
    }

    #[test]
    fn test_ties_broken_by_ordinal() {
        let dense = vec![cand("z", 0, 0.5), cand("y", 3, 0.5), cand("x", 1, 0.5)];
        let results = fuse(&dense, &[], 3, &FusionParams::default());
        assert_eq!(ids(&results), vec!["z", "x", "y"]);
    }

    #[test]
    fn test_truncates_to_k_and_bounds_preview() {
        let dense: Vec<_> = (0..10).map(|i| cand(&format!("c{}", i), i, i as f64)).collect();
        let params = FusionParams {
            preview_chars: 4,
            ..Default::default()
        };
        let results = fuse(&dense, &[], 3, &params);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].chunk_id, "c9");
        assert!(results.iter().all(|r| r.preview_text == "text"));
        assert_eq!(results[0].text, "text of c9");
        assert_eq!(results[0].source_label, "doc.txt");
    }

    #[test]
    fn test_preview_multibyte() {
        assert_eq!(preview("héllo wörld", 7), "héllo w");
        assert_eq!(preview("short", 100), "short");
        assert_eq!(preview("abc", 0), "");
    }

    #[test]
    fn test_candidate_count() {
        let p = FusionParams::default();
        assert_eq!(p.candidate_count(5), 20);
        let p = FusionParams {
            overfetch_factor: 0,
            ..Default::default()
        };
        assert_eq!(p.candidate_count(5), 5);
    }
}
