//! BM25-style sparse encoding.
//!
//! A [`SparseEncoder`] turns text into a [`SparseVector`] of term weights.
//! Documents and queries are encoded asymmetrically, as in BM25:
//!
//! - **document**: each term gets the saturated term-frequency component
//!   `tf·(k1+1) / (tf + k1·(1 − b + b·dl/avgdl))`
//! - **query**: each term gets its share of the query, `tf / Σtf`
//!
//! The dot product of a query vector and a document vector is then a
//! BM25-like relevance score. Encoding is a pure function of the text and
//! the parameters, so ingestion and query time always agree.

use crate::models::SparseVector;

/// Keyword-scoring encoder used symmetrically by ingestion and search.
pub trait SparseEncoder: Send + Sync {
    /// Encode a chunk of document text.
    fn encode_document(&self, text: &str) -> SparseVector;
    /// Encode a search query.
    fn encode_query(&self, text: &str) -> SparseVector;
}

/// BM25 tuning parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm25Params {
    pub k1: f32,
    pub b: f32,
    /// Expected document length in tokens.
    pub avg_doc_len: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self {
            k1: 1.2,
            b: 0.75,
            avg_doc_len: 200.0,
        }
    }
}

/// Stateless BM25 encoder.
#[derive(Debug, Clone, Default)]
pub struct Bm25Encoder {
    params: Bm25Params,
}

impl Bm25Encoder {
    pub fn new(params: Bm25Params) -> Self {
        Self { params }
    }
}

impl SparseEncoder for Bm25Encoder {
    fn encode_document(&self, text: &str) -> SparseVector {
        let terms = term_counts(text);
        let dl: f32 = terms.values().sum();
        if dl == 0.0 {
            return SparseVector::new();
        }
        let Bm25Params { k1, b, avg_doc_len } = self.params;
        let norm = k1 * (1.0 - b + b * dl / avg_doc_len.max(1.0));
        terms
            .into_iter()
            .map(|(term, tf)| (term, tf * (k1 + 1.0) / (tf + norm)))
            .collect()
    }

    fn encode_query(&self, text: &str) -> SparseVector {
        let terms = term_counts(text);
        let total: f32 = terms.values().sum();
        if total == 0.0 {
            return SparseVector::new();
        }
        terms
            .into_iter()
            .map(|(term, tf)| (term, tf / total))
            .collect()
    }
}

fn term_counts(text: &str) -> SparseVector {
    let mut counts = SparseVector::new();
    for term in content_terms(text) {
        *counts.entry(term).or_insert(0.0) += 1.0;
    }
    counts
}

/// Dot product of two sparse vectors.
pub fn sparse_dot(a: &SparseVector, b: &SparseVector) -> f32 {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    small
        .iter()
        .filter_map(|(term, w)| large.get(term).map(|v| w * v))
        .sum()
}

/// Lowercased alphanumeric words, in order of appearance.
pub fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '\'')
        .map(|w| w.trim_matches('\'').to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Words that carry meaning: [`words`] minus stopwords and single letters.
pub fn content_terms(text: &str) -> Vec<String> {
    words(text)
        .into_iter()
        .filter(|w| w.chars().count() > 1 || w.chars().all(|c| c.is_numeric()))
        .filter(|w| !is_stopword(w))
        .collect()
}

pub fn is_stopword(word: &str) -> bool {
    STOPWORDS.binary_search(&word).is_ok()
}

// Sorted for binary search.
const STOPWORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "all", "am", "an", "and", "any", "are", "as", "at",
    "be", "because", "been", "before", "being", "below", "between", "both", "but", "by", "can",
    "could", "did", "do", "does", "doing", "down", "during", "each", "few", "for", "from",
    "further", "had", "has", "have", "having", "he", "her", "here", "hers", "him", "his", "how",
    "i", "i'm", "if", "in", "into", "is", "it", "it's", "its", "just", "me", "more", "most", "my",
    "no", "nor", "not", "now", "of", "off", "on", "once", "only", "or", "other", "our", "ours",
    "out", "over", "own", "same", "she", "should", "so", "some", "such", "than", "that", "the",
    "their", "them", "then", "there", "these", "they", "this", "those", "through", "to", "too",
    "under", "until", "up", "very", "was", "we", "were", "what", "what's", "when", "where",
    "which", "while", "who", "whom", "why", "will", "with", "would", "you", "your", "yours",
];
