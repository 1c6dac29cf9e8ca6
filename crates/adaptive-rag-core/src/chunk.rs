//! Overlapping-window text chunker.
//!
//! Splits a document's normalized text into [`Chunk`]s of at most
//! `chunk_size` characters, where consecutive chunks share at most
//! `chunk_overlap` characters.
//!
//! # Algorithm
//!
//! 1. Start a window at `start`; if the rest of the text fits, emit it and stop.
//! 2. Otherwise look for a cut inside `[start + min_fill, start + chunk_size]`,
//!    preferring, in order: a paragraph break (`\n\n`), a sentence end
//!    (`.`/`!`/`?` followed by whitespace), any whitespace. Fall back to a
//!    hard cut at `start + chunk_size`.
//! 3. The next window starts `chunk_overlap` characters before the cut,
//!    moved forward to the first word start inside the overlap. If the
//!    overlap holds no word start, the next window starts at the cut.
//!
//! `min_fill` is at least `chunk_overlap + 1`, so every window advances.
//! Offsets are counted in characters, not bytes, so multi-byte text is
//! never split inside a code point.
//!
//! # Example
//!
//! ```rust
//! use adaptive_rag_core::chunk::{chunk_text, ChunkParams};
//!
//! let params = ChunkParams { chunk_size: 1000, chunk_overlap: 200 };
//! let chunks = chunk_text("doc-123", "Hello world.\n\nSecond paragraph.", &params);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].ordinal, 0);
//! ```

use uuid::Uuid;

use crate::models::Chunk;

/// Window size and overlap, both in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

/// Split `text` into overlapping chunks with contiguous ordinals starting at 0.
///
/// Returns an empty vector when `text` is empty or whitespace-only.
/// The result is a pure function of `(document_id, text, params)`: chunk ids
/// are derived from the document id and ordinal.
pub fn chunk_text(document_id: &str, text: &str, params: &ChunkParams) -> Vec<Chunk> {
    let content = text.trim_end();
    if content.trim_start().is_empty() {
        return Vec::new();
    }

    let size = params.chunk_size.max(1);
    let overlap = params.chunk_overlap.min(size - 1);
    let min_fill = (overlap + 1).max(size / 2);

    let chars: Vec<char> = content.chars().collect();
    let offsets: Vec<usize> = content
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(content.len()))
        .collect();
    let n = chars.len();

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut ordinal = 0u32;

    loop {
        let end = if n - start <= size {
            n
        } else {
            find_cut(&chars, start + min_fill, start + size)
        };

        chunks.push(make_chunk(
            document_id,
            ordinal,
            &content[offsets[start]..offsets[end]],
            start,
            end,
        ));

        if end >= n {
            break;
        }
        ordinal += 1;
        start = next_start(&chars, start, end, overlap);
    }

    chunks
}

/// Pick the cut position in `[lo, hi]`. `hi < chars.len()` holds for every caller.
fn find_cut(chars: &[char], lo: usize, hi: usize) -> usize {
    let range = || (lo..=hi).rev();

    // Paragraph: cut right before a blank line.
    if let Some(p) = range().find(|&p| chars[p] == '\n' && chars.get(p + 1) == Some(&'\n')) {
        return p;
    }

    // Sentence: cut right after terminal punctuation that is followed by whitespace.
    if let Some(p) = range().find(|&p| {
        p > 0 && matches!(chars[p - 1], '.' | '!' | '?') && chars[p].is_whitespace()
    }) {
        return p;
    }

    // Word: cut right before any whitespace.
    if let Some(p) = range().find(|&p| chars[p].is_whitespace()) {
        return p;
    }

    hi
}

/// Start of the window after `[start, end)`. Always in `(start, end]`.
fn next_start(chars: &[char], start: usize, end: usize, overlap: usize) -> usize {
    if overlap == 0 {
        return end;
    }
    let raw = end - overlap;
    if let Some(q) = (raw..end)
        .find(|&q| q > start && chars[q - 1].is_whitespace() && !chars[q].is_whitespace())
    {
        return q;
    }
    // No word starts inside the overlap: give up the overlap rather than
    // begin mid-word, unless the cut itself was a hard cut.
    if chars[end].is_whitespace() || chars[end - 1].is_whitespace() {
        end
    } else {
        raw
    }
}

fn make_chunk(document_id: &str, ordinal: u32, text: &str, start: usize, end: usize) -> Chunk {
    Chunk {
        id: chunk_id(document_id, ordinal),
        document_id: document_id.to_string(),
        ordinal,
        text: text.to_string(),
        char_start: start,
        char_end: end,
    }
}

/// Deterministic chunk id: UUIDv5 over `"{document_id}:{ordinal}"`.
pub fn chunk_id(document_id: &str, ordinal: u32) -> String {
    Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{}:{}", document_id, ordinal).as_bytes(),
    )
    .to_string()
}

/// Character-offset slice of `text`, used to check chunk positions.
pub fn char_slice(text: &str, start: usize, end: usize) -> String {
    text.chars().skip(start).take(end.saturating_sub(start)).collect()
}
