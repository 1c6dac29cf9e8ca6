use adaptive_rag_core::chunk::{char_slice, chunk_text, ChunkParams};
use proptest::prelude::*;

fn params() -> impl Strategy<Value = ChunkParams> {
    (1usize..120).prop_flat_map(|size| {
        (Just(size), 0usize..size).prop_map(|(chunk_size, chunk_overlap)| ChunkParams {
            chunk_size,
            chunk_overlap,
        })
    })
}

proptest! {
    #[test]
    fn ordinals_are_contiguous_from_zero(text in "[a-zA-Z .!?\n]{0,600}", p in params()) {
        let chunks = chunk_text("doc", &text, &p);
        for (i, c) in chunks.iter().enumerate() {
            prop_assert_eq!(c.ordinal, i as u32);
        }
    }

    #[test]
    fn windows_cover_text_without_gaps(text in "[a-z .\n]{1,600}", p in params()) {
        let chunks = chunk_text("doc", &text, &p);
        let content_len = text.trim_end().chars().count();
        if text.trim().is_empty() {
            prop_assert!(chunks.is_empty());
        } else {
            prop_assert_eq!(chunks[0].char_start, 0);
            prop_assert_eq!(chunks.last().unwrap().char_end, content_len);
        }
        for w in chunks.windows(2) {
            prop_assert!(w[1].char_start > w[0].char_start);
            prop_assert!(w[1].char_start <= w[0].char_end);
            prop_assert!(w[0].char_end - w[1].char_start <= p.chunk_overlap);
        }
    }

    #[test]
    fn chunks_are_exact_bounded_slices(text in "[a-zé日 .\n]{0,400}", p in params()) {
        for c in chunk_text("doc", &text, &p) {
            prop_assert!(c.char_end - c.char_start <= p.chunk_size);
            prop_assert_eq!(&c.text, &char_slice(&text, c.char_start, c.char_end));
        }
    }

    #[test]
    fn chunking_is_a_pure_function(text in ".{0,300}", p in params()) {
        let a = chunk_text("doc", &text, &p);
        let b = chunk_text("doc", &text, &p);
        prop_assert_eq!(a, b);
    }
}
