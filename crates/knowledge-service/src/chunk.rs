#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub index: u32,
    pub start: usize,
    pub end: usize,
    pub content: String,
}

#[derive(Debug, Clone, Copy)]
pub struct ChunkParams {
    pub chunk_size_chars: usize,
    pub chunk_overlap_chars: usize,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            chunk_size_chars: 1200,
            chunk_overlap_chars: 200,
        }
    }
}

/// Normalizes whitespace to single spaces, then slides a window of
/// `chunk_size_chars` characters forward by `chunk_size_chars - chunk_overlap_chars`
/// each step. Re-chunking identical input with identical params reproduces
/// identical chunk boundaries and content (§8 chunking idempotence).
pub fn chunk_text(content: &str, params: ChunkParams) -> Vec<TextChunk> {
    let normalized: String = {
        let mut out = String::with_capacity(content.len());
        let mut last_was_space = false;
        for ch in content.trim().chars() {
            if ch.is_whitespace() {
                if !last_was_space {
                    out.push(' ');
                    last_was_space = true;
                }
            } else {
                out.push(ch);
                last_was_space = false;
            }
        }
        out.trim().to_string()
    };

    let chars: Vec<char> = normalized.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }

    let stride = params.chunk_size_chars.saturating_sub(params.chunk_overlap_chars).max(1);
    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut index = 0u32;

    while start < chars.len() {
        let end = (start + params.chunk_size_chars).min(chars.len());
        let slice: String = chars[start..end].iter().collect();
        if !slice.trim().is_empty() {
            chunks.push(TextChunk {
                index,
                start,
                end,
                content: slice,
            });
            index += 1;
        }
        if end == chars.len() {
            break;
        }
        start += stride;
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn short_text_produces_a_single_chunk() {
        let chunks = chunk_text("hello world", ChunkParams::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "hello world");
    }

    #[test]
    fn long_text_slides_with_overlap() {
        let text = "a".repeat(3000);
        let chunks = chunk_text(&text, ChunkParams::default());
        assert!(chunks.len() > 1);
        assert_eq!(chunks[0].end - chunks[0].start, 1200);
        assert_eq!(chunks[1].start, chunks[0].end - 200);
    }

    #[test]
    fn collapses_internal_whitespace() {
        let chunks = chunk_text("hello   \n\n  world", ChunkParams::default());
        assert_eq!(chunks[0].content, "hello world");
    }

    #[test]
    fn rechunking_is_idempotent() {
        let text = "lorem ipsum ".repeat(200);
        let first = chunk_text(&text, ChunkParams::default());
        let second = chunk_text(&text, ChunkParams::default());
        assert_eq!(first, second);
    }

    #[test]
    fn empty_input_produces_no_chunks() {
        assert!(chunk_text("   \n\t  ", ChunkParams::default()).is_empty());
    }

    proptest! {
        // §8 "Chunking idempotence": re-chunking identical input with
        // identical params reproduces identical chunk count and content.
        #[test]
        fn rechunking_arbitrary_input_is_idempotent(
            text in ".{0,500}",
            chunk_size_chars in 10usize..300,
            chunk_overlap_chars in 0usize..10,
        ) {
            let params = ChunkParams { chunk_size_chars, chunk_overlap_chars };
            let first = chunk_text(&text, params);
            let second = chunk_text(&text, params);
            prop_assert_eq!(first, second);
        }
    }
}
