
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{Result, SyncError};

/// How far back from a window's end to look for a sentence terminator
const SENTENCE_SEARCH_WINDOW: usize = 100;

/// Represents a chunk of content ready for embedding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentChunk {
    /// The trimmed chunk text
    pub content: String,
    /// Position of this chunk within the source
    pub chunk_index: usize,
    /// Character offset where the window started
    pub char_start: usize,
    /// Character offset where the window ended (exclusive)
    pub char_end: usize,
    /// Estimated token count
    pub token_count: usize,
}

/// Chunks produced for one source
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChunkedContent {
    pub chunks: Vec<ContentChunk>,
    /// Set when `max_chunks` cut the source short
    pub truncated: bool,
}

/// Configuration for content chunking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Window size in characters
    pub target_chunk_size: usize,
    /// Characters shared between adjacent windows
    pub overlap_size: usize,
    /// Chunks kept per source; the rest are dropped
    pub max_chunks: usize,
    /// Whether to end windows at sentence boundaries when possible
    pub sentence_boundary_splitting: bool,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            target_chunk_size: 1000,
            overlap_size: 200,
            max_chunks: 256,
            sentence_boundary_splitting: true,
        }
    }
}

/// Split content into overlapping character windows.
///
/// Each window spans `target_chunk_size` characters. When sentence splitting
/// is enabled and the window does not reach the end of the text, the window
/// is shortened to end just after the last `.`, `!` or `?` found within the
/// final 100 characters, but never before the middle of the window. The next
/// window starts `overlap_size` characters before the previous one ended.
#[inline]
pub fn chunk_content(content: &str, config: &ChunkingConfig) -> Result<ChunkedContent> {
    if content.trim().is_empty() {
        return Err(SyncError::PermanentContent(
            "content is empty or whitespace only".to_string(),
        ));
    }

    let chars: Vec<char> = content.chars().collect();
    let len = chars.len();
    let size = config.target_chunk_size.max(1);
    let max_chunks = config.max_chunks.max(1);

    let mut chunks = Vec::new();
    let mut truncated = false;
    let mut start = 0;

    while start < len {
        let mut end = (start + size).min(len);

        if end < len && config.sentence_boundary_splitting {
            if let Some(boundary) = find_sentence_end(&chars, start, end, size) {
                end = boundary;
            }
        }

        let text: String = chars[start..end].iter().collect();
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            if chunks.len() == max_chunks {
                truncated = true;
                break;
            }
            chunks.push(ContentChunk {
                content: trimmed.to_string(),
                chunk_index: chunks.len(),
                char_start: start,
                char_end: end,
                token_count: estimate_token_count(trimmed),
            });
        }

        if end >= len {
            break;
        }
        start = end.saturating_sub(config.overlap_size).max(start + 1);
    }

    if truncated {
        warn!(
            "Content of {} characters exceeds {} chunks; remaining text was not indexed",
            len, max_chunks
        );
    }

    debug!(
        "Chunked {} characters into {} chunks (avg {} tokens)",
        len,
        chunks.len(),
        chunks.iter().map(|c| c.token_count).sum::<usize>() / chunks.len().max(1)
    );

    Ok(ChunkedContent { chunks, truncated })
}

/// Exclusive end index just past the last sentence terminator near `end`
fn find_sentence_end(chars: &[char], start: usize, end: usize, size: usize) -> Option<usize> {
    let floor = (start + size / 2).max(end.saturating_sub(SENTENCE_SEARCH_WINDOW));
    (floor..end)
        .rev()
        .find(|&i| matches!(chars[i], '.' | '!' | '?'))
        .map(|i| i + 1)
}

/// Estimate token count using a simple heuristic
/// This is a rough approximation - actual tokenization would be more accurate
#[inline]
pub fn estimate_token_count(text: &str) -> usize {
    // Rough heuristic: 1 token ≈ 0.75 words for English text
    // Add extra tokens for punctuation and special characters
    let word_count = text.split_whitespace().count();
    let punct_count = text.chars().filter(|c| c.is_ascii_punctuation()).count();

    (punct_count as f64).mul_add(0.1, word_count as f64 / 0.75) as usize
}
