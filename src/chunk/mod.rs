//! Text chunking
//!
//! Splits cleaned document text into overlapping chunks while:
//! - Preferring sentence and paragraph boundaries over hard cuts
//! - Providing stable, deterministic chunk boundaries
//! - Computing content hashes for idempotent re-ingestion

use crate::config::ChunkConfig;
use crate::error::{Error, Result};
use blake3::Hasher;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::sync::LazyLock;
use unicode_segmentation::UnicodeSegmentation;

/// A text chunk with its position in the source document
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    /// The trimmed chunk text
    pub text: String,

    /// Byte start position of the untrimmed slice in the source
    pub char_start: usize,

    /// Byte end position of the untrimmed slice in the source
    pub char_end: usize,

    /// Chunk index (0-based, contiguous per document)
    pub index: usize,
}

impl TextChunk {
    /// Blake3 hash of the chunk text
    pub fn hash(&self) -> String {
        compute_text_hash(&self.text)
    }

    /// Per-chunk metadata map stored alongside the chunk.
    ///
    /// Document-level metadata is nested under `source_metadata` so chunk
    /// fields never collide with loader-supplied keys.
    pub fn metadata(&self, source_metadata: &Map<String, Value>) -> Map<String, Value> {
        let mut meta = Map::new();
        meta.insert("chunk_index".to_string(), json!(self.index));
        meta.insert("chunk_size".to_string(), json!(self.text.len()));
        meta.insert(
            "word_count".to_string(),
            json!(self.text.unicode_words().count()),
        );
        meta.insert("chunk_hash".to_string(), json!(self.hash()));
        if !source_metadata.is_empty() {
            meta.insert(
                "source_metadata".to_string(),
                Value::Object(source_metadata.clone()),
            );
        }
        meta
    }
}

/// Split text into overlapping chunks.
///
/// The cursor walks the text in windows of `max_chars`. When the window end
/// is interior to the text, a sentence terminator is searched backward within
/// the last 30% of the window, then a paragraph break within the last 50%;
/// the naive window end is the fallback. The cursor then advances to
/// `end - overlap_chars`, clamped to strict forward progress so chunking
/// terminates for every valid configuration.
///
/// Identical input and configuration always reproduce identical output.
pub fn chunk_text(text: &str, config: &ChunkConfig) -> Result<Vec<TextChunk>> {
    if config.overlap_chars >= config.max_chars {
        return Err(Error::Config(format!(
            "chunk overlap ({}) must be smaller than max chunk size ({})",
            config.overlap_chars, config.max_chars
        )));
    }

    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    if text.len() <= config.max_chars {
        return Ok(vec![TextChunk {
            text: text.trim().to_string(),
            char_start: 0,
            char_end: text.len(),
            index: 0,
        }]);
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut index = 0usize;

    while start < text.len() {
        let end = if start + config.max_chars >= text.len() {
            text.len()
        } else {
            let naive_end = ensure_char_boundary(text, start + config.max_chars);
            find_break(text, start, naive_end, config)
        };
        let end = ensure_char_boundary(text, end);

        let slice = text[start..end].trim();
        if !slice.is_empty() {
            chunks.push(TextChunk {
                text: slice.to_string(),
                char_start: start,
                char_end: end,
                index,
            });
            index += 1;
        }

        if end >= text.len() {
            break;
        }

        // Overlap step, clamped to strict progress: a boundary pulled back
        // toward 50% of the window combined with a large overlap could
        // otherwise move the cursor backward and loop forever.
        let next = ensure_char_boundary(text, end.saturating_sub(config.overlap_chars));
        start = if next > start { next } else { end };
    }

    Ok(chunks)
}

/// Find the best break position in `start..naive_end`
fn find_break(text: &str, start: usize, naive_end: usize, config: &ChunkConfig) -> usize {
    let window = &text[start..naive_end];

    // Sentence terminator within the last 30% of the window
    let sentence_floor = start + (config.max_chars * 7) / 10;
    if let Some(pos) = window.rfind(['.', '!', '?']) {
        let abs = start + pos;
        if abs > sentence_floor {
            return abs + 1;
        }
    }

    // Paragraph break within the last 50%
    let paragraph_floor = start + config.max_chars / 2;
    if let Some(pos) = window.rfind("\n\n") {
        let abs = start + pos;
        if abs > paragraph_floor {
            return abs + 2;
        }
    }

    naive_end
}

/// Ensure a position is on a valid UTF-8 character boundary
fn ensure_char_boundary(text: &str, pos: usize) -> usize {
    if pos >= text.len() {
        return text.len();
    }
    let mut adjusted = pos;
    while adjusted > 0 && !text.is_char_boundary(adjusted) {
        adjusted -= 1;
    }
    adjusted
}

static CONTROL_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\x00-\x08\x0B\x0C\x0E-\x1F\x7F]").unwrap());
static HORIZONTAL_WS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+").unwrap());
static NEWLINE_WS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]*\n[ \t]*").unwrap());
static EXCESS_NEWLINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// Clean and normalize raw document text before chunking.
///
/// Collapses runs of horizontal whitespace, reduces three or more newlines
/// to a paragraph break, and strips control characters. Paragraph structure
/// is preserved because the chunker breaks on it.
pub fn clean_text(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let text = CONTROL_CHARS.replace_all(text, "");
    let text = HORIZONTAL_WS.replace_all(&text, " ");
    let text = NEWLINE_WS.replace_all(&text, "\n");
    let text = EXCESS_NEWLINES.replace_all(&text, "\n\n");
    text.trim().to_string()
}

/// Compute a stable hash for byte content
pub fn compute_content_hash(content: &[u8]) -> String {
    let mut hasher = Hasher::new();
    hasher.update(content);
    hasher.finalize().to_hex().to_string()
}

/// Compute a stable hash for a string
pub fn compute_text_hash(text: &str) -> String {
    compute_content_hash(text.as_bytes())
}
