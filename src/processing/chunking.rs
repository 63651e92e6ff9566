//! Recursive boundary-aware chunking with verbatim overlap.
//!
//! Highlights:
//!
//! - Boundary preference: separators are tried in configured order (paragraph break, line
//!   break, space, then raw characters by default). A lower-priority separator is only used
//!   inside a span that still exceeds the budget after splitting on the higher one.
//! - Size bound: lengths are measured in chars. Every chunk fits `max_chunk_size` unless the
//!   separator list cannot split an oversized atom (possible only when `""` is not configured).
//! - Overlap: each chunk after the first repeats the last `chunk_overlap` chars of the previous
//!   chunk of the same text unit verbatim, followed by a single space joiner. Piece budgets
//!   reserve room for both so the bound still holds.

use crate::processing::types::{Chunk, ChunkingError, TextUnit};

/// Default maximum chunk length in chars.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
/// Default overlap between adjacent chunks in chars.
pub const DEFAULT_CHUNK_OVERLAP: usize = 150;

/// Separator preference used when none is configured.
pub fn default_separators() -> Vec<String> {
    ["\n\n", "\n", " ", ""]
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// Chunker parameters, fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Upper bound on chunk length (chars).
    pub max_chunk_size: usize,
    /// Number of trailing chars repeated at the head of the next chunk.
    pub chunk_overlap: usize,
    /// Boundary separators in preference order; `""` splits between chars.
    pub separators: Vec<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            separators: default_separators(),
        }
    }
}

/// Splits text units into overlapping, bounded chunks.
#[derive(Debug, Clone)]
pub struct RecursiveChunker {
    config: ChunkingConfig,
    piece_budget: usize,
    joiner: bool,
}

impl RecursiveChunker {
    /// Validate the configuration and derive the per-piece budget.
    pub fn new(config: ChunkingConfig) -> Result<Self, ChunkingError> {
        let max = config.max_chunk_size;
        let overlap = config.chunk_overlap;
        if max == 0 {
            return Err(ChunkingError::InvalidConfig(
                "chunk size must be greater than zero".into(),
            ));
        }
        if overlap >= max {
            return Err(ChunkingError::InvalidConfig(format!(
                "chunk overlap {overlap} must be smaller than chunk size {max}"
            )));
        }

        let (piece_budget, joiner) = if overlap == 0 {
            (max, false)
        } else if max - overlap >= 2 {
            (max - overlap - 1, true)
        } else {
            (max - overlap, false)
        };

        Ok(Self {
            config,
            piece_budget,
            joiner,
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Chunk every unit, keeping each unit's metadata on its chunks.
    pub fn chunk(&self, units: &[TextUnit]) -> Vec<Chunk> {
        units
            .iter()
            .flat_map(|unit| {
                self.split_text(&unit.content)
                    .into_iter()
                    .map(|content| Chunk::new(content, unit.metadata.clone()))
            })
            .collect()
    }

    /// Split a single text into chunk strings.
    ///
    /// Returns an empty vector when the text is all whitespace.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        let mut pieces = Vec::new();
        self.split_pieces(text, &self.config.separators, &mut pieces);
        self.apply_overlap(pieces)
    }

    fn split_pieces(&self, text: &str, separators: &[String], out: &mut Vec<String>) {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }
        if char_len(trimmed) <= self.piece_budget {
            out.push(trimmed.to_string());
            return;
        }

        let Some(position) = separators
            .iter()
            .position(|separator| separator.is_empty() || trimmed.contains(separator.as_str()))
        else {
            out.push(trimmed.to_string());
            return;
        };
        let separator = separators[position].as_str();
        let lower_priority = &separators[position + 1..];

        let parts: Vec<&str> = if separator.is_empty() {
            trimmed
                .char_indices()
                .map(|(index, ch)| &trimmed[index..index + ch.len_utf8()])
                .collect()
        } else {
            trimmed.split(separator).collect()
        };

        let separator_len = char_len(separator);
        let mut current = String::new();
        let mut current_len = 0;

        for part in parts {
            if part.is_empty() {
                continue;
            }
            let part_len = char_len(part);
            if part_len > self.piece_budget {
                flush_piece(&mut current, &mut current_len, out);
                self.split_pieces(part, lower_priority, out);
                continue;
            }
            if current.is_empty() {
                current.push_str(part);
                current_len = part_len;
                continue;
            }

            let candidate_len = current_len + separator_len + part_len;
            if candidate_len <= self.piece_budget {
                current.push_str(separator);
                current.push_str(part);
                current_len = candidate_len;
            } else {
                flush_piece(&mut current, &mut current_len, out);
                current.push_str(part);
                current_len = part_len;
            }
        }

        flush_piece(&mut current, &mut current_len, out);
    }

    fn apply_overlap(&self, pieces: Vec<String>) -> Vec<String> {
        let overlap = self.config.chunk_overlap;
        if overlap == 0 {
            return pieces;
        }

        let mut chunks: Vec<String> = Vec::with_capacity(pieces.len());
        for piece in pieces {
            let next = match chunks.last() {
                None => piece,
                Some(previous) => {
                    let tail = tail_chars(previous, overlap);
                    let mut combined = String::with_capacity(tail.len() + piece.len() + 1);
                    combined.push_str(tail);
                    if self.joiner {
                        combined.push(' ');
                    }
                    combined.push_str(&piece);
                    combined
                }
            };
            chunks.push(next);
        }
        chunks
    }
}

fn flush_piece(current: &mut String, current_len: &mut usize, out: &mut Vec<String>) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
    current.clear();
    *current_len = 0;
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Last `count` chars of `text` (the whole text when shorter).
fn tail_chars(text: &str, count: usize) -> &str {
    if count == 0 {
        return "";
    }
    let total = char_len(text);
    if total <= count {
        return text;
    }
    let start = text
        .char_indices()
        .nth(total - count)
        .map(|(index, _)| index)
        .unwrap_or(0);
    &text[start..]
}
