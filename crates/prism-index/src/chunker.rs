//! Line-window chunking with overlap.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::symbols::{FileOutline, extract_outline};
use crate::types::Chunk;

/// Chunker configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    /// Maximum chunk size in characters (default: 4000).
    pub max_chars: usize,
    /// Characters of trailing context repeated at the start of the next chunk (default: 400).
    pub overlap_chars: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chars: 4000,
            overlap_chars: 400,
        }
    }
}

impl ChunkerConfig {
    /// # Errors
    ///
    /// Returns `IndexError::InvalidInput` if `max_chars` is zero or the overlap
    /// is not smaller than `max_chars`.
    pub fn validate(&self) -> Result<()> {
        if self.max_chars == 0 {
            return Err(IndexError::InvalidInput("max_chars must be > 0".into()));
        }
        if self.overlap_chars >= self.max_chars {
            return Err(IndexError::InvalidInput(format!(
                "overlap_chars ({}) must be smaller than max_chars ({})",
                self.overlap_chars, self.max_chars
            )));
        }
        Ok(())
    }
}

/// A line, or a slice of an overlong line, with its 1-based line number.
struct Piece<'a> {
    text: &'a str,
    line: usize,
    chars: usize,
}

fn split_pieces(content: &str, max_chars: usize) -> Vec<Piece<'_>> {
    let mut pieces = Vec::new();
    for (idx, line) in content.split_inclusive('\n').enumerate() {
        let chars = line.chars().count();
        if chars <= max_chars {
            pieces.push(Piece {
                text: line,
                line: idx + 1,
                chars,
            });
            continue;
        }
        let mut rest = line;
        while !rest.is_empty() {
            let cut = rest
                .char_indices()
                .nth(max_chars)
                .map_or(rest.len(), |(i, _)| i);
            let (head, tail) = rest.split_at(cut);
            pieces.push(Piece {
                text: head,
                line: idx + 1,
                chars: head.chars().count(),
            });
            rest = tail;
        }
    }
    pieces
}

fn extension_of(path: &str) -> String {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default()
}

fn make_chunk(
    path: &str,
    ext: &str,
    index: usize,
    pieces: &[Piece<'_>],
    outline: &FileOutline,
) -> Chunk {
    let text: String = pieces.iter().map(|p| p.text).collect();
    let content_hash = blake3::hash(text.as_bytes()).to_hex().to_string();
    let start_line = pieces.first().map_or(1, |p| p.line);
    let end_line = pieces.last().map_or(1, |p| p.line);
    let lines = start_line..=end_line;
    Chunk {
        source_path: path.to_owned(),
        chunk_index: index,
        start_line,
        end_line,
        file_extension: ext.to_owned(),
        content_hash,
        text,
        symbols: outline
            .symbols
            .iter()
            .filter(|s| lines.contains(&s.line))
            .cloned()
            .collect(),
        imports: outline
            .imports
            .iter()
            .filter(|i| lines.contains(&i.line))
            .map(|i| i.text.clone())
            .collect(),
    }
}

/// Split `content` into overlapping chunks of whole lines.
///
/// Whitespace-only content yields no chunks; content of at most `max_chars`
/// characters yields exactly one. Lines are only split when a single line is
/// longer than `max_chars`. Each chunk carries the definitions and imports
/// that start on its lines, so overlapping chunks may share them. The result
/// depends on nothing but the inputs.
#[must_use]
pub fn chunk_file(path: &str, content: &str, config: &ChunkerConfig) -> Vec<Chunk> {
    if content.trim().is_empty() {
        return Vec::new();
    }
    let ext = extension_of(path);
    let max_chars = config.max_chars.max(1);
    let pieces = split_pieces(content, max_chars);
    let outline = extract_outline(path, content);

    let mut chunks = Vec::new();
    let mut start = 0usize;
    while start < pieces.len() {
        let mut end = start;
        let mut size = 0usize;
        while end < pieces.len() && (end == start || size + pieces[end].chars <= max_chars) {
            size += pieces[end].chars;
            end += 1;
        }

        chunks.push(make_chunk(
            path,
            &ext,
            chunks.len(),
            &pieces[start..end],
            &outline,
        ));
        if end == pieces.len() {
            break;
        }

        // Carry trailing pieces into the next window, never the whole window.
        let mut next = end;
        let mut carried = 0usize;
        while next > start + 1 && carried + pieces[next - 1].chars <= config.overlap_chars {
            carried += pieces[next - 1].chars;
            next -= 1;
        }
        start = next;
    }

    tracing::debug!(path, chunks = chunks.len(), "chunked file");
    chunks
}
