//! Contextualized embedding text generation.
//!
//! Prepending the file path, language, definitions, and imports to the raw
//! chunk noticeably improves matches for conceptual queries like "where is
//! auth handled?".

use crate::types::Chunk;

/// Generate text optimized for embedding (not for display).
#[must_use]
pub fn contextualize_for_embedding(chunk: &Chunk, language: Option<&str>) -> String {
    let mut text = String::with_capacity(chunk.text.len() + 128);

    text.push_str("# ");
    text.push_str(&chunk.source_path);
    text.push('\n');

    if let Some(lang) = language {
        text.push_str("# Language: ");
        text.push_str(lang);
        text.push('\n');
    }

    if !chunk.symbols.is_empty() {
        text.push_str("# Defines: ");
        for (i, symbol) in chunk.symbols.iter().enumerate() {
            if i > 0 {
                text.push_str(", ");
            }
            text.push_str(&symbol.name);
        }
        text.push('\n');
    }

    for import in &chunk.imports {
        text.push_str("# ");
        text.push_str(import);
        text.push('\n');
    }

    text.push_str(&chunk.text);
    text
}
