//! Chunk and record types shared by the indexer, retriever, and stores.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::symbols::Symbol;

/// Namespace for record identifiers; changing it invalidates every stored id.
const RECORD_NAMESPACE: Uuid = Uuid::from_u128(0x8f1c_52a4_6d0e_4b7a_9c3f_2e61_d5a0_b7c9);

/// Suffix of the hidden collection a refresh is built into before being swapped in.
pub const STAGING_SUFFIX: &str = ".staging";

/// One bounded text segment of a source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub source_path: String,
    pub chunk_index: usize,
    pub text: String,
    /// 1-based, inclusive.
    pub start_line: usize,
    /// 1-based, inclusive.
    pub end_line: usize,
    pub file_extension: String,
    pub content_hash: String,
    /// Definitions whose first line falls inside this chunk.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub symbols: Vec<Symbol>,
    /// Import statements inside this chunk, whitespace-collapsed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub imports: Vec<String>,
}

/// Stable identifier of a chunk, unique across collections.
#[must_use]
pub fn record_id(collection: &str, source_path: &str, chunk_index: usize) -> String {
    let key = format!("{collection}\0{source_path}\0{chunk_index}");
    Uuid::new_v5(&RECORD_NAMESPACE, key.as_bytes()).to_string()
}

#[must_use]
pub fn is_staging(collection: &str) -> bool {
    collection.ends_with(STAGING_SUFFIX)
}

#[must_use]
pub fn staging_name(collection: &str) -> String {
    format!("{collection}{STAGING_SUFFIX}")
}

/// A chunk with its embedding, ready to be written.
#[derive(Debug, Clone)]
pub struct IndexedRecord {
    pub record_id: String,
    pub collection: String,
    pub chunk: Chunk,
    pub language: Option<&'static str>,
    pub embedding_vector: Vec<f32>,
}

impl IndexedRecord {
    #[must_use]
    pub fn new(
        collection: &str,
        chunk: Chunk,
        language: Option<&'static str>,
        embedding_vector: Vec<f32>,
    ) -> Self {
        Self {
            record_id: record_id(collection, &chunk.source_path, chunk.chunk_index),
            collection: collection.to_owned(),
            chunk,
            language,
            embedding_vector,
        }
    }

    /// Payload stored next to the vector.
    #[must_use]
    pub fn payload(&self) -> HashMap<String, serde_json::Value> {
        let c = &self.chunk;
        let mut payload = HashMap::from([
            ("collection".to_owned(), self.collection.clone().into()),
            ("source_path".to_owned(), c.source_path.clone().into()),
            ("chunk_index".to_owned(), c.chunk_index.into()),
            ("start_line".to_owned(), c.start_line.into()),
            ("end_line".to_owned(), c.end_line.into()),
            ("file_extension".to_owned(), c.file_extension.clone().into()),
            ("content_hash".to_owned(), c.content_hash.clone().into()),
            ("text".to_owned(), c.text.clone().into()),
            (
                "symbols".to_owned(),
                c.symbols
                    .iter()
                    .map(|s| {
                        serde_json::json!({"name": s.name, "kind": s.kind.as_str(), "line": s.line})
                    })
                    .collect(),
            ),
            ("imports".to_owned(), c.imports.clone().into()),
        ]);
        if let Some(lang) = self.language {
            payload.insert("language".to_owned(), lang.into());
        }
        payload
    }
}

/// Record fields without the chunk text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub record_id: String,
    pub collection: String,
    pub source_path: String,
    pub chunk_index: usize,
    pub start_line: usize,
    pub end_line: usize,
    pub file_extension: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub symbols: Vec<Symbol>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub imports: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordContent {
    #[serde(flatten)]
    pub metadata: RecordMetadata,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub record_id: String,
    pub collection: String,
    pub source_path: String,
    pub chunk_index: usize,
    pub start_line: usize,
    pub end_line: usize,
    pub score: f32,
    pub text: String,
}

fn str_field(payload: &HashMap<String, serde_json::Value>, key: &str) -> String {
    payload
        .get(key)
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

/// Array field decoded element-wise; entries of the wrong shape are dropped.
fn list_field<T: serde::de::DeserializeOwned>(
    payload: &HashMap<String, serde_json::Value>,
    key: &str,
) -> Vec<T> {
    payload
        .get(key)
        .and_then(serde_json::Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| serde_json::from_value(v.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

fn usize_field(payload: &HashMap<String, serde_json::Value>, key: &str) -> usize {
    payload
        .get(key)
        .and_then(serde_json::Value::as_u64)
        .and_then(|v| usize::try_from(v).ok())
        .unwrap_or_default()
}

impl RecordMetadata {
    pub(crate) fn from_payload(
        record_id: String,
        collection: &str,
        payload: &HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            record_id,
            collection: collection.to_owned(),
            source_path: str_field(payload, "source_path"),
            chunk_index: usize_field(payload, "chunk_index"),
            start_line: usize_field(payload, "start_line"),
            end_line: usize_field(payload, "end_line"),
            file_extension: str_field(payload, "file_extension"),
            language: payload
                .get("language")
                .and_then(serde_json::Value::as_str)
                .map(str::to_owned),
            content_hash: str_field(payload, "content_hash"),
            symbols: list_field(payload, "symbols"),
            imports: list_field(payload, "imports"),
        }
    }
}

impl RecordContent {
    pub(crate) fn from_payload(
        record_id: String,
        collection: &str,
        payload: &HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            metadata: RecordMetadata::from_payload(record_id, collection, payload),
            text: str_field(payload, "text"),
        }
    }
}

impl SearchHit {
    pub(crate) fn from_payload(
        record_id: String,
        collection: &str,
        score: f32,
        payload: &HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            record_id,
            collection: collection.to_owned(),
            source_path: str_field(payload, "source_path"),
            chunk_index: usize_field(payload, "chunk_index"),
            start_line: usize_field(payload, "start_line"),
            end_line: usize_field(payload, "end_line"),
            score,
            text: str_field(payload, "text"),
        }
    }
}

/// Ranking order: score descending, then `source_path`, `chunk_index`, and collection ascending.
pub(crate) fn rank_hits(a: &SearchHit, b: &SearchHit) -> std::cmp::Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.source_path.cmp(&b.source_path))
        .then_with(|| a.chunk_index.cmp(&b.chunk_index))
        .then_with(|| a.collection.cmp(&b.collection))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::SymbolKind;

    fn chunk(path: &str, idx: usize) -> Chunk {
        Chunk {
            source_path: path.into(),
            chunk_index: idx,
            text: "fn main() {}".into(),
            start_line: 1,
            end_line: 1,
            file_extension: "rs".into(),
            content_hash: "h".into(),
            symbols: vec![Symbol {
                name: "main".into(),
                kind: SymbolKind::Function,
                line: 1,
            }],
            imports: vec!["use std::fmt;".into()],
        }
    }

    #[test]
    fn record_id_is_stable() {
        assert_eq!(
            record_id("demo", "src/lib.rs", 0),
            record_id("demo", "src/lib.rs", 0)
        );
    }

    #[test]
    fn record_id_differs_across_collections() {
        assert_ne!(
            record_id("org/a", "src/lib.rs", 0),
            record_id("org/b", "src/lib.rs", 0)
        );
        assert_ne!(record_id("a", "x", 1), record_id("a", "x", 2));
    }

    #[test]
    fn record_id_separator_prevents_collisions() {
        assert_ne!(record_id("a", "b1", 0), record_id("ab", "1", 0));
    }

    #[test]
    fn payload_roundtrips_into_metadata() {
        let rec = IndexedRecord::new("demo", chunk("src/lib.rs", 3), Some("rust"), vec![1.0]);
        let meta = RecordMetadata::from_payload(rec.record_id.clone(), "demo", &rec.payload());
        assert_eq!(meta.source_path, "src/lib.rs");
        assert_eq!(meta.chunk_index, 3);
        assert_eq!(meta.language.as_deref(), Some("rust"));
        assert_eq!(meta.file_extension, "rs");
        assert_eq!(meta.symbols, rec.chunk.symbols);
        assert_eq!(meta.imports, vec!["use std::fmt;"]);
    }

    #[test]
    fn metadata_tolerates_missing_and_malformed_outline() {
        let mut payload = IndexedRecord::new("demo", chunk("a.rs", 0), None, vec![1.0]).payload();
        payload.remove("imports");
        payload.insert(
            "symbols".into(),
            serde_json::json!([{"name": "ok", "kind": "type", "line": 2}, {"name": 5}]),
        );
        let meta = RecordMetadata::from_payload("id".into(), "demo", &payload);
        assert!(meta.imports.is_empty());
        assert_eq!(meta.symbols.len(), 1);
        assert_eq!(meta.symbols[0].kind, SymbolKind::Type);

        let json = serde_json::to_value(&RecordMetadata {
            symbols: Vec::new(),
            ..meta
        })
        .unwrap();
        assert!(json.get("symbols").is_none());
    }

    #[test]
    fn staging_names() {
        assert!(is_staging(&staging_name("org/repo")));
        assert!(!is_staging("org/repo"));
    }

    #[test]
    fn rank_breaks_ties_by_path_then_index() {
        let mk = |path: &str, idx, score| SearchHit {
            record_id: String::new(),
            collection: "c".into(),
            source_path: path.into(),
            chunk_index: idx,
            start_line: 1,
            end_line: 1,
            score,
            text: String::new(),
        };
        let mut hits = vec![mk("b.rs", 0, 0.5), mk("a.rs", 1, 0.5), mk("a.rs", 0, 0.5), mk("z.rs", 0, 0.9)];
        hits.sort_by(rank_hits);
        let order: Vec<_> = hits.iter().map(|h| (h.source_path.as_str(), h.chunk_index)).collect();
        assert_eq!(order, vec![("z.rs", 0), ("a.rs", 0), ("a.rs", 1), ("b.rs", 0)]);
    }
}
