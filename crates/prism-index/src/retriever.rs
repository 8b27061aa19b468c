//! Read side of the index: similarity search and direct lookups.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use prism_llm::{Embedder, RetryPolicy, call_with_retry};
use serde::Serialize;

use crate::error::{IndexError, Result};
use crate::symbols::SymbolKind;
use crate::types::{RecordContent, RecordMetadata, SearchHit, is_staging, rank_hits};
use crate::vector_store::{StoredPayload, VectorStore, VectorStoreError};

/// Aggregate statistics of one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepositoryOverview {
    pub collection: String,
    pub chunk_count: usize,
    pub file_count: usize,
    /// Files per detected language.
    pub languages: BTreeMap<String, usize>,
    /// Files per extension (`""` for extensionless files).
    pub extensions: BTreeMap<String, usize>,
    /// Distinct definitions; one shared by overlapping chunks counts once.
    pub symbol_count: usize,
    /// Distinct import statements per file.
    pub import_count: usize,
}

/// How closely a record matched a symbol or import query. `Exact` sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Partial,
}

impl MatchKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Partial => "partial",
        }
    }
}

/// A record found by [`Retriever::search_by_symbol`] or [`Retriever::search_by_import`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolMatch {
    pub match_kind: MatchKind,
    #[serde(flatten)]
    pub record: RecordContent,
}

/// Side-effect-free reads over a [`VectorStore`]. Safe to share between
/// concurrent review runs.
pub struct Retriever<E: Embedder> {
    store: Arc<dyn VectorStore>,
    embedder: Arc<E>,
    retry: RetryPolicy,
}

fn map_missing(collection: &str, err: VectorStoreError) -> IndexError {
    match err {
        VectorStoreError::MissingCollection(_) => IndexError::collection_not_found(collection),
        VectorStoreError::Dimension {
            expected, actual, ..
        } => IndexError::DimensionMismatch {
            expected: usize::try_from(expected).unwrap_or(usize::MAX),
            actual: usize::try_from(actual).unwrap_or(usize::MAX),
        },
        other => IndexError::Store(other),
    }
}

impl<E: Embedder> Retriever<E> {
    #[must_use]
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<E>, retry: RetryPolicy) -> Self {
        Self {
            store,
            embedder,
            retry,
        }
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let vector = call_with_retry(&self.retry, "embed_query", || self.embedder.embed(query))
            .await?;
        Ok(vector)
    }

    async fn require_collection(&self, collection: &str) -> Result<()> {
        if is_staging(collection) || !self.store.collection_exists(collection).await? {
            return Err(IndexError::collection_not_found(collection));
        }
        Ok(())
    }

    async fn search_with_vector(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let points = self
            .store
            .search(collection, vector, limit as u64)
            .await
            .map_err(|e| map_missing(collection, e))?;
        let mut hits: Vec<SearchHit> = points
            .into_iter()
            .map(|p| SearchHit::from_payload(p.id, collection, p.score, &p.payload))
            .collect();
        hits.sort_by(rank_hits);
        Ok(hits)
    }

    /// Top `limit` records of `collection` by cosine similarity to `query`.
    ///
    /// Sorted by score descending, ties by `source_path` then `chunk_index`.
    ///
    /// # Errors
    ///
    /// Returns `IndexError::NotFound` for an unknown collection, or an
    /// embedding/store error.
    pub async fn search(
        &self,
        collection: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        self.require_collection(collection).await?;
        if limit == 0 {
            return Ok(Vec::new());
        }
        let vector = self.embed_query(query).await?;
        self.search_with_vector(collection, vector, limit).await
    }

    /// Search every collection and merge by score.
    ///
    /// Up to `per_collection_limit` hits come from each collection; the merged
    /// list is not truncated further.
    ///
    /// # Errors
    ///
    /// Returns an embedding or store error.
    pub async fn search_all(
        &self,
        query: &str,
        per_collection_limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let collections = self.list_collections().await?;
        if collections.is_empty() || per_collection_limit == 0 {
            return Ok(Vec::new());
        }
        let vector = self.embed_query(query).await?;
        let mut merged = Vec::new();
        for collection in &collections {
            match self
                .search_with_vector(collection, vector.clone(), per_collection_limit)
                .await
            {
                Ok(hits) => merged.extend(hits),
                // Removed between listing and searching.
                Err(IndexError::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        merged.sort_by(rank_hits);
        tracing::debug!(collections = collections.len(), hits = merged.len(), "search_all");
        Ok(merged)
    }

    /// Names of all visible collections, sorted.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn list_collections(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .store
            .list_collections()
            .await?
            .into_iter()
            .filter(|n| !is_staging(n))
            .collect();
        names.sort();
        Ok(names)
    }

    async fn payloads(&self, collection: &str) -> Result<Vec<StoredPayload>> {
        self.require_collection(collection).await?;
        self.store
            .scroll_payloads(collection)
            .await
            .map_err(|e| map_missing(collection, e))
    }

    /// Distinct source paths of `collection`, sorted.
    ///
    /// # Errors
    ///
    /// Returns `IndexError::NotFound` for an unknown collection.
    pub async fn list_paths(&self, collection: &str) -> Result<Vec<String>> {
        let paths: BTreeSet<String> = self
            .payloads(collection)
            .await?
            .into_iter()
            .filter_map(|p| {
                p.payload
                    .get("source_path")
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_owned)
            })
            .collect();
        Ok(paths.into_iter().collect())
    }

    async fn lookup(
        &self,
        record_id: &str,
        collection_hint: Option<&str>,
    ) -> Result<(String, StoredPayload)> {
        // Record ids are UUIDs; anything else cannot exist and some backends
        // reject it outright.
        if uuid::Uuid::parse_str(record_id).is_err() {
            return Err(IndexError::record_not_found(record_id));
        }
        let candidates = match collection_hint {
            Some(c) => {
                self.require_collection(c).await?;
                vec![c.to_owned()]
            }
            None => self.list_collections().await?,
        };
        for collection in candidates {
            let found = self
                .store
                .get_by_ids(&collection, vec![record_id.to_owned()])
                .await;
            match found {
                Ok(mut records) => {
                    if let Some(record) = records.pop() {
                        return Ok((collection, record));
                    }
                }
                Err(VectorStoreError::MissingCollection(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Err(IndexError::record_not_found(record_id))
    }

    /// # Errors
    ///
    /// Returns `IndexError::NotFound` if no visible collection holds `record_id`.
    pub async fn get_metadata(
        &self,
        record_id: &str,
        collection_hint: Option<&str>,
    ) -> Result<RecordMetadata> {
        let (collection, record) = self.lookup(record_id, collection_hint).await?;
        Ok(RecordMetadata::from_payload(
            record.id,
            &collection,
            &record.payload,
        ))
    }

    /// # Errors
    ///
    /// Returns `IndexError::NotFound` if no visible collection holds `record_id`.
    pub async fn get_content(
        &self,
        record_id: &str,
        collection_hint: Option<&str>,
    ) -> Result<RecordContent> {
        let (collection, record) = self.lookup(record_id, collection_hint).await?;
        Ok(RecordContent::from_payload(
            record.id,
            &collection,
            &record.payload,
        ))
    }

    /// Scan every record of `collection`, keeping those `classify` accepts,
    /// best match first, then by path and chunk index.
    async fn scan_matches<F>(
        &self,
        collection: &str,
        limit: usize,
        classify: F,
    ) -> Result<Vec<SymbolMatch>>
    where
        F: Fn(&RecordMetadata) -> Option<MatchKind>,
    {
        let payloads = self.payloads(collection).await?;
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut matches: Vec<SymbolMatch> = payloads
            .into_iter()
            .filter_map(|p| {
                let record = RecordContent::from_payload(p.id, collection, &p.payload);
                let match_kind = classify(&record.metadata)?;
                Some(SymbolMatch { match_kind, record })
            })
            .collect();
        matches.sort_by(|a, b| {
            a.match_kind
                .cmp(&b.match_kind)
                .then_with(|| a.record.metadata.source_path.cmp(&b.record.metadata.source_path))
                .then_with(|| a.record.metadata.chunk_index.cmp(&b.record.metadata.chunk_index))
        });
        matches.truncate(limit);
        Ok(matches)
    }

    /// Records defining a symbol called `name`, optionally of one `kind`.
    ///
    /// A definition named exactly `name` is an exact match; one whose name
    /// contains `name` ignoring case is partial.
    ///
    /// # Errors
    ///
    /// Returns `IndexError::InvalidInput` for a blank name and
    /// `IndexError::NotFound` for an unknown collection.
    pub async fn search_by_symbol(
        &self,
        collection: &str,
        name: &str,
        kind: Option<SymbolKind>,
        limit: usize,
    ) -> Result<Vec<SymbolMatch>> {
        let name = name.trim();
        if name.is_empty() {
            return Err(IndexError::InvalidInput("symbol name is empty".into()));
        }
        let lowered = name.to_lowercase();
        let matches = self
            .scan_matches(collection, limit, |meta| {
                meta.symbols
                    .iter()
                    .filter(|s| kind.is_none_or(|k| s.kind == k))
                    .filter_map(|s| {
                        if s.name == name {
                            Some(MatchKind::Exact)
                        } else if s.name.to_lowercase().contains(&lowered) {
                            Some(MatchKind::Partial)
                        } else {
                            None
                        }
                    })
                    .min()
            })
            .await?;
        tracing::debug!(collection, name, ?kind, hits = matches.len(), "search_by_symbol");
        Ok(matches)
    }

    /// Records whose import statements mention `pattern`.
    ///
    /// A case-sensitive substring match is exact; a match only when ignoring
    /// case is partial.
    ///
    /// # Errors
    ///
    /// Returns `IndexError::InvalidInput` for a blank pattern and
    /// `IndexError::NotFound` for an unknown collection.
    pub async fn search_by_import(
        &self,
        collection: &str,
        pattern: &str,
        limit: usize,
    ) -> Result<Vec<SymbolMatch>> {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return Err(IndexError::InvalidInput("import pattern is empty".into()));
        }
        let lowered = pattern.to_lowercase();
        let matches = self
            .scan_matches(collection, limit, |meta| {
                meta.imports
                    .iter()
                    .filter_map(|import| {
                        if import.contains(pattern) {
                            Some(MatchKind::Exact)
                        } else if import.to_lowercase().contains(&lowered) {
                            Some(MatchKind::Partial)
                        } else {
                            None
                        }
                    })
                    .min()
            })
            .await?;
        tracing::debug!(collection, pattern, hits = matches.len(), "search_by_import");
        Ok(matches)
    }

    /// Chunk, file, language, extension, symbol, and import counts of `collection`.
    ///
    /// # Errors
    ///
    /// Returns `IndexError::NotFound` for an unknown collection.
    pub async fn overview(&self, collection: &str) -> Result<RepositoryOverview> {
        let payloads = self.payloads(collection).await?;
        let mut overview = RepositoryOverview {
            collection: collection.to_owned(),
            chunk_count: payloads.len(),
            ..RepositoryOverview::default()
        };
        let mut seen = BTreeSet::new();
        let mut symbols = BTreeSet::new();
        let mut imports = BTreeSet::new();
        for p in &payloads {
            let meta = RecordMetadata::from_payload(p.id.clone(), collection, &p.payload);
            for s in meta.symbols {
                symbols.insert((meta.source_path.clone(), s.kind, s.name, s.line));
            }
            for import in meta.imports {
                imports.insert((meta.source_path.clone(), import));
            }
            if !seen.insert(meta.source_path) {
                continue;
            }
            *overview.extensions.entry(meta.file_extension).or_default() += 1;
            if let Some(lang) = meta.language {
                *overview.languages.entry(lang).or_default() += 1;
            }
        }
        overview.file_count = seen.len();
        overview.symbol_count = symbols.len();
        overview.import_count = imports.len();
        Ok(overview)
    }
}
