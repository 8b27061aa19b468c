//! Collection ingestion orchestrator: filter → chunk → embed → store.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use prism_llm::{Embedder, RetryPolicy, call_with_retry};
use serde::Serialize;

use crate::chunker::{ChunkerConfig, chunk_file};
use crate::context::contextualize_for_embedding;
use crate::error::{IndexError, Result};
use crate::filter::{FileFilter, detect_language};
use crate::source::SourceFile;
use crate::types::{IndexedRecord, is_staging, staging_name};
use crate::vector_store::{VectorPoint, VectorStore};

/// Indexer configuration.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub chunker: ChunkerConfig,
    pub filter: FileFilter,
    pub retry: RetryPolicy,
    /// Maximum texts per embedding request.
    pub embed_batch_size: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            chunker: ChunkerConfig::default(),
            filter: FileFilter::default(),
            retry: RetryPolicy::default(),
            embed_batch_size: 32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedFile {
    pub path: String,
    pub error: String,
}

/// Summary of an ingestion run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub collection: String,
    pub files_seen: usize,
    pub files_indexed: usize,
    pub files_skipped: usize,
    pub files_failed: Vec<FailedFile>,
    pub chunks_written: usize,
    /// The collection existed and no refresh was requested; nothing was written.
    pub already_present: bool,
    pub duration_ms: u64,
}

/// Writes collections. At most one ingestion runs per collection name.
pub struct Indexer<E: Embedder> {
    store: Arc<dyn VectorStore>,
    embedder: Arc<E>,
    config: IndexerConfig,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

fn validate_collection_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(IndexError::InvalidInput("collection name is empty".into()));
    }
    if is_staging(name) {
        return Err(IndexError::InvalidInput(format!(
            "collection name {name:?} uses a reserved suffix"
        )));
    }
    Ok(())
}

impl<E: Embedder> Indexer<E> {
    /// # Errors
    ///
    /// Returns `IndexError::InvalidInput` if the chunker configuration is invalid.
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<E>, config: IndexerConfig) -> Result<Self> {
        config.chunker.validate()?;
        Ok(Self {
            store,
            embedder,
            config,
            locks: Mutex::new(HashMap::new()),
        })
    }

    fn collection_lock(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(name.to_owned()).or_default())
    }

    /// Ingest `files` into `collection`.
    ///
    /// Without `refresh` an existing collection is left untouched. With
    /// `refresh` the collection is rebuilt from `files` alone; on stores that
    /// support swapping, the rebuild happens in a staging collection and
    /// replaces the live one only once every file has been processed.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid collection name or a vector store
    /// failure. Per-file embedding failures are reported in
    /// [`IngestReport::files_failed`] instead.
    pub async fn ingest(
        &self,
        collection: &str,
        files: &[SourceFile],
        refresh: bool,
    ) -> Result<IngestReport> {
        validate_collection_name(collection)?;
        let lock = self.collection_lock(collection);
        let _guard = lock.lock().await;

        let start = Instant::now();
        let mut report = IngestReport {
            collection: collection.to_owned(),
            ..IngestReport::default()
        };

        let exists = self.store.collection_exists(collection).await?;
        if exists && !refresh {
            report.files_seen = files.len();
            report.already_present = true;
            report.duration_ms = elapsed_ms(start);
            tracing::info!(collection, "collection already indexed, skipping");
            return Ok(report);
        }

        let target = if exists && self.store.supports_swap() {
            let staging = staging_name(collection);
            self.store.delete_collection(&staging).await?;
            staging
        } else {
            if exists {
                tracing::warn!(
                    collection,
                    "store cannot swap collections; collection is unavailable until the rebuild completes"
                );
                self.store.delete_collection(collection).await?;
            }
            collection.to_owned()
        };

        let total = files.len();
        tracing::info!(collection, total, refresh, "ingestion started");

        let mut dimension: Option<usize> = None;
        for (i, file) in files.iter().enumerate() {
            report.files_seen += 1;
            if let Err(reason) = self.config.filter.check(&file.path, file.size_bytes) {
                tracing::debug!(path = %file.path, ?reason, "file skipped");
                report.files_skipped += 1;
                continue;
            }

            match self.index_file(collection, &target, file, &mut dimension).await {
                Ok(0) => report.files_skipped += 1,
                Ok(written) => {
                    report.files_indexed += 1;
                    report.chunks_written += written;
                    tracing::debug!(
                        path = %file.path,
                        progress = format_args!("{}/{total}", i + 1),
                        written,
                    );
                }
                Err(e @ (IndexError::Embedding { .. } | IndexError::DimensionMismatch { .. })) => {
                    tracing::warn!(path = %file.path, error = %e, "file failed, continuing");
                    report.files_failed.push(FailedFile {
                        path: file.path.clone(),
                        error: e.to_string(),
                    });
                }
                Err(e) => {
                    if target != collection
                        && let Err(cleanup) = self.store.delete_collection(&target).await
                    {
                        tracing::warn!(
                            collection,
                            staging = %target,
                            error = %cleanup,
                            "failed to remove staging collection"
                        );
                    }
                    return Err(e);
                }
            }
        }

        if target != collection {
            if self.store.collection_exists(&target).await? {
                self.store.swap_collection(&target, collection).await?;
            } else {
                self.store.delete_collection(collection).await?;
            }
        }

        report.duration_ms = elapsed_ms(start);
        tracing::info!(
            collection,
            files_seen = report.files_seen,
            files_indexed = report.files_indexed,
            files_skipped = report.files_skipped,
            files_failed = report.files_failed.len(),
            chunks_written = report.chunks_written,
            duration_ms = report.duration_ms,
            "ingestion finished"
        );
        Ok(report)
    }

    async fn index_file(
        &self,
        collection: &str,
        target: &str,
        file: &SourceFile,
        dimension: &mut Option<usize>,
    ) -> Result<usize> {
        let chunks = chunk_file(&file.path, &file.content, &self.config.chunker);
        if chunks.is_empty() {
            return Ok(0);
        }
        let language = detect_language(Path::new(&file.path));
        let texts: Vec<String> = chunks
            .iter()
            .map(|c| contextualize_for_embedding(c, language))
            .collect();

        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.embed_batch_size.max(1)) {
            let embedded = call_with_retry(&self.config.retry, "embed_batch", || {
                self.embedder.embed_batch(batch)
            })
            .await?;
            if embedded.len() != batch.len() {
                return Err(IndexError::Embedding {
                    source: prism_llm::LlmError::MalformedResponse(format!(
                        "{} vectors for {} texts",
                        embedded.len(),
                        batch.len()
                    )),
                    retries: 0,
                });
            }
            vectors.extend(embedded);
        }

        let expected = match *dimension {
            Some(d) => d,
            None => {
                let d = vectors.first().map_or(0, Vec::len);
                self.store.ensure_collection(target, d as u64).await?;
                *dimension = Some(d);
                d
            }
        };
        if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
            return Err(IndexError::DimensionMismatch {
                expected,
                actual: bad.len(),
            });
        }

        let points: Vec<VectorPoint> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| {
                let record = IndexedRecord::new(collection, chunk, language, vector);
                VectorPoint {
                    payload: record.payload(),
                    id: record.record_id,
                    vector: record.embedding_vector,
                }
            })
            .collect();
        let written = points.len();
        self.store.upsert(target, points).await?;
        Ok(written)
    }

    /// Delete a collection and any leftover staging copy.
    ///
    /// # Errors
    ///
    /// Returns `IndexError::NotFound` if the collection does not exist.
    pub async fn remove_collection(&self, collection: &str) -> Result<()> {
        validate_collection_name(collection)?;
        let lock = self.collection_lock(collection);
        let _guard = lock.lock().await;

        if !self.store.collection_exists(collection).await? {
            return Err(IndexError::collection_not_found(collection));
        }
        self.store.delete_collection(collection).await?;
        self.store
            .delete_collection(&staging_name(collection))
            .await?;
        tracing::info!(collection, "collection removed");
        Ok(())
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis().try_into().unwrap_or(u64::MAX)
}
