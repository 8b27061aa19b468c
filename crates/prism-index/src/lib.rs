//! Repository chunking, embedding ingestion, and semantic retrieval.
//!
//! Source files are split into overlapping line windows, embedded, and stored
//! as records in a [`VectorStore`] collection. Each record also carries the
//! definitions and imports tree-sitter finds in its lines. A [`Retriever`]
//! serves similarity search, symbol and import search, and direct record
//! lookups over those collections.

pub mod chunker;
pub(crate) mod context;
pub mod error;
pub mod filter;
pub mod in_memory_store;
pub mod indexer;
pub mod qdrant_store;
pub mod retriever;
pub mod source;
pub mod symbols;
pub mod types;
pub mod vector_store;

pub use chunker::{ChunkerConfig, chunk_file};
pub use error::{IndexError, Result};
pub use filter::{FileFilter, SkipReason, detect_language, is_indexable};
pub use in_memory_store::InMemoryVectorStore;
pub use indexer::{FailedFile, Indexer, IndexerConfig, IngestReport};
pub use qdrant_store::QdrantVectorStore;
pub use retriever::{MatchKind, RepositoryOverview, Retriever, SymbolMatch};
pub use source::{RepositorySnapshot, SourceFile, load_repository};
pub use symbols::{FileOutline, Symbol, SymbolKind, extract_outline};
pub use types::{Chunk, RecordContent, RecordMetadata, SearchHit, record_id};
pub use vector_store::{VectorStore, VectorStoreError};
