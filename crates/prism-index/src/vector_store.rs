use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

#[derive(Debug, thiserror::Error)]
pub enum VectorStoreError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("collection error: {0}")]
    Collection(String),
    #[error("collection {0} not found")]
    MissingCollection(String),
    #[error("collection {collection} expects {expected}-dimensional vectors, got {actual}")]
    Dimension {
        collection: String,
        expected: u64,
        actual: u64,
    },
    #[error("upsert error: {0}")]
    Upsert(String),
    #[error("search error: {0}")]
    Search(String),
    #[error("delete error: {0}")]
    Delete(String),
    #[error("scroll error: {0}")]
    Scroll(String),
    #[error("swap not supported by this backend")]
    SwapUnsupported,
    #[error("serialization error: {0}")]
    Serialization(String),
}

#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct ScoredVectorPoint {
    pub id: String,
    pub score: f32,
    pub payload: HashMap<String, serde_json::Value>,
}

/// Point without its vector.
#[derive(Debug, Clone)]
pub struct StoredPayload {
    pub id: String,
    pub payload: HashMap<String, serde_json::Value>,
}

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Collection-scoped vector storage.
///
/// Implementations must be safe for concurrent readers while another
/// collection is being written.
pub trait VectorStore: Send + Sync {
    fn ensure_collection(
        &self,
        collection: &str,
        vector_size: u64,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    fn collection_exists(&self, collection: &str) -> BoxFuture<'_, Result<bool, VectorStoreError>>;

    fn delete_collection(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    fn list_collections(&self) -> BoxFuture<'_, Result<Vec<String>, VectorStoreError>>;

    /// Insert or replace points by id. Each point write is atomic.
    fn upsert(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    /// Nearest neighbours by cosine similarity, best first.
    fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: u64,
    ) -> BoxFuture<'_, Result<Vec<ScoredVectorPoint>, VectorStoreError>>;

    fn get_by_ids(
        &self,
        collection: &str,
        ids: Vec<String>,
    ) -> BoxFuture<'_, Result<Vec<StoredPayload>, VectorStoreError>>;

    /// Every point's payload in the collection.
    fn scroll_payloads(
        &self,
        collection: &str,
    ) -> BoxFuture<'_, Result<Vec<StoredPayload>, VectorStoreError>>;

    /// Whether [`VectorStore::swap_collection`] is available.
    fn supports_swap(&self) -> bool {
        false
    }

    /// Atomically replace `target` with the contents of `staging`, removing `staging`.
    fn swap_collection(
        &self,
        _staging: &str,
        _target: &str,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        Box::pin(async { Err(VectorStoreError::SwapUnsupported) })
    }
}
