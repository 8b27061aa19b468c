use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::vector_store::{
    BoxFuture, ScoredVectorPoint, StoredPayload, VectorPoint, VectorStore, VectorStoreError,
};

#[derive(Serialize, Deserialize)]
struct StoredPoint {
    vector: Vec<f32>,
    payload: HashMap<String, serde_json::Value>,
}

#[derive(Serialize, Deserialize)]
struct InMemoryCollection {
    dimension: u64,
    points: HashMap<String, StoredPoint>,
}

/// Process-local store; each collection is an owned map so refresh and delete
/// only touch one entry.
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, InMemoryCollection>>,
}

impl InMemoryVectorStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Load a store previously written by [`InMemoryVectorStore::save_snapshot`].
    /// A missing file yields an empty store.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_snapshot(path: &Path) -> Result<Self, VectorStoreError> {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => return Err(VectorStoreError::Connection(e.to_string())),
        };
        let collections: HashMap<String, InMemoryCollection> = serde_json::from_slice(&bytes)
            .map_err(|e| VectorStoreError::Serialization(e.to_string()))?;
        tracing::debug!(path = %path.display(), collections = collections.len(), "snapshot loaded");
        Ok(Self {
            collections: RwLock::new(collections),
        })
    }

    /// Persist all collections as JSON, replacing the file via rename.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the filesystem write fails.
    pub fn save_snapshot(&self, path: &Path) -> Result<(), VectorStoreError> {
        let json = {
            let cols = self
                .collections
                .read()
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            serde_json::to_vec(&*cols).map_err(|e| VectorStoreError::Serialization(e.to_string()))?
        };
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| VectorStoreError::Connection(e.to_string()))?;
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json).map_err(|e| VectorStoreError::Connection(e.to_string()))?;
        std::fs::rename(&tmp, path).map_err(|e| VectorStoreError::Connection(e.to_string()))?;
        Ok(())
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryVectorStore")
            .finish_non_exhaustive()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn sort_key(payload: &HashMap<String, serde_json::Value>) -> (&str, u64) {
    (
        payload
            .get("source_path")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default(),
        payload
            .get("chunk_index")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or_default(),
    )
}

impl VectorStore for InMemoryVectorStore {
    fn ensure_collection(
        &self,
        collection: &str,
        vector_size: u64,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut cols = self
                .collections
                .write()
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            let col = cols
                .entry(collection.clone())
                .or_insert_with(|| InMemoryCollection {
                    dimension: vector_size,
                    points: HashMap::new(),
                });
            if col.dimension != vector_size {
                return Err(VectorStoreError::Dimension {
                    collection,
                    expected: col.dimension,
                    actual: vector_size,
                });
            }
            Ok(())
        })
    }

    fn collection_exists(&self, collection: &str) -> BoxFuture<'_, Result<bool, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let cols = self
                .collections
                .read()
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            Ok(cols.contains_key(&collection))
        })
    }

    fn delete_collection(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut cols = self
                .collections
                .write()
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            cols.remove(&collection);
            Ok(())
        })
    }

    fn list_collections(&self) -> BoxFuture<'_, Result<Vec<String>, VectorStoreError>> {
        Box::pin(async move {
            let cols = self
                .collections
                .read()
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            let mut names: Vec<String> = cols.keys().cloned().collect();
            names.sort();
            Ok(names)
        })
    }

    fn upsert(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut cols = self
                .collections
                .write()
                .map_err(|e| VectorStoreError::Upsert(e.to_string()))?;
            let col = cols
                .get_mut(&collection)
                .ok_or_else(|| VectorStoreError::MissingCollection(collection.clone()))?;
            if let Some(bad) = points
                .iter()
                .find(|p| p.vector.len() as u64 != col.dimension)
            {
                return Err(VectorStoreError::Dimension {
                    collection,
                    expected: col.dimension,
                    actual: bad.vector.len() as u64,
                });
            }
            for p in points {
                col.points.insert(
                    p.id,
                    StoredPoint {
                        vector: p.vector,
                        payload: p.payload,
                    },
                );
            }
            Ok(())
        })
    }

    fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: u64,
    ) -> BoxFuture<'_, Result<Vec<ScoredVectorPoint>, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let cols = self
                .collections
                .read()
                .map_err(|e| VectorStoreError::Search(e.to_string()))?;
            let col = cols
                .get(&collection)
                .ok_or_else(|| VectorStoreError::MissingCollection(collection.clone()))?;
            if vector.len() as u64 != col.dimension {
                return Err(VectorStoreError::Dimension {
                    expected: col.dimension,
                    actual: vector.len() as u64,
                    collection,
                });
            }

            let mut scored: Vec<(&String, &StoredPoint, f32)> = col
                .points
                .iter()
                .map(|(id, sp)| (id, sp, cosine_similarity(&vector, &sp.vector)))
                .collect();

            scored.sort_by(|a, b| {
                b.2.total_cmp(&a.2)
                    .then_with(|| sort_key(&a.1.payload).cmp(&sort_key(&b.1.payload)))
                    .then_with(|| a.0.cmp(b.0))
            });
            scored.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
            Ok(scored
                .into_iter()
                .map(|(id, sp, score)| ScoredVectorPoint {
                    id: id.clone(),
                    score,
                    payload: sp.payload.clone(),
                })
                .collect())
        })
    }

    fn get_by_ids(
        &self,
        collection: &str,
        ids: Vec<String>,
    ) -> BoxFuture<'_, Result<Vec<StoredPayload>, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let cols = self
                .collections
                .read()
                .map_err(|e| VectorStoreError::Search(e.to_string()))?;
            let col = cols
                .get(&collection)
                .ok_or_else(|| VectorStoreError::MissingCollection(collection.clone()))?;
            Ok(ids
                .into_iter()
                .filter_map(|id| {
                    let payload = col.points.get(&id)?.payload.clone();
                    Some(StoredPayload { id, payload })
                })
                .collect())
        })
    }

    fn scroll_payloads(
        &self,
        collection: &str,
    ) -> BoxFuture<'_, Result<Vec<StoredPayload>, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let cols = self
                .collections
                .read()
                .map_err(|e| VectorStoreError::Scroll(e.to_string()))?;
            let col = cols
                .get(&collection)
                .ok_or_else(|| VectorStoreError::MissingCollection(collection.clone()))?;
            let ordered: BTreeMap<&String, &StoredPoint> = col.points.iter().collect();
            Ok(ordered
                .into_iter()
                .map(|(id, sp)| StoredPayload {
                    id: id.clone(),
                    payload: sp.payload.clone(),
                })
                .collect())
        })
    }

    fn supports_swap(&self) -> bool {
        true
    }

    fn swap_collection(
        &self,
        staging: &str,
        target: &str,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let staging = staging.to_owned();
        let target = target.to_owned();
        Box::pin(async move {
            let mut cols = self
                .collections
                .write()
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            let built = cols
                .remove(&staging)
                .ok_or(VectorStoreError::MissingCollection(staging))?;
            cols.insert(target, built);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(id: &str, path: &str, idx: u64, vector: Vec<f32>) -> VectorPoint {
        VectorPoint {
            id: id.into(),
            vector,
            payload: HashMap::from([
                ("source_path".to_owned(), serde_json::json!(path)),
                ("chunk_index".to_owned(), serde_json::json!(idx)),
            ]),
        }
    }

    #[tokio::test]
    async fn ensure_and_list_collections() {
        let store = InMemoryVectorStore::new();
        store.ensure_collection("b", 2).await.unwrap();
        store.ensure_collection("a", 2).await.unwrap();
        store.ensure_collection("a", 2).await.unwrap();
        assert_eq!(store.list_collections().await.unwrap(), vec!["a", "b"]);
        assert!(store.collection_exists("a").await.unwrap());
        assert!(!store.collection_exists("c").await.unwrap());
    }

    #[tokio::test]
    async fn dimension_is_enforced() {
        let store = InMemoryVectorStore::new();
        store.ensure_collection("c", 3).await.unwrap();
        assert!(matches!(
            store.ensure_collection("c", 4).await,
            Err(VectorStoreError::Dimension { expected: 3, actual: 4, .. })
        ));
        let err = store
            .upsert("c", vec![point("p", "a", 0, vec![1.0, 0.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, VectorStoreError::Dimension { .. }));
    }

    #[tokio::test]
    async fn search_sorts_by_score_then_path_then_index() {
        let store = InMemoryVectorStore::new();
        store.ensure_collection("c", 2).await.unwrap();
        store
            .upsert(
                "c",
                vec![
                    point("1", "b.rs", 0, vec![1.0, 0.0]),
                    point("2", "a.rs", 1, vec![1.0, 0.0]),
                    point("3", "a.rs", 0, vec![2.0, 0.0]),
                    point("4", "z.rs", 0, vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();
        let hits = store.search("c", vec![1.0, 0.0], 3).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["3", "2", "1"]);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn search_rejects_wrong_query_dimension() {
        let store = InMemoryVectorStore::new();
        store.ensure_collection("c", 2).await.unwrap();
        store
            .upsert("c", vec![point("1", "a.rs", 0, vec![1.0, 0.0])])
            .await
            .unwrap();
        assert!(matches!(
            store.search("c", vec![1.0, 0.0, 0.0], 5).await,
            Err(VectorStoreError::Dimension { expected: 2, actual: 3, .. })
        ));
        assert!(matches!(
            store.search("c", vec![1.0], 5).await,
            Err(VectorStoreError::Dimension { expected: 2, actual: 1, .. })
        ));
    }

    #[tokio::test]
    async fn search_missing_collection() {
        let store = InMemoryVectorStore::new();
        assert!(matches!(
            store.search("nope", vec![1.0], 1).await,
            Err(VectorStoreError::MissingCollection(_))
        ));
    }

    #[tokio::test]
    async fn get_by_ids_skips_unknown() {
        let store = InMemoryVectorStore::new();
        store.ensure_collection("c", 1).await.unwrap();
        store
            .upsert("c", vec![point("x", "a", 0, vec![1.0])])
            .await
            .unwrap();
        let got = store
            .get_by_ids("c", vec!["x".into(), "y".into()])
            .await
            .unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].id, "x");
    }

    #[tokio::test]
    async fn swap_replaces_target() {
        let store = InMemoryVectorStore::new();
        store.ensure_collection("repo", 1).await.unwrap();
        store
            .upsert("repo", vec![point("old", "a", 0, vec![1.0])])
            .await
            .unwrap();
        store.ensure_collection("repo.staging", 1).await.unwrap();
        store
            .upsert("repo.staging", vec![point("new", "b", 0, vec![1.0])])
            .await
            .unwrap();
        store.swap_collection("repo.staging", "repo").await.unwrap();

        assert_eq!(store.list_collections().await.unwrap(), vec!["repo"]);
        let all = store.scroll_payloads("repo").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, "new");
    }

    #[tokio::test]
    async fn snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index/store.json");
        let store = InMemoryVectorStore::new();
        store.ensure_collection("c", 1).await.unwrap();
        store
            .upsert("c", vec![point("x", "a.rs", 0, vec![0.5])])
            .await
            .unwrap();
        store.save_snapshot(&path).unwrap();

        let loaded = InMemoryVectorStore::load_snapshot(&path).unwrap();
        assert_eq!(loaded.list_collections().await.unwrap(), vec!["c"]);
        assert_eq!(loaded.scroll_payloads("c").await.unwrap()[0].id, "x");
    }

    #[test]
    fn load_missing_snapshot_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = InMemoryVectorStore::load_snapshot(&dir.path().join("none.json")).unwrap();
        assert!(store.collections.read().unwrap().is_empty());
    }

    #[test]
    fn cosine_zero_vector() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}
