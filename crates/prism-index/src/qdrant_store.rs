//! Qdrant-backed [`VectorStore`].

use std::collections::HashMap;

use qdrant_client::Qdrant;
use qdrant_client::qdrant::{
    CreateCollectionBuilder, Distance, GetPointsBuilder, PointId, PointStruct, ScoredPoint,
    ScrollPointsBuilder, SearchPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder,
    point_id::PointIdOptions, value::Kind,
};

use crate::vector_store::{
    BoxFuture, ScoredVectorPoint, StoredPayload, VectorPoint, VectorStore, VectorStoreError,
};

/// Thin wrapper over the [`Qdrant`] client. Collections map one-to-one onto
/// Qdrant collections with cosine distance.
///
/// Logical names such as `owner/repo` contain characters Qdrant rejects, so
/// every name is escaped on the way in (see [`physical_name`]) and restored
/// by [`list_collections`](VectorStore::list_collections).
#[derive(Clone)]
pub struct QdrantVectorStore {
    client: Qdrant,
}

impl std::fmt::Debug for QdrantVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QdrantVectorStore").finish_non_exhaustive()
    }
}

impl QdrantVectorStore {
    /// # Errors
    ///
    /// Returns an error if the Qdrant client cannot be created.
    pub fn new(url: &str) -> Result<Self, VectorStoreError> {
        let client = Qdrant::from_url(url)
            .build()
            .map_err(|e| VectorStoreError::Connection(e.to_string()))?;
        Ok(Self { client })
    }
}

const ESCAPE: u8 = b'~';

/// Qdrant collection name for a logical collection name.
///
/// Bytes outside `[A-Za-z0-9_.-]` become `~XX` (uppercase hex), so the
/// mapping is injective and `owner/repo` turns into `owner~2Frepo`.
#[must_use]
pub fn physical_name(logical: &str) -> String {
    let mut out = String::with_capacity(logical.len());
    for byte in logical.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'.' | b'-') {
            out.push(char::from(byte));
        } else {
            out.push(char::from(ESCAPE));
            out.push_str(&format!("{byte:02X}"));
        }
    }
    out
}

/// Inverse of [`physical_name`]. Malformed escapes are kept literally so
/// collections created outside prism still list under their own names.
#[must_use]
pub fn logical_name(physical: &str) -> String {
    let bytes = physical.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == ESCAPE
            && let Some(hex) = physical.get(i + 1..i + 3)
            && hex.bytes().all(|b| b.is_ascii_hexdigit())
            && let Ok(byte) = u8::from_str_radix(hex, 16)
        {
            out.push(byte);
            i += 3;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8(out).unwrap_or_else(|_| physical.to_owned())
}

fn qdrant_value_to_json(kind: Kind) -> Option<serde_json::Value> {
    Some(match kind {
        Kind::StringValue(s) => serde_json::Value::String(s),
        Kind::IntegerValue(i) => serde_json::Value::Number(i.into()),
        Kind::DoubleValue(d) => serde_json::Number::from_f64(d).map(serde_json::Value::Number)?,
        Kind::BoolValue(b) => serde_json::Value::Bool(b),
        Kind::NullValue(_) => serde_json::Value::Null,
        Kind::ListValue(list) => serde_json::Value::Array(
            list.values
                .into_iter()
                .filter_map(|v| qdrant_value_to_json(v.kind?))
                .collect(),
        ),
        Kind::StructValue(st) => serde_json::Value::Object(
            st.fields
                .into_iter()
                .filter_map(|(k, v)| Some((k, qdrant_value_to_json(v.kind?)?)))
                .collect(),
        ),
    })
}

fn payload_to_json(
    payload: HashMap<String, qdrant_client::qdrant::Value>,
) -> HashMap<String, serde_json::Value> {
    payload
        .into_iter()
        .filter_map(|(k, v)| Some((k, qdrant_value_to_json(v.kind?)?)))
        .collect()
}

fn point_id_string(id: Option<PointId>) -> String {
    match id.and_then(|pid| pid.point_id_options) {
        Some(PointIdOptions::Uuid(u)) => u,
        Some(PointIdOptions::Num(n)) => n.to_string(),
        None => String::new(),
    }
}

fn scored_point_to_vector(point: ScoredPoint) -> ScoredVectorPoint {
    ScoredVectorPoint {
        id: point_id_string(point.id),
        score: point.score,
        payload: payload_to_json(point.payload),
    }
}

impl VectorStore for QdrantVectorStore {
    fn ensure_collection(
        &self,
        collection: &str,
        vector_size: u64,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = physical_name(collection);
        Box::pin(async move {
            let exists = self
                .client
                .collection_exists(&collection)
                .await
                .map_err(|e| VectorStoreError::Connection(e.to_string()))?;
            if exists {
                return Ok(());
            }
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(&collection)
                        .vectors_config(VectorParamsBuilder::new(vector_size, Distance::Cosine)),
                )
                .await
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            Ok(())
        })
    }

    fn collection_exists(&self, collection: &str) -> BoxFuture<'_, Result<bool, VectorStoreError>> {
        let collection = physical_name(collection);
        Box::pin(async move {
            self.client
                .collection_exists(&collection)
                .await
                .map_err(|e| VectorStoreError::Connection(e.to_string()))
        })
    }

    fn delete_collection(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = physical_name(collection);
        Box::pin(async move {
            self.client
                .delete_collection(&collection)
                .await
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            Ok(())
        })
    }

    fn list_collections(&self) -> BoxFuture<'_, Result<Vec<String>, VectorStoreError>> {
        Box::pin(async move {
            let resp = self
                .client
                .list_collections()
                .await
                .map_err(|e| VectorStoreError::Connection(e.to_string()))?;
            let mut names: Vec<String> = resp
                .collections
                .into_iter()
                .map(|c| logical_name(&c.name))
                .collect();
            names.sort();
            Ok(names)
        })
    }

    fn upsert(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = physical_name(collection);
        Box::pin(async move {
            let mut qdrant_points = Vec::with_capacity(points.len());
            for p in points {
                let payload: HashMap<String, qdrant_client::qdrant::Value> =
                    serde_json::from_value(serde_json::Value::Object(
                        p.payload.into_iter().collect(),
                    ))
                    .map_err(|e| VectorStoreError::Serialization(e.to_string()))?;
                qdrant_points.push(PointStruct::new(p.id, p.vector, payload));
            }
            self.client
                .upsert_points(UpsertPointsBuilder::new(&collection, qdrant_points).wait(true))
                .await
                .map_err(|e| VectorStoreError::Upsert(e.to_string()))?;
            Ok(())
        })
    }

    fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: u64,
    ) -> BoxFuture<'_, Result<Vec<ScoredVectorPoint>, VectorStoreError>> {
        let collection = physical_name(collection);
        Box::pin(async move {
            let results = self
                .client
                .search_points(
                    SearchPointsBuilder::new(&collection, vector, limit).with_payload(true),
                )
                .await
                .map_err(|e| VectorStoreError::Search(e.to_string()))?;
            Ok(results
                .result
                .into_iter()
                .map(scored_point_to_vector)
                .collect())
        })
    }

    fn get_by_ids(
        &self,
        collection: &str,
        ids: Vec<String>,
    ) -> BoxFuture<'_, Result<Vec<StoredPayload>, VectorStoreError>> {
        let collection = physical_name(collection);
        Box::pin(async move {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            let point_ids: Vec<PointId> = ids.into_iter().map(PointId::from).collect();
            let resp = self
                .client
                .get_points(GetPointsBuilder::new(&collection, point_ids).with_payload(true))
                .await
                .map_err(|e| VectorStoreError::Search(e.to_string()))?;
            Ok(resp
                .result
                .into_iter()
                .map(|p| StoredPayload {
                    id: point_id_string(p.id),
                    payload: payload_to_json(p.payload),
                })
                .collect())
        })
    }

    fn scroll_payloads(
        &self,
        collection: &str,
    ) -> BoxFuture<'_, Result<Vec<StoredPayload>, VectorStoreError>> {
        let collection = physical_name(collection);
        Box::pin(async move {
            let mut out = Vec::new();
            let mut offset: Option<PointId> = None;
            loop {
                let mut builder = ScrollPointsBuilder::new(&collection)
                    .with_payload(true)
                    .with_vectors(false)
                    .limit(256);
                if let Some(ref off) = offset {
                    builder = builder.offset(off.clone());
                }
                let response = self
                    .client
                    .scroll(builder)
                    .await
                    .map_err(|e| VectorStoreError::Scroll(e.to_string()))?;
                out.extend(response.result.into_iter().map(|p| StoredPayload {
                    id: point_id_string(p.id),
                    payload: payload_to_json(p.payload),
                }));
                match response.next_page_offset {
                    Some(next) => offset = Some(next),
                    None => break,
                }
            }
            Ok(out)
        })
    }
}
