//! Chroma over its v1 REST API (`name = "chroma"`).
//!
//! Chroma addresses collections by id, so the id is looked up by name once
//! and cached for the life of the store.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use ragkb_shared::http::{send, send_json};
use ragkb_shared::{RagKbError, Result, RetryPolicy, ScoredChunk, VectorRecord};

use crate::{VectorStore, chunk_payload, scored_from_payload};

#[derive(Debug, Deserialize)]
struct CollectionInfo {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    ids: Vec<Vec<String>>,
    #[serde(default)]
    documents: Option<Vec<Vec<Option<String>>>>,
    #[serde(default)]
    metadatas: Option<Vec<Vec<Option<Map<String, Value>>>>>,
    #[serde(default)]
    distances: Option<Vec<Vec<f32>>>,
}

pub struct ChromaVectorStore {
    client: Client,
    base: String,
    collection: String,
    collection_id: OnceCell<String>,
    retry: RetryPolicy,
}

impl ChromaVectorStore {
    pub fn new(client: Client, url: &str, collection: impl Into<String>) -> Self {
        Self {
            client,
            base: url.trim_end_matches('/').to_string(),
            collection: collection.into(),
            collection_id: OnceCell::new(),
            retry: RetryPolicy::default(),
        }
    }

    /// Override the retry schedule.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn find_collection(&self) -> Result<Option<String>> {
        let url = format!("{}/api/v1/collections", self.base);
        let collections: Vec<CollectionInfo> = self
            .retry
            .run("chroma collections", || send_json(self.client.get(&url)))
            .await
            .map_err(|e| RagKbError::Storage(format!("chroma: {e}")))?;
        Ok(collections
            .into_iter()
            .find(|c| c.name == self.collection)
            .map(|c| c.id))
    }

    async fn collection_id(&self) -> Result<&str> {
        let id = self
            .collection_id
            .get_or_try_init(|| async {
                self.find_collection().await?.ok_or_else(|| {
                    RagKbError::Storage(format!("chroma: collection '{}' does not exist", self.collection))
                })
            })
            .await?;
        Ok(id.as_str())
    }
}

/// Chroma metadata values must be scalars: nulls are dropped and nested
/// values are stored as JSON text.
fn scalar_metadata(payload: Map<String, Value>) -> Map<String, Value> {
    payload
        .into_iter()
        .filter_map(|(k, v)| match v {
            Value::Null => None,
            Value::Array(_) | Value::Object(_) => Some((k, Value::String(v.to_string()))),
            scalar => Some((k, scalar)),
        })
        .collect()
}

#[async_trait]
impl VectorStore for ChromaVectorStore {
    fn collection_name(&self) -> &str {
        &self.collection
    }

    async fn collection_exists(&self) -> Result<bool> {
        Ok(self.find_collection().await?.is_some())
    }

    async fn create_collection(&self, dimension: usize) -> Result<()> {
        if self.collection_exists().await? {
            return Err(RagKbError::ResourceAlreadyExists {
                resource: format!("collection '{}'", self.collection),
            });
        }
        let url = format!("{}/api/v1/collections", self.base);
        let body = json!({
            "name": self.collection,
            "metadata": {"hnsw:space": "cosine", "dimension": dimension},
        });
        let created: CollectionInfo = self
            .retry
            .run("chroma create", || send_json(self.client.post(&url).json(&body)))
            .await
            .map_err(|e| RagKbError::StorageWrite(format!("chroma: {e}")))?;
        // Ignore a lost race; both ids name the same collection.
        let _ = self.collection_id.set(created.id);
        info!(collection = %self.collection, dimension, "created collection");
        Ok(())
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        let id = self.collection_id().await?;
        let mut ids = Vec::with_capacity(records.len());
        let mut embeddings = Vec::with_capacity(records.len());
        let mut documents = Vec::with_capacity(records.len());
        let mut metadatas = Vec::with_capacity(records.len());
        for record in records {
            let mut payload = chunk_payload(&record.chunk);
            let text = payload.remove("text").unwrap_or(Value::Null);
            ids.push(record.chunk.id.to_string());
            embeddings.push(&record.vector);
            documents.push(text);
            metadatas.push(scalar_metadata(payload));
        }

        let url = format!("{}/api/v1/collections/{id}/upsert", self.base);
        let body = json!({
            "ids": ids,
            "embeddings": embeddings,
            "documents": documents,
            "metadatas": metadatas,
        });
        self.retry
            .run("chroma upsert", || send(self.client.post(&url).json(&body)))
            .await
            .map_err(|e| RagKbError::StorageWrite(format!("chroma: {e}")))?;
        debug!(collection = %self.collection, points = records.len(), "batch written");
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>> {
        let id = self.collection_id().await?;
        let url = format!("{}/api/v1/collections/{id}/query", self.base);
        let body = json!({
            "query_embeddings": [vector],
            "n_results": top_k,
            "include": ["documents", "metadatas", "distances"],
        });
        let response: QueryResponse = self
            .retry
            .run("chroma query", || send_json(self.client.post(&url).json(&body)))
            .await
            .map_err(|e| RagKbError::Storage(format!("chroma: {e}")))?;

        let ids = response.ids.into_iter().next().unwrap_or_default();
        let mut documents = response
            .documents
            .and_then(|d| d.into_iter().next())
            .unwrap_or_default()
            .into_iter();
        let mut metadatas = response
            .metadatas
            .and_then(|m| m.into_iter().next())
            .unwrap_or_default()
            .into_iter();
        let mut distances = response
            .distances
            .and_then(|d| d.into_iter().next())
            .unwrap_or_default()
            .into_iter();

        Ok(ids
            .into_iter()
            .map(|id| {
                let mut payload = metadatas.next().flatten().unwrap_or_default();
                if let Some(Some(text)) = documents.next() {
                    payload.insert("text".into(), text.into());
                }
                // Cosine distance to similarity.
                let score = 1.0 - distances.next().unwrap_or(1.0);
                scored_from_payload(id, score, payload)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragkb_shared::Chunk;
    use std::collections::BTreeMap;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store(server: &MockServer) -> ChromaVectorStore {
        ChromaVectorStore::new(Client::new(), &server.uri(), "kb").with_retry(RetryPolicy::immediate(0))
    }

    async fn mount_list(server: &MockServer, collections: Value) {
        Mock::given(method("GET"))
            .and(path("/api/v1/collections"))
            .respond_with(ResponseTemplate::new(200).set_body_json(collections))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn existence_is_looked_up_by_name() {
        let server = MockServer::start().await;
        mount_list(&server, json!([{"id": "c-1", "name": "other"}])).await;
        assert!(!store(&server).collection_exists().await.unwrap());
    }

    #[tokio::test]
    async fn upsert_flattens_metadata() {
        let server = MockServer::start().await;
        mount_list(&server, json!([{"id": "c-9", "name": "kb"}])).await;
        Mock::given(method("POST"))
            .and(path("/api/v1/collections/c-9/upsert"))
            .and(body_partial_json(json!({
                "documents": ["alpha"],
                "metadatas": [{"tags": "[\"a\",\"b\"]", "document_id": "pdf:a", "chunk_index": 0}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(true)))
            .expect(1)
            .mount(&server)
            .await;

        let mut meta = BTreeMap::new();
        meta.insert("tags".to_string(), json!(["a", "b"]));
        meta.insert("url".to_string(), Value::Null);
        let record = VectorRecord {
            chunk: Chunk::new("pdf:a", 0, "alpha", meta),
            vector: vec![0.5, 0.5],
        };
        store(&server).upsert(&[record]).await.unwrap();
    }

    #[tokio::test]
    async fn query_converts_distance_to_score() {
        let server = MockServer::start().await;
        mount_list(&server, json!([{"id": "c-9", "name": "kb"}])).await;
        Mock::given(method("POST"))
            .and(path("/api/v1/collections/c-9/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ids": [["x", "y"]],
                "documents": [["first", "second"]],
                "metadatas": [[{"title": "One"}, null]],
                "distances": [[0.25, 0.5]]
            })))
            .mount(&server)
            .await;

        let hits = store(&server).query(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(hits[0].text, "first");
        assert!((hits[0].score - 0.75).abs() < 1e-6);
        assert_eq!(hits[0].metadata["title"], "One");
        assert_eq!(hits[1].text, "second");
    }

    #[tokio::test]
    async fn missing_collection_fails_writes() {
        let server = MockServer::start().await;
        mount_list(&server, json!([])).await;
        let err = store(&server).upsert(&[]).await.unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
