//! Qdrant over its REST API (`name = "qdrant"`).

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use ragkb_shared::http::{send, send_json};
use ragkb_shared::{RagKbError, Result, RetryPolicy, ScoredChunk, SecretValue, VectorRecord};

use crate::{VectorStore, chunk_payload, scored_from_payload};

#[derive(Debug, Deserialize)]
struct SearchResponse {
    result: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    id: Value,
    score: f32,
    #[serde(default)]
    payload: Option<Map<String, Value>>,
}

pub struct QdrantVectorStore {
    client: Client,
    base: String,
    collection: String,
    api_key: Option<SecretValue>,
    retry: RetryPolicy,
}

impl QdrantVectorStore {
    pub fn new(
        client: Client,
        url: &str,
        collection: impl Into<String>,
        api_key: Option<SecretValue>,
    ) -> Self {
        Self {
            client,
            base: url.trim_end_matches('/').to_string(),
            collection: collection.into(),
            api_key,
            retry: RetryPolicy::default(),
        }
    }

    /// Override the retry schedule.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn request(&self, method: Method, suffix: &str) -> RequestBuilder {
        let url = format!("{}/collections/{}{suffix}", self.base, self.collection);
        let request = self.client.request(method, url);
        match &self.api_key {
            Some(key) => request.header("api-key", key.expose()),
            None => request,
        }
    }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    fn collection_name(&self) -> &str {
        &self.collection
    }

    async fn collection_exists(&self) -> Result<bool> {
        let result = self
            .retry
            .run("qdrant collection", || send(self.request(Method::GET, "")))
            .await;
        match result {
            Ok(_) => Ok(true),
            Err(RagKbError::Http { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Ok(false)
            }
            Err(e) => Err(RagKbError::Storage(format!("qdrant: {e}"))),
        }
    }

    async fn create_collection(&self, dimension: usize) -> Result<()> {
        if self.collection_exists().await? {
            return Err(RagKbError::ResourceAlreadyExists {
                resource: format!("collection '{}'", self.collection),
            });
        }
        let body = json!({"vectors": {"size": dimension, "distance": "Cosine"}});
        self.retry
            .run("qdrant create", || send(self.request(Method::PUT, "").json(&body)))
            .await
            .map_err(|e| RagKbError::StorageWrite(format!("qdrant: {e}")))?;
        info!(collection = %self.collection, dimension, "created collection");
        Ok(())
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        let points: Vec<Value> = records
            .iter()
            .map(|r| {
                json!({
                    "id": r.chunk.id.to_string(),
                    "vector": r.vector,
                    "payload": chunk_payload(&r.chunk),
                })
            })
            .collect();
        let body = json!({"points": points});

        self.retry
            .run("qdrant upsert", || {
                send(
                    self.request(Method::PUT, "/points")
                        .query(&[("wait", "true")])
                        .json(&body),
                )
            })
            .await
            .map_err(|e| RagKbError::StorageWrite(format!("qdrant: {e}")))?;
        debug!(collection = %self.collection, points = records.len(), "batch written");
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>> {
        let body = json!({"vector": vector, "limit": top_k, "with_payload": true});
        let response: SearchResponse = self
            .retry
            .run("qdrant search", || {
                send_json(self.request(Method::POST, "/points/search").json(&body))
            })
            .await
            .map_err(|e| RagKbError::Storage(format!("qdrant: {e}")))?;

        Ok(response
            .result
            .into_iter()
            .map(|hit| {
                let id = match hit.id {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                scored_from_payload(id, hit.score, hit.payload.unwrap_or_default())
            })
            .collect())
    }
}
