//! Vector-store capability.
//!
//! Three providers implement [`VectorStore`]:
//! - [`LocalVectorStore`] — embedded libSQL file, brute-force cosine search
//! - [`QdrantVectorStore`] — Qdrant REST API
//! - [`ChromaVectorStore`] — Chroma v1 REST API
//!
//! The configured collection is the only state a run owns; its existence is
//! the cross-run idempotency signal checked before extraction.

pub mod chroma;
pub mod local;
mod migrations;
pub mod qdrant;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{Map, Value};

use ragkb_shared::{Chunk, Result, ScoredChunk};

pub use chroma::ChromaVectorStore;
pub use local::LocalVectorStore;
pub use qdrant::QdrantVectorStore;

/// A named collection of chunk vectors.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Collection this store reads and writes.
    fn collection_name(&self) -> &str;

    async fn collection_exists(&self) -> Result<bool>;

    /// Create the collection for vectors of `dimension`. Fails with
    /// `ResourceAlreadyExists` if it is already there.
    async fn create_collection(&self, dimension: usize) -> Result<()>;

    /// Write one batch. The batch lands whole or not at all.
    async fn upsert(&self, records: &[ragkb_shared::VectorRecord]) -> Result<()>;

    /// The `top_k` nearest chunks to `vector`, best first.
    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>>;
}

// ---------------------------------------------------------------------------
// Payload layout shared by the remote stores
// ---------------------------------------------------------------------------

const TEXT_KEY: &str = "text";

/// Chunk as a flat JSON payload: metadata keys plus `text`, `document_id`
/// and `chunk_index`.
pub(crate) fn chunk_payload(chunk: &Chunk) -> Map<String, Value> {
    let mut payload: Map<String, Value> = chunk
        .metadata
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    payload.insert(TEXT_KEY.into(), chunk.text.clone().into());
    payload.insert("document_id".into(), chunk.document_id.clone().into());
    payload.insert("chunk_index".into(), chunk.index.into());
    payload
}

/// Inverse of [`chunk_payload`] for query results.
pub(crate) fn scored_from_payload(id: String, score: f32, payload: Map<String, Value>) -> ScoredChunk {
    let mut metadata: BTreeMap<String, Value> = payload.into_iter().collect();
    let text = match metadata.remove(TEXT_KEY) {
        Some(Value::String(text)) => text,
        _ => String::new(),
    };
    ScoredChunk {
        id,
        text,
        score,
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_round_trips_text_and_metadata() {
        let mut meta = BTreeMap::new();
        meta.insert("title".to_string(), Value::from("Runbook"));
        let chunk = Chunk::new("confluence:1", 3, "restart it", meta);

        let payload = chunk_payload(&chunk);
        assert_eq!(payload["chunk_index"], 3);

        let scored = scored_from_payload(chunk.id.to_string(), 0.9, payload);
        assert_eq!(scored.text, "restart it");
        assert_eq!(scored.metadata["title"], "Runbook");
        assert_eq!(scored.metadata["document_id"], "confluence:1");
        assert!(!scored.metadata.contains_key("text"));
    }
}
