//! Embedded libSQL vector store (`name = "local"`).
//!
//! Vectors live as little-endian `f32` blobs next to their chunk payload.
//! Queries scan the collection and rank by cosine similarity.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Database, params};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use ragkb_shared::{RagKbError, Result, ScoredChunk, VectorRecord};

use crate::{VectorStore, migrations};

/// Vector store backed by a local libSQL database file. The file is opened
/// and migrated on first use.
pub struct LocalVectorStore {
    path: PathBuf,
    collection: String,
    handle: OnceCell<(Database, Connection)>,
}

fn storage_err(e: impl std::fmt::Display) -> RagKbError {
    RagKbError::Storage(e.to_string())
}

impl LocalVectorStore {
    pub fn new(path: impl Into<PathBuf>, collection: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            collection: collection.into(),
            handle: OnceCell::new(),
        }
    }

    /// Open or create the database at `path` now rather than on first use.
    pub async fn open(path: &Path, collection: impl Into<String>) -> Result<Self> {
        let store = Self::new(path, collection);
        store.conn().await?;
        Ok(store)
    }

    async fn conn(&self) -> Result<&Connection> {
        let (_, conn) = self
            .handle
            .get_or_try_init(|| async {
                if let Some(parent) = self.path.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| RagKbError::io(parent, e))?;
                }
                let db = libsql::Builder::new_local(&self.path)
                    .build()
                    .await
                    .map_err(storage_err)?;
                let conn = db.connect().map_err(storage_err)?;
                run_migrations(&conn).await?;
                Ok::<_, RagKbError>((db, conn))
            })
            .await?;
        Ok(conn)
    }

    async fn dimension(&self) -> Result<Option<usize>> {
        let mut rows = self
            .conn()
            .await?
            .query(
                "SELECT dimension FROM collections WHERE name = ?1",
                params![self.collection.as_str()],
            )
            .await
            .map_err(storage_err)?;
        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(Some(row.get::<i64>(0).map_err(storage_err)? as usize)),
            None => Ok(None),
        }
    }

    /// Number of points stored in the collection.
    pub async fn count(&self) -> Result<usize> {
        let mut rows = self
            .conn()
            .await?
            .query(
                "SELECT COUNT(*) FROM points WHERE collection = ?1",
                params![self.collection.as_str()],
            )
            .await
            .map_err(storage_err)?;
        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(row.get::<i64>(0).map_err(storage_err)? as usize),
            None => Ok(0),
        }
    }
}

/// Run pending schema migrations.
async fn run_migrations(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn).await;

    for migration in migrations::all_migrations() {
        if migration.version > current_version {
            info!(
                version = migration.version,
                description = migration.description,
                "applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                RagKbError::Storage(format!("migration v{} failed: {e}", migration.version))
            })?;
        }
    }
    Ok(())
}

/// Current schema version, or 0 before the first migration.
async fn get_schema_version(conn: &Connection) -> u32 {
    let result = conn
        .query("SELECT MAX(version) FROM schema_migrations", params![])
        .await;

    match result {
        Ok(mut rows) => match rows.next().await {
            Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
            _ => 0,
        },
        Err(_) => 0,
    }
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Cosine similarity; 0 when either side has zero norm.
pub(crate) fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let (mut dot, mut na, mut nb) = (0f32, 0f32, 0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na.sqrt() * nb.sqrt())
    }
}

#[async_trait]
impl VectorStore for LocalVectorStore {
    fn collection_name(&self) -> &str {
        &self.collection
    }

    async fn collection_exists(&self) -> Result<bool> {
        Ok(self.dimension().await?.is_some())
    }

    async fn create_collection(&self, dimension: usize) -> Result<()> {
        if self.collection_exists().await? {
            return Err(RagKbError::ResourceAlreadyExists {
                resource: format!("collection '{}'", self.collection),
            });
        }
        let now = Utc::now().to_rfc3339();
        self.conn()
            .await?
            .execute(
                "INSERT INTO collections (name, dimension, created_at) VALUES (?1, ?2, ?3)",
                params![self.collection.as_str(), dimension as i64, now.as_str()],
            )
            .await
            .map_err(|e| RagKbError::StorageWrite(e.to_string()))?;
        info!(collection = %self.collection, dimension, "created collection");
        Ok(())
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        let write_err = |e: libsql::Error| RagKbError::StorageWrite(e.to_string());
        let expected = self.dimension().await?.ok_or_else(|| {
            RagKbError::StorageWrite(format!("collection '{}' does not exist", self.collection))
        })?;

        if let Some(bad) = records.iter().find(|r| r.vector.len() != expected) {
            return Err(RagKbError::StorageWrite(format!(
                "vector for chunk {} has dimension {}, collection expects {expected}",
                bad.chunk.id,
                bad.vector.len()
            )));
        }

        let tx = self.conn().await?.transaction().await.map_err(write_err)?;
        for record in records {
            let chunk = &record.chunk;
            let metadata = serde_json::to_string(&chunk.metadata)
                .map_err(|e| RagKbError::StorageWrite(e.to_string()))?;
            tx.execute(
                "INSERT INTO points (collection, id, document_id, chunk_index, text, metadata_json, vector)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(collection, id) DO UPDATE SET
                    document_id = excluded.document_id,
                    chunk_index = excluded.chunk_index,
                    text = excluded.text,
                    metadata_json = excluded.metadata_json,
                    vector = excluded.vector",
                params![
                    self.collection.as_str(),
                    chunk.id.to_string(),
                    chunk.document_id.as_str(),
                    chunk.index as i64,
                    chunk.text.as_str(),
                    metadata,
                    encode_vector(&record.vector)
                ],
            )
            .await
            .map_err(write_err)?;
        }
        tx.commit().await.map_err(write_err)?;
        debug!(collection = %self.collection, points = records.len(), "batch written");
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>> {
        let mut rows = self
            .conn()
            .await?
            .query(
                "SELECT id, text, metadata_json, vector FROM points WHERE collection = ?1",
                params![self.collection.as_str()],
            )
            .await
            .map_err(storage_err)?;

        let mut scored = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            let id = row.get::<String>(0).map_err(storage_err)?;
            let text = row.get::<String>(1).map_err(storage_err)?;
            let metadata_json = row.get::<String>(2).map_err(storage_err)?;
            let blob = row.get::<Vec<u8>>(3).map_err(storage_err)?;

            let metadata = serde_json::from_str(&metadata_json)
                .map_err(|e| RagKbError::parse(format!("point {id}: {e}")))?;
            scored.push(ScoredChunk {
                score: cosine(vector, &decode_vector(&blob)),
                id,
                text,
                metadata,
            });
        }

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(top_k);
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragkb_shared::Chunk;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    async fn test_store(collection: &str) -> LocalVectorStore {
        let tmp = std::env::temp_dir().join(format!("ragkb-store-{}.db", Uuid::now_v7()));
        LocalVectorStore::open(&tmp, collection).await.expect("open")
    }

    fn record(doc: &str, index: usize, text: &str, vector: Vec<f32>) -> VectorRecord {
        let mut meta = BTreeMap::new();
        meta.insert("document_id".to_string(), doc.into());
        VectorRecord {
            chunk: Chunk::new(doc, index, text, meta),
            vector,
        }
    }

    #[tokio::test]
    async fn collection_lifecycle() {
        let store = test_store("docs").await;
        assert!(!store.collection_exists().await.unwrap());

        store.create_collection(2).await.expect("create");
        assert!(store.collection_exists().await.unwrap());

        let err = store.create_collection(2).await.unwrap_err();
        assert_eq!(err.kind(), "ResourceAlreadyExistsError");
    }

    #[tokio::test]
    async fn upsert_is_idempotent_per_chunk() {
        let store = test_store("docs").await;
        store.create_collection(2).await.unwrap();

        let batch = vec![
            record("pdf:a", 0, "alpha", vec![1.0, 0.0]),
            record("pdf:a", 1, "beta", vec![0.0, 1.0]),
        ];
        store.upsert(&batch).await.unwrap();
        store.upsert(&batch).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn query_ranks_by_cosine() {
        let store = test_store("docs").await;
        store.create_collection(2).await.unwrap();
        store
            .upsert(&[
                record("pdf:a", 0, "east", vec![1.0, 0.0]),
                record("pdf:a", 1, "north", vec![0.0, 1.0]),
                record("pdf:b", 0, "north-east", vec![0.7, 0.7]),
            ])
            .await
            .unwrap();

        let hits = store.query(&[0.1, 1.0], 2).await.unwrap();
        let texts: Vec<_> = hits.iter().map(|h| h.text.as_str()).collect();
        assert_eq!(texts, vec!["north", "north-east"]);
        assert_eq!(hits[0].metadata["document_id"], "pdf:a");
    }

    #[tokio::test]
    async fn wrong_dimension_writes_nothing() {
        let store = test_store("docs").await;
        store.create_collection(2).await.unwrap();
        let err = store
            .upsert(&[
                record("pdf:a", 0, "ok", vec![1.0, 0.0]),
                record("pdf:a", 1, "bad", vec![1.0]),
            ])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "StorageWriteError");
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn collections_are_isolated() {
        let tmp = std::env::temp_dir().join(format!("ragkb-store-{}.db", Uuid::now_v7()));
        let a = LocalVectorStore::open(&tmp, "a").await.unwrap();
        a.create_collection(1).await.unwrap();
        drop(a);

        let b = LocalVectorStore::open(&tmp, "b").await.unwrap();
        assert!(!b.collection_exists().await.unwrap());
    }

    #[test]
    fn cosine_handles_zero_vectors() {
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
    }
}
