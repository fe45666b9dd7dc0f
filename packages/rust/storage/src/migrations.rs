//! SQL migration definitions for the local vector store.
//!
//! Migrations are applied in order on open. Each migration has a version
//! number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: collections, points",
        sql: r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per ingestion collection
CREATE TABLE IF NOT EXISTS collections (
    name       TEXT PRIMARY KEY,
    dimension  INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

-- Chunk vectors, little-endian f32 blobs
CREATE TABLE IF NOT EXISTS points (
    collection    TEXT NOT NULL REFERENCES collections(name) ON DELETE CASCADE,
    id            TEXT NOT NULL,
    document_id   TEXT NOT NULL,
    chunk_index   INTEGER NOT NULL,
    text          TEXT NOT NULL,
    metadata_json TEXT NOT NULL,
    vector        BLOB NOT NULL,
    PRIMARY KEY (collection, id)
);

CREATE INDEX IF NOT EXISTS idx_points_document ON points(collection, document_id);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
