//! Core domain types flowing through the ingestion pipeline.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Metadata keys prepended to chunk text before embedding.
pub const EMBED_METADATA_KEYS: [&str; 3] = ["title", "created_time", "last_edited_time"];

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// A unit of extracted content with provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Stable identifier, `{datasource}:{source id}`.
    pub id: String,
    /// Datasource discriminant that produced this document.
    pub datasource: String,
    pub title: String,
    /// Markdown or plain text body.
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_edited_time: Option<DateTime<Utc>>,
    /// Source-specific extras (space key, item type, ...).
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Document {
    pub fn new(
        datasource: &str,
        source_id: impl std::fmt::Display,
        title: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: format!("{datasource}:{source_id}"),
            datasource: datasource.to_string(),
            title: title.into(),
            text: text.into(),
            url: None,
            created_time: None,
            last_edited_time: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Metadata carried onto every chunk of this document.
    pub fn chunk_metadata(&self) -> BTreeMap<String, serde_json::Value> {
        let mut meta = self.metadata.clone();
        meta.insert("document_id".into(), self.id.clone().into());
        meta.insert("datasource".into(), self.datasource.clone().into());
        meta.insert("title".into(), self.title.clone().into());
        if let Some(url) = &self.url {
            meta.insert("url".into(), url.clone().into());
        }
        if let Some(t) = self.created_time {
            meta.insert("created_time".into(), t.to_rfc3339().into());
        }
        if let Some(t) = self.last_edited_time {
            meta.insert("last_edited_time".into(), t.to_rfc3339().into());
        }
        meta
    }
}

// ---------------------------------------------------------------------------
// Chunk
// ---------------------------------------------------------------------------

/// A token-bounded slice of a document, the unit of embedding and storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Deterministic id derived from `(document_id, index)`.
    pub id: Uuid,
    pub document_id: String,
    /// Position within the parent document.
    pub index: usize,
    pub text: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Chunk {
    pub fn new(
        document_id: &str,
        index: usize,
        text: impl Into<String>,
        metadata: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            id: chunk_id(document_id, index),
            document_id: document_id.to_string(),
            index,
            text: text.into(),
            metadata,
        }
    }

    /// Text sent to the embedding model: selected metadata lines, then the body.
    pub fn embedding_text(&self) -> String {
        let mut out = String::new();
        for key in EMBED_METADATA_KEYS {
            if let Some(value) = self.metadata.get(key) {
                let value = match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                if !value.is_empty() {
                    out.push_str(key);
                    out.push_str(": ");
                    out.push_str(&value);
                    out.push('\n');
                }
            }
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&self.text);
        out
    }
}

/// Stable chunk identifier: the first 16 bytes of SHA-256 over `{document_id}#{index}`.
pub fn chunk_id(document_id: &str, index: usize) -> Uuid {
    let digest = Sha256::digest(format!("{document_id}#{index}").as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}

/// A chunk with its embedding, ready to write.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// A chunk returned from a similarity query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub id: String,
    pub text: String,
    pub score: f32,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Validation and run state
// ---------------------------------------------------------------------------

/// Result of a pre-flight validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Pass,
    /// The target already exists; the run is skipped without writing.
    AlreadyExists { resource: String },
    Fail { reason: String },
}

/// Lifecycle state of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Configuring,
    Binding,
    Validating,
    Skipped,
    Extracting,
    Cleaning,
    Splitting,
    Embedding,
    Loading,
    Completed,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Skipped | RunState::Completed | RunState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Configuring => "configuring",
            RunState::Binding => "binding",
            RunState::Validating => "validating",
            RunState::Skipped => "skipped",
            RunState::Extracting => "extracting",
            RunState::Cleaning => "cleaning",
            RunState::Splitting => "splitting",
            RunState::Embedding => "embedding",
            RunState::Loading => "loading",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
