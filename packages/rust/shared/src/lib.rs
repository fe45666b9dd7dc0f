//! Shared types, error model, and configuration for ragkb.
//!
//! This crate is the foundation depended on by all other ragkb crates.
//! It provides:
//! - [`RagKbError`] — the unified error type
//! - Domain types ([`Document`], [`Chunk`], [`ValidationOutcome`], [`RunState`])
//! - The configuration document, secret bundle, and [`resolve`]
//! - [`RetryPolicy`] for upstream requests

pub mod config;
pub mod error;
pub mod http;
pub mod resolve;
pub mod retry;
pub mod secrets;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    Axis, DatasourceConfig, DocumentFormat, EmbeddingModelConfig, Environment,
    LanguageModelConfig, PipelineConfiguration, ProviderConfig, SecretField, VectorStoreConfig,
    default_config_path, load_document, parse_document,
};
pub use error::{RagKbError, Result};
pub use resolve::{
    ProviderSecrets, Resolved, ResolvedAugmentation, ResolvedConfiguration,
    ResolvedEmbeddingModel, ResolvedEvaluation, ResolvedIngestion, Trigger, derive_batch_size,
    resolve,
};
pub use retry::RetryPolicy;
pub use secrets::{SECRET_NAMESPACE, SecretBundle, SecretValue, default_secrets_path, secret_key};
pub use types::{
    Chunk, Document, EMBED_METADATA_KEYS, RunState, ScoredChunk, ValidationOutcome, VectorRecord,
    chunk_id,
};
