//! Model capabilities consumed by the pipeline.
//!
//! This crate provides:
//! - [`EmbeddingModel`] — batch text embedding (openai, voyage, hugging_face)
//! - [`LanguageModel`] — single-turn completion (openai, openai_like)
//!
//! Both are bound once from resolved configuration and shared behind `Arc`.

pub mod embedding;
pub mod llm;

use async_trait::async_trait;

use ragkb_shared::{RagKbError, Result};

pub use embedding::RemoteEmbeddingModel;
pub use llm::ChatCompletionModel;

/// Turns text into vectors, one per input, in input order.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    /// Model identifier sent to the provider.
    fn name(&self) -> &str;

    /// Inputs per request.
    fn batch_size(&self) -> usize;

    /// Embed chunk texts. The result has exactly `texts.len()` vectors.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a search query. Providers that distinguish query and document
    /// inputs override this.
    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RagKbError::EmbeddingRequest(format!("{}: empty response", self.name())))
    }
}

/// Single-prompt text completion.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<String>;
}
