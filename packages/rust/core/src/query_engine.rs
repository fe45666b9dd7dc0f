//! Retrieval plus tree-summarize synthesis over the ingested collection.

use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, info, instrument};

use ragkb_providers::{EmbeddingModel, LanguageModel};
use ragkb_shared::config::RetrieverKind;
use ragkb_shared::{Result, ScoredChunk};
use ragkb_storage::VectorStore;

/// Contexts per synthesizer call.
pub const TREE_GROUP_SIZE: usize = 4;

/// Answer returned when retrieval finds nothing.
pub const EMPTY_RESPONSE: &str = "Empty Response";

const QA_PROMPT: &str = "Context information from multiple sources is below.\n\
---------------------\n\
{context}\n\
---------------------\n\
Given the information from multiple sources and not prior knowledge, answer the query.\n\
Query: {query}\n\
Answer: ";

const REWRITE_PROMPT: &str = "Rewrite the question below as a standalone search query \
for a documentation knowledge base. Reply with the query only.\n\
Question: {query}\n\
Query: ";

/// Finds the chunks nearest to a question.
pub struct Retriever {
    kind: RetrieverKind,
    similarity_top_k: usize,
    embedding_model: Arc<dyn EmbeddingModel>,
    vector_store: Arc<dyn VectorStore>,
    llm: Arc<dyn LanguageModel>,
}

impl Retriever {
    pub fn new(
        kind: RetrieverKind,
        similarity_top_k: usize,
        embedding_model: Arc<dyn EmbeddingModel>,
        vector_store: Arc<dyn VectorStore>,
        llm: Arc<dyn LanguageModel>,
    ) -> Self {
        Self {
            kind,
            similarity_top_k,
            embedding_model,
            vector_store,
            llm,
        }
    }

    /// Search text for `question`; `auto_retriever` asks the LLM to rewrite it.
    async fn search_text(&self, question: &str) -> Result<String> {
        match self.kind {
            RetrieverKind::Basic => Ok(question.to_string()),
            RetrieverKind::AutoRetriever => {
                let rewritten = self
                    .llm
                    .complete(&REWRITE_PROMPT.replace("{query}", question))
                    .await?;
                let rewritten = rewritten.trim().trim_matches('"').trim();
                if rewritten.is_empty() {
                    Ok(question.to_string())
                } else {
                    debug!(rewritten, "query rewritten");
                    Ok(rewritten.to_string())
                }
            }
        }
    }

    #[instrument(skip_all, fields(top_k = self.similarity_top_k))]
    pub async fn retrieve(&self, question: &str) -> Result<Vec<ScoredChunk>> {
        let query = self.search_text(question).await?;
        let vector = self.embedding_model.embed_query(&query).await?;
        let hits = self.vector_store.query(&vector, self.similarity_top_k).await?;
        debug!(hits = hits.len(), "retrieved");
        Ok(hits)
    }
}

/// Answers from each group of contexts, then summarizes the partial answers
/// the same way until one remains.
pub struct TreeSynthesizer {
    llm: Arc<dyn LanguageModel>,
    group_size: usize,
}

impl TreeSynthesizer {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self {
            llm,
            group_size: TREE_GROUP_SIZE,
        }
    }

    #[instrument(skip_all, fields(contexts = contexts.len()))]
    pub async fn synthesize(&self, question: &str, contexts: &[String]) -> Result<String> {
        if contexts.is_empty() {
            return Ok(EMPTY_RESPONSE.to_string());
        }

        let mut level: Vec<String> = contexts.to_vec();
        let mut depth = 0usize;
        loop {
            let prompts: Vec<String> = level
                .chunks(self.group_size)
                .map(|group| {
                    QA_PROMPT
                        .replace("{context}", &group.join("\n\n"))
                        .replace("{query}", question)
                })
                .collect();
            let answers = try_join_all(prompts.iter().map(|p| self.llm.complete(p))).await?;
            depth += 1;
            debug!(depth, answers = answers.len(), "tree level summarized");

            if answers.len() == 1 {
                return Ok(answers.into_iter().next().unwrap_or_default());
            }
            level = answers;
        }
    }
}

/// Answer plus the chunks it was synthesized from.
#[derive(Debug, Clone)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<ScoredChunk>,
}

impl QueryResponse {
    /// Distinct source URLs, in retrieval order.
    pub fn source_urls(&self) -> Vec<&str> {
        let mut urls: Vec<&str> = Vec::new();
        for source in &self.sources {
            let url = source.metadata.get("url").and_then(|v| v.as_str());
            if let Some(url) = url.filter(|u| !urls.contains(u)) {
                urls.push(url);
            }
        }
        urls
    }
}

pub struct QueryEngine {
    retriever: Retriever,
    synthesizer: TreeSynthesizer,
}

impl QueryEngine {
    pub fn new(retriever: Retriever, synthesizer: TreeSynthesizer) -> Self {
        Self {
            retriever,
            synthesizer,
        }
    }

    #[instrument(skip_all)]
    pub async fn query(&self, question: &str) -> Result<QueryResponse> {
        let sources = self.retriever.retrieve(question).await?;
        let contexts: Vec<String> = sources.iter().map(|s| s.text.clone()).collect();
        let answer = self.synthesizer.synthesize(question, &contexts).await?;
        info!(sources = sources.len(), "query answered");
        Ok(QueryResponse { answer, sources })
    }
}
