//! HTTP embedding providers.
//!
//! | Provider | Endpoint | Body |
//! |---|---|---|
//! | `openai` | `POST {base}/v1/embeddings` | `{model, input}` |
//! | `voyage` | `POST {base}/v1/embeddings` | `{model, input, input_type}` |
//! | `hugging_face` | `POST {base}/embed` (text-embeddings-inference) | `{inputs, truncate}` |

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use ragkb_shared::config::EmbeddingModelConfig;
use ragkb_shared::http::send_json;
use ragkb_shared::{RagKbError, ResolvedEmbeddingModel, Result, RetryPolicy, SecretValue};

use crate::EmbeddingModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wire {
    OpenAi,
    Voyage,
    TextEmbeddingsInference,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputKind {
    Document,
    Query,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

/// An embedding model reached over HTTP.
pub struct RemoteEmbeddingModel {
    client: Client,
    wire: Wire,
    model: String,
    endpoint: String,
    token: Option<SecretValue>,
    batch_size: usize,
    retry: RetryPolicy,
}

impl std::fmt::Debug for RemoteEmbeddingModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteEmbeddingModel")
            .field("wire", &self.wire)
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

impl RemoteEmbeddingModel {
    /// Build from resolved configuration. No request is sent.
    pub fn from_resolved(client: Client, resolved: &ResolvedEmbeddingModel) -> Result<Self> {
        let common = resolved.config.common();
        let (wire, base, token) = match &resolved.config {
            EmbeddingModelConfig::Openai(c) => {
                (Wire::OpenAi, &c.base_url, Some(resolved.secrets.require("API_KEY")?))
            }
            EmbeddingModelConfig::Voyage(c) => {
                (Wire::Voyage, &c.base_url, Some(resolved.secrets.require("API_KEY")?))
            }
            EmbeddingModelConfig::HuggingFace(c) => (
                Wire::TextEmbeddingsInference,
                &c.base_url,
                resolved.secrets.get("ACCESS_TOKEN"),
            ),
        };

        let base = base.trim_end_matches('/');
        let endpoint = match wire {
            Wire::OpenAi | Wire::Voyage => format!("{base}/v1/embeddings"),
            Wire::TextEmbeddingsInference => format!("{base}/embed"),
        };

        Ok(Self {
            client,
            wire,
            model: common.name.clone(),
            endpoint,
            token: token.cloned(),
            batch_size: resolved.batch_size,
            retry: RetryPolicy {
                max_retries: common.max_retries,
                ..RetryPolicy::default()
            },
        })
    }

    /// Override the retry schedule.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn request(&self, texts: &[String], kind: InputKind) -> RequestBuilder {
        let body = match self.wire {
            Wire::OpenAi => json!({"model": self.model, "input": texts}),
            Wire::Voyage => json!({
                "model": self.model,
                "input": texts,
                "input_type": match kind {
                    InputKind::Document => "document",
                    InputKind::Query => "query",
                },
            }),
            Wire::TextEmbeddingsInference => json!({"inputs": texts, "truncate": true}),
        };

        let request = self.client.post(&self.endpoint).json(&body);
        match &self.token {
            Some(token) => request.bearer_auth(token.expose()),
            None => request,
        }
    }

    async fn embed(&self, texts: &[String], kind: InputKind) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let vectors = self
            .retry
            .run(&self.model, || async move {
                match self.wire {
                    Wire::TextEmbeddingsInference => {
                        send_json::<Vec<Vec<f32>>>(self.request(texts, kind)).await
                    }
                    Wire::OpenAi | Wire::Voyage => {
                        let mut response: EmbeddingResponse =
                            send_json(self.request(texts, kind)).await?;
                        response.data.sort_by_key(|d| d.index);
                        Ok(response.data.into_iter().map(|d| d.embedding).collect())
                    }
                }
            })
            .await
            .map_err(|e| RagKbError::EmbeddingRequest(format!("{}: {e}", self.model)))?;

        if vectors.len() != texts.len() {
            return Err(RagKbError::EmbeddingRequest(format!(
                "{}: expected {} vectors, got {}",
                self.model,
                texts.len(),
                vectors.len()
            )));
        }
        debug!(model = %self.model, inputs = texts.len(), "embedded batch");
        Ok(vectors)
    }
}

#[async_trait]
impl EmbeddingModel for RemoteEmbeddingModel {
    fn name(&self) -> &str {
        &self.model
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embed(texts, InputKind::Document).await
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        self.embed(&[query.to_string()], InputKind::Query)
            .await?
            .pop()
            .ok_or_else(|| RagKbError::EmbeddingRequest(format!("{}: empty response", self.model)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragkb_shared::ProviderSecrets;
    use ragkb_shared::config::{
        EmbeddingModelCommon, HuggingFaceEmbeddingConfig, OpenAiEmbeddingConfig,
        SplittingConfig, TokenizerConfig, VoyageEmbeddingConfig,
    };
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn common() -> EmbeddingModelCommon {
        EmbeddingModelCommon {
            name: "text-embedding-3-small".into(),
            tokenizer: TokenizerConfig::default(),
            batch_size: 8,
            max_retries: 2,
            splitting: SplittingConfig::default(),
        }
    }

    fn openai(server: &MockServer) -> RemoteEmbeddingModel {
        let resolved = ResolvedEmbeddingModel {
            config: EmbeddingModelConfig::Openai(OpenAiEmbeddingConfig {
                common: common(),
                max_request_size_in_tokens: 8191,
                base_url: server.uri(),
            }),
            secrets: ProviderSecrets::from_pairs([("API_KEY", "sk-test")]),
            batch_size: 21,
        };
        RemoteEmbeddingModel::from_resolved(Client::new(), &resolved)
            .unwrap()
            .with_retry(RetryPolicy::immediate(2))
    }

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn openai_vectors_follow_input_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({"model": "text-embedding-3-small"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {"embedding": [0.0, 1.0], "index": 1},
                    {"embedding": [1.0, 0.0], "index": 0}
                ]
            })))
            .mount(&server)
            .await;

        let model = openai(&server);
        assert_eq!(model.batch_size(), 21);
        let vectors = model.embed_batch(&texts(&["a", "b"])).await.unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"embedding": [0.5], "index": 0}]
            })))
            .mount(&server)
            .await;

        let vectors = openai(&server).embed_batch(&texts(&["a"])).await.unwrap();
        assert_eq!(vectors, vec![vec![0.5]]);
    }

    #[tokio::test]
    async fn exhausted_retries_are_embedding_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(429))
            .expect(3)
            .mount(&server)
            .await;

        let err = openai(&server).embed_batch(&texts(&["a"])).await.unwrap_err();
        assert_eq!(err.kind(), "EmbeddingRequestError");
    }

    #[tokio::test]
    async fn vector_count_mismatch_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"embedding": [0.5], "index": 0}]
            })))
            .mount(&server)
            .await;

        let err = openai(&server).embed_batch(&texts(&["a", "b"])).await.unwrap_err();
        assert!(err.to_string().contains("expected 2 vectors"));
    }

    #[tokio::test]
    async fn voyage_marks_query_inputs() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(body_partial_json(json!({"input_type": "query"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"embedding": [0.25, 0.75], "index": 0}]
            })))
            .mount(&server)
            .await;

        let resolved = ResolvedEmbeddingModel {
            config: EmbeddingModelConfig::Voyage(VoyageEmbeddingConfig {
                common: common(),
                base_url: server.uri(),
            }),
            secrets: ProviderSecrets::from_pairs([("API_KEY", "pa-test")]),
            batch_size: 8,
        };
        let model = RemoteEmbeddingModel::from_resolved(Client::new(), &resolved).unwrap();
        assert_eq!(model.embed_query("where?").await.unwrap(), vec![0.25, 0.75]);
    }

    #[tokio::test]
    async fn text_embeddings_inference_without_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embed"))
            .and(body_partial_json(json!({"inputs": ["x", "y"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([[1.0], [2.0]])))
            .mount(&server)
            .await;

        let resolved = ResolvedEmbeddingModel {
            config: EmbeddingModelConfig::HuggingFace(HuggingFaceEmbeddingConfig {
                common: common(),
                base_url: format!("{}/", server.uri()),
            }),
            secrets: ProviderSecrets::default(),
            batch_size: 8,
        };
        let model = RemoteEmbeddingModel::from_resolved(Client::new(), &resolved).unwrap();
        let vectors = model.embed_batch(&texts(&["x", "y"])).await.unwrap();
        assert_eq!(vectors, vec![vec![1.0], vec![2.0]]);
    }

    #[tokio::test]
    async fn empty_batch_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;
        assert!(openai(&server).embed_batch(&[]).await.unwrap().is_empty());
    }
}
