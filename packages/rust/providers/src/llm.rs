//! OpenAI-compatible chat completion.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use ragkb_shared::config::LanguageModelConfig;
use ragkb_shared::http::send_json;
use ragkb_shared::{RagKbError, Resolved, Result, RetryPolicy, SecretValue};

use crate::LanguageModel;

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    content: Option<String>,
}

/// `POST {endpoint}` with a single user message.
///
/// `openai` posts to `{base_url}/v1/chat/completions`; `openai_like` posts to
/// `{API_BASE}/chat/completions`, where the `API_BASE` secret already carries
/// any version prefix.
pub struct ChatCompletionModel {
    client: Client,
    model: String,
    endpoint: String,
    api_key: Option<SecretValue>,
    max_tokens: u32,
    temperature: f32,
    retry: RetryPolicy,
}

impl std::fmt::Debug for ChatCompletionModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionModel")
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .field("max_tokens", &self.max_tokens)
            .finish_non_exhaustive()
    }
}

impl ChatCompletionModel {
    /// Build from resolved configuration. No request is sent.
    pub fn from_resolved(client: Client, resolved: &Resolved<LanguageModelConfig>) -> Result<Self> {
        let common = resolved.config.common();
        let (endpoint, api_key) = match &resolved.config {
            LanguageModelConfig::Openai(c) => (
                format!("{}/v1/chat/completions", c.base_url.trim_end_matches('/')),
                Some(resolved.secrets.require("API_KEY")?),
            ),
            LanguageModelConfig::OpenaiLike(_) => {
                let base = resolved.secrets.require("API_BASE")?.expose();
                (
                    format!("{}/chat/completions", base.trim_end_matches('/')),
                    resolved.secrets.get("API_KEY"),
                )
            }
        };

        Ok(Self {
            client,
            model: common.name.clone(),
            endpoint,
            api_key: api_key.cloned(),
            max_tokens: common.max_tokens,
            temperature: common.temperature,
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
}

#[async_trait]
impl LanguageModel for ChatCompletionModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        });

        let response: ChatResponse = self
            .retry
            .run(&self.model, || {
                let request = self.client.post(&self.endpoint).json(&body);
                let request = match &self.api_key {
                    Some(key) => request.bearer_auth(key.expose()),
                    None => request,
                };
                send_json(request)
            })
            .await
            .map_err(|e| RagKbError::LanguageModel(format!("{}: {e}", self.model)))?;

        let answer = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| RagKbError::LanguageModel(format!("{}: empty completion", self.model)))?;
        debug!(model = %self.model, chars = answer.len(), "completion received");
        Ok(answer.trim().to_string())
    }
}
