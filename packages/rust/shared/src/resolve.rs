//! Configuration resolution.
//!
//! [`resolve`] turns a parsed [`PipelineConfiguration`] plus a
//! [`SecretBundle`] into an immutable [`ResolvedConfiguration`]: the selected
//! providers' secrets are attached, derived values are computed once, and a
//! missing required secret fails here rather than at first use.

use std::collections::BTreeMap;

use crate::config::{
    AugmentationConfiguration, DatasourceConfig, EmbeddingModelConfig, Environment,
    EvaluationConfiguration, LanguageModelConfig, MetadataConfiguration, PipelineConfiguration,
    ProviderConfig, QueryEngineConfiguration, SplittingConfig, VectorStoreConfig,
};
use crate::error::{RagKbError, Result};
use crate::secrets::{SecretBundle, SecretValue, secret_key};

/// Entry point requesting resolution. Decides which stages must be present
/// and which providers' secrets are needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Ingest,
    Chat,
    Evaluate,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Ingest => "ingest",
            Trigger::Chat => "chat",
            Trigger::Evaluate => "evaluate",
        }
    }
}

/// Secrets attached to one provider, keyed by FIELD (`API_KEY`, ...).
#[derive(Debug, Clone, Default)]
pub struct ProviderSecrets {
    values: BTreeMap<&'static str, SecretValue>,
}

impl ProviderSecrets {
    /// Build from `(FIELD, value)` pairs, skipping empty values.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'static str, &'a str)>) -> Self {
        let values = pairs
            .into_iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(field, value)| (field, SecretValue::new(value)))
            .collect();
        Self { values }
    }

    pub fn get(&self, field: &str) -> Option<&SecretValue> {
        self.values.get(field)
    }

    /// A field resolution already guaranteed to be present.
    pub fn require(&self, field: &str) -> Result<&SecretValue> {
        self.values.get(field).ok_or_else(|| RagKbError::MissingSecret {
            key: field.to_string(),
        })
    }

    pub fn fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.values.keys().copied()
    }
}

/// A provider configuration with its secrets attached.
#[derive(Debug, Clone)]
pub struct Resolved<T> {
    pub config: T,
    pub secrets: ProviderSecrets,
}

impl<T: ProviderConfig> Resolved<T> {
    pub fn discriminant(&self) -> &'static str {
        self.config.discriminant()
    }
}

/// Embedding model plus its derived request batch size.
#[derive(Debug, Clone)]
pub struct ResolvedEmbeddingModel {
    pub config: EmbeddingModelConfig,
    pub secrets: ProviderSecrets,
    /// Chunks per embedding request.
    pub batch_size: usize,
}

impl ResolvedEmbeddingModel {
    pub fn discriminant(&self) -> &'static str {
        self.config.discriminant()
    }

    pub fn splitting(&self) -> &SplittingConfig {
        &self.config.common().splitting
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedIngestion {
    pub datasources: Vec<Resolved<DatasourceConfig>>,
    pub embedding_model: ResolvedEmbeddingModel,
    pub vector_store: Resolved<VectorStoreConfig>,
}

#[derive(Debug, Clone)]
pub struct ResolvedAugmentation {
    pub query_engine: QueryEngineConfiguration,
    pub retriever_llm: Resolved<LanguageModelConfig>,
    pub synthesizer_llm: Resolved<LanguageModelConfig>,
}

#[derive(Debug, Clone)]
pub struct ResolvedEvaluation {
    pub config: EvaluationConfiguration,
    pub judge_llm: Resolved<LanguageModelConfig>,
    pub judge_embedding_model: ResolvedEmbeddingModel,
}

/// Fully resolved, immutable configuration for one trigger.
#[derive(Debug, Clone)]
pub struct ResolvedConfiguration {
    pub environment: Environment,
    pub metadata: MetadataConfiguration,
    pub trigger: Trigger,
    pub ingestion: ResolvedIngestion,
    pub augmentation: Option<ResolvedAugmentation>,
    pub evaluation: Option<ResolvedEvaluation>,
}

/// Request batch size for a model with a per-request token ceiling.
pub fn derive_batch_size(max_request_size_in_tokens: usize, chunk_size_in_tokens: usize) -> usize {
    (max_request_size_in_tokens / chunk_size_in_tokens.max(1)).max(1)
}

/// Resolve `document` for `trigger` in `environment`.
///
/// Datasource secrets are only needed to ingest; the augmentation stage is
/// required for chat and evaluation; the evaluation stage only for evaluation.
/// The ingestion stage's embedding model and vector store are always resolved
/// since retrieval reads the same collection.
pub fn resolve(
    document: &PipelineConfiguration,
    environment: Environment,
    secrets: &SecretBundle,
    trigger: Trigger,
) -> Result<ResolvedConfiguration> {
    let stages = &document.pipeline;
    let mut metadata = document.metadata.clone();
    metadata.environment = environment;

    let datasources = stages
        .ingestion
        .datasources
        .iter()
        .map(|ds| {
            if ds.common().max_concurrency == 0 {
                return Err(RagKbError::configuration(format!(
                    "datasource '{}': max_concurrency must be at least 1",
                    ds.discriminant()
                )));
            }
            if trigger == Trigger::Ingest {
                attach(ds, secrets)
            } else {
                Ok(Resolved {
                    config: ds.clone(),
                    secrets: ProviderSecrets::default(),
                })
            }
        })
        .collect::<Result<Vec<_>>>()?;

    let ingestion = ResolvedIngestion {
        datasources,
        embedding_model: resolve_embedding_model(&stages.ingestion.embedding_model, secrets)?,
        vector_store: attach(&stages.ingestion.vector_store, secrets)?,
    };

    let augmentation = match (&stages.augmentation, trigger) {
        (Some(aug), Trigger::Chat | Trigger::Evaluate) => Some(resolve_augmentation(aug, secrets)?),
        (None, Trigger::Chat | Trigger::Evaluate) => {
            return Err(missing_stage("augmentation", trigger));
        }
        _ => None,
    };

    let evaluation = match (&stages.evaluation, trigger) {
        (Some(eval), Trigger::Evaluate) => Some(ResolvedEvaluation {
            config: eval.clone(),
            judge_llm: attach(&eval.judge_llm, secrets)?,
            judge_embedding_model: resolve_embedding_model(&eval.judge_embedding_model, secrets)?,
        }),
        (None, Trigger::Evaluate) => return Err(missing_stage("evaluation", trigger)),
        _ => None,
    };

    Ok(ResolvedConfiguration {
        environment,
        metadata,
        trigger,
        ingestion,
        augmentation,
        evaluation,
    })
}

fn missing_stage(stage: &str, trigger: Trigger) -> RagKbError {
    RagKbError::configuration(format!(
        "pipeline.{stage} section is required for '{}'",
        trigger.as_str()
    ))
}

fn resolve_augmentation(
    aug: &AugmentationConfiguration,
    secrets: &SecretBundle,
) -> Result<ResolvedAugmentation> {
    let qe = &aug.query_engine;
    if qe.retriever.similarity_top_k == 0 {
        return Err(RagKbError::configuration(
            "query_engine.retriever.similarity_top_k must be at least 1",
        ));
    }
    Ok(ResolvedAugmentation {
        query_engine: qe.clone(),
        retriever_llm: attach(&qe.retriever.llm, secrets)?,
        synthesizer_llm: attach(&qe.synthesizer.llm, secrets)?,
    })
}

fn resolve_embedding_model(
    config: &EmbeddingModelConfig,
    secrets: &SecretBundle,
) -> Result<ResolvedEmbeddingModel> {
    let resolved = attach(config, secrets)?;
    let common = config.common();
    let splitting = &common.splitting;
    let tag = config.discriminant();

    if splitting.chunk_size_in_tokens == 0 {
        return Err(RagKbError::configuration(format!(
            "embedding model '{tag}': splitting.chunk_size_in_tokens must be at least 1"
        )));
    }
    if splitting.chunk_overlap_in_tokens >= splitting.chunk_size_in_tokens {
        return Err(RagKbError::configuration(format!(
            "embedding model '{tag}': splitting.chunk_overlap_in_tokens ({}) must be less than chunk_size_in_tokens ({})",
            splitting.chunk_overlap_in_tokens, splitting.chunk_size_in_tokens
        )));
    }
    if common.batch_size == 0 {
        return Err(RagKbError::configuration(format!(
            "embedding model '{tag}': batch_size must be at least 1"
        )));
    }

    let batch_size = match config {
        EmbeddingModelConfig::Openai(openai) => {
            derive_batch_size(openai.max_request_size_in_tokens, splitting.chunk_size_in_tokens)
        }
        _ => common.batch_size,
    };

    Ok(ResolvedEmbeddingModel {
        config: resolved.config,
        secrets: resolved.secrets,
        batch_size,
    })
}

fn attach<T: ProviderConfig>(config: &T, bundle: &SecretBundle) -> Result<Resolved<T>> {
    let tag = config.discriminant();
    let mut secrets = ProviderSecrets::default();
    for field in config.secret_fields() {
        let key = secret_key(T::AXIS, tag, field.name);
        match bundle.get(&key) {
            Some(value) => {
                secrets.values.insert(field.name, value.clone());
            }
            None if field.required => return Err(RagKbError::MissingSecret { key }),
            None => {}
        }
    }
    Ok(Resolved {
        config: config.clone(),
        secrets,
    })
}
