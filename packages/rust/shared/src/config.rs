//! Pipeline configuration document.
//!
//! One document per environment lives at
//! `configurations/configuration.{environment}.toml` (JSON is accepted when the
//! file ends in `.json`). Every provider-bearing slot carries a discriminant
//! field; the slot is parsed through [`axis_slot`], which checks the
//! discriminant against the axis' known variants before parsing that
//! variant's schema. Unknown fields are ignored.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{RagKbError, Result};
use crate::retry::RetryPolicy;

/// Directory holding per-environment configuration and secrets files.
pub const CONFIG_DIR_NAME: &str = "configurations";

// ---------------------------------------------------------------------------
// Axes and environments
// ---------------------------------------------------------------------------

/// A configurable capability dimension of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    Datasource,
    EmbeddingModel,
    LanguageModel,
    VectorStore,
}

impl Axis {
    /// All axes, in binding order.
    pub const ALL: [Axis; 4] = [
        Axis::EmbeddingModel,
        Axis::VectorStore,
        Axis::Datasource,
        Axis::LanguageModel,
    ];

    /// Human-readable axis name used in error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Axis::Datasource => "datasource",
            Axis::EmbeddingModel => "embedding model",
            Axis::LanguageModel => "language model",
            Axis::VectorStore => "vector store",
        }
    }

    /// Name of the field carrying the discriminant for this axis.
    pub fn discriminant_field(&self) -> &'static str {
        match self {
            Axis::Datasource | Axis::VectorStore => "name",
            Axis::EmbeddingModel | Axis::LanguageModel => "provider",
        }
    }

    /// AXIS segment of a secret key.
    pub fn secret_segment(&self) -> &'static str {
        match self {
            Axis::Datasource => "DATASOURCES",
            Axis::EmbeddingModel => "EMBEDDING_MODELS",
            Axis::LanguageModel => "LLMS",
            Axis::VectorStore => "VECTOR_STORES",
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deployment environment selecting the configuration and secrets files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Default,
    Local,
    Dev,
    Test,
    Prod,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Default => "default",
            Environment::Local => "local",
            Environment::Dev => "dev",
            Environment::Test => "test",
            Environment::Prod => "prod",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = RagKbError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "default" => Ok(Environment::Default),
            "local" => Ok(Environment::Local),
            "dev" => Ok(Environment::Dev),
            "test" => Ok(Environment::Test),
            "prod" => Ok(Environment::Prod),
            other => Err(RagKbError::configuration(format!(
                "unknown environment '{other}' (expected one of: default, local, dev, test, prod)"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Provider configuration contract
// ---------------------------------------------------------------------------

/// A secret field a provider reads from the secret bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecretField {
    /// FIELD segment of the secret key, e.g. `API_KEY`.
    pub name: &'static str,
    /// Whether resolution fails when the secret is absent.
    pub required: bool,
}

const fn required(name: &'static str) -> SecretField {
    SecretField {
        name,
        required: true,
    }
}

const fn optional(name: &'static str) -> SecretField {
    SecretField {
        name,
        required: false,
    }
}

/// Implemented by each axis' closed set of provider variants.
pub trait ProviderConfig: Serialize + DeserializeOwned + Clone + fmt::Debug {
    /// Axis this configuration belongs to.
    const AXIS: Axis;
    /// Every accepted discriminant value, in declaration order.
    const VARIANTS: &'static [&'static str];

    /// Discriminant of the selected variant.
    fn discriminant(&self) -> &'static str;

    /// Secrets the selected variant reads.
    fn secret_fields(&self) -> &'static [SecretField];
}

/// Parse one axis slot: check the discriminant, then parse that variant.
pub fn axis_slot<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: ProviderConfig,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    select_variant(value).map_err(D::Error::custom)
}

/// Parse a non-empty list of datasource slots, preserving order.
fn datasource_slots<'de, D>(deserializer: D) -> std::result::Result<Vec<DatasourceConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Vec::<serde_json::Value>::deserialize(deserializer)?;
    if values.is_empty() {
        return Err(D::Error::custom(
            "ingestion requires at least one datasource",
        ));
    }
    values
        .into_iter()
        .enumerate()
        .map(|(i, v)| select_variant(v).map_err(|e| D::Error::custom(format!("datasources[{i}]: {e}"))))
        .collect()
}

fn select_variant<T: ProviderConfig>(value: serde_json::Value) -> std::result::Result<T, String> {
    let axis = T::AXIS;
    let field = axis.discriminant_field();

    let tag = match value.get(field) {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => {
            return Err(format!(
                "{axis}: discriminant field `{field}` must be a string, got {other}"
            ));
        }
        None => return Err(format!("{axis}: missing discriminant field `{field}`")),
    };

    if !T::VARIANTS.contains(&tag.as_str()) {
        return Err(format!(
            "unknown {axis} provider '{tag}' (expected one of: {})",
            T::VARIANTS.join(", ")
        ));
    }

    serde_json::from_value(value).map_err(|e| format!("{axis} '{tag}': {e}"))
}

// ---------------------------------------------------------------------------
// Root document
// ---------------------------------------------------------------------------

/// Root configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfiguration {
    pub metadata: MetadataConfiguration,
    pub pipeline: PipelineStages,
}

/// `[metadata]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfiguration {
    /// Build identifier, surfaced in logs.
    pub build_name: String,

    /// Default tracing filter when neither `RUST_LOG` nor `-v` is given.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub environment: Environment,
}

fn default_log_level() -> String {
    "info".into()
}

/// `[pipeline]` section: one entry per stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStages {
    #[serde(alias = "embedding")]
    pub ingestion: IngestionConfiguration,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub augmentation: Option<AugmentationConfiguration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<EvaluationConfiguration>,
}

/// `[pipeline.ingestion]` stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfiguration {
    #[serde(deserialize_with = "datasource_slots")]
    pub datasources: Vec<DatasourceConfig>,

    #[serde(deserialize_with = "axis_slot")]
    pub embedding_model: EmbeddingModelConfig,

    #[serde(deserialize_with = "axis_slot")]
    pub vector_store: VectorStoreConfig,
}

/// `[pipeline.augmentation]` stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AugmentationConfiguration {
    pub query_engine: QueryEngineConfiguration,
}

/// `[pipeline.augmentation.query_engine]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryEngineConfiguration {
    pub retriever: RetrieverConfiguration,
    pub synthesizer: SynthesizerConfiguration,
}

/// Retrieval strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrieverKind {
    #[default]
    Basic,
    AutoRetriever,
}

/// `[pipeline.augmentation.query_engine.retriever]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieverConfiguration {
    #[serde(default)]
    pub name: RetrieverKind,

    #[serde(default = "default_similarity_top_k")]
    pub similarity_top_k: usize,

    #[serde(deserialize_with = "axis_slot")]
    pub llm: LanguageModelConfig,
}

fn default_similarity_top_k() -> usize {
    2
}

/// Synthesis strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesizerKind {
    #[default]
    Tree,
}

/// How partial answers are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    #[default]
    TreeSummarize,
}

/// `[pipeline.augmentation.query_engine.synthesizer]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesizerConfiguration {
    #[serde(default)]
    pub name: SynthesizerKind,

    #[serde(default)]
    pub response_mode: ResponseMode,

    #[serde(deserialize_with = "axis_slot")]
    pub llm: LanguageModelConfig,

    #[serde(default)]
    pub streaming: bool,
}

/// `[pipeline.evaluation]` stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfiguration {
    #[serde(deserialize_with = "axis_slot")]
    pub judge_llm: LanguageModelConfig,

    #[serde(deserialize_with = "axis_slot")]
    pub judge_embedding_model: EmbeddingModelConfig,

    /// JSONL file of `{question, ground_truth?}` records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_path: Option<PathBuf>,

    /// Where evaluation records are written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Datasource axis
// ---------------------------------------------------------------------------

/// Knowledge-source provider, discriminated by `name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum DatasourceConfig {
    Notion(NotionDatasourceConfig),
    Confluence(ConfluenceDatasourceConfig),
    Hackernews(HackernewsDatasourceConfig),
    Pdf(PdfDatasourceConfig),
}

impl ProviderConfig for DatasourceConfig {
    const AXIS: Axis = Axis::Datasource;
    const VARIANTS: &'static [&'static str] = &["notion", "confluence", "hackernews", "pdf"];

    fn discriminant(&self) -> &'static str {
        match self {
            DatasourceConfig::Notion(_) => "notion",
            DatasourceConfig::Confluence(_) => "confluence",
            DatasourceConfig::Hackernews(_) => "hackernews",
            DatasourceConfig::Pdf(_) => "pdf",
        }
    }

    fn secret_fields(&self) -> &'static [SecretField] {
        const NOTION: &[SecretField] = &[required("API_TOKEN")];
        const CONFLUENCE: &[SecretField] = &[required("USERNAME"), required("PASSWORD")];
        match self {
            DatasourceConfig::Notion(_) => NOTION,
            DatasourceConfig::Confluence(_) => CONFLUENCE,
            DatasourceConfig::Hackernews(_) | DatasourceConfig::Pdf(_) => &[],
        }
    }
}

impl DatasourceConfig {
    /// Fields shared by every datasource.
    pub fn common(&self) -> &DatasourceCommon {
        match self {
            DatasourceConfig::Notion(c) => &c.common,
            DatasourceConfig::Confluence(c) => &c.common,
            DatasourceConfig::Hackernews(c) => &c.common,
            DatasourceConfig::Pdf(c) => &c.common,
        }
    }
}

/// Fields shared by every datasource variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasourceCommon {
    /// Upper bound on documents returned by this source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_limit: Option<usize>,

    /// When true, failure of this source fails the whole run.
    #[serde(default)]
    pub required: bool,

    /// Maximum concurrent in-flight page fetches.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Retries per failing request after the first attempt.
    #[serde(default = "default_source_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

impl Default for DatasourceCommon {
    fn default() -> Self {
        Self {
            export_limit: None,
            required: false,
            max_concurrency: default_max_concurrency(),
            max_retries: default_source_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

impl DatasourceCommon {
    /// Retry policy applied to each page request.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            self.retry_base_delay_ms,
            self.retry_max_delay_ms,
        )
    }
}

fn default_max_concurrency() -> usize {
    4
}
fn default_source_max_retries() -> u32 {
    5
}
fn default_retry_base_delay_ms() -> u64 {
    500
}
fn default_retry_max_delay_ms() -> u64 {
    30_000
}

/// `name = "notion"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotionDatasourceConfig {
    #[serde(flatten)]
    pub common: DatasourceCommon,

    /// Database whose entries index the workspace content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_page_database_id: Option<String>,

    /// Objects exported concurrently per batch.
    #[serde(default = "default_export_batch_size")]
    pub export_batch_size: usize,

    #[serde(default = "default_notion_base_url")]
    pub base_url: String,
}

fn default_export_batch_size() -> usize {
    3
}
fn default_notion_base_url() -> String {
    "https://api.notion.com".into()
}

/// `name = "confluence"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfluenceDatasourceConfig {
    #[serde(flatten)]
    pub common: DatasourceCommon,

    pub host: String,

    #[serde(default = "default_https")]
    pub protocol: String,
}

impl ConfluenceDatasourceConfig {
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.host)
    }
}

fn default_https() -> String {
    "https".into()
}

/// `name = "hackernews"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HackernewsDatasourceConfig {
    #[serde(flatten)]
    pub common: DatasourceCommon,

    #[serde(default = "default_hackernews_base_url")]
    pub base_url: String,
}

fn default_hackernews_base_url() -> String {
    "https://hacker-news.firebaseio.com".into()
}

/// `name = "pdf"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdfDatasourceConfig {
    #[serde(flatten)]
    pub common: DatasourceCommon,

    /// Directory scanned for `*.pdf` files.
    pub base_path: PathBuf,
}

// ---------------------------------------------------------------------------
// Embedding model axis
// ---------------------------------------------------------------------------

/// Embedding-model provider, discriminated by `provider`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum EmbeddingModelConfig {
    Openai(OpenAiEmbeddingConfig),
    Voyage(VoyageEmbeddingConfig),
    HuggingFace(HuggingFaceEmbeddingConfig),
}

impl ProviderConfig for EmbeddingModelConfig {
    const AXIS: Axis = Axis::EmbeddingModel;
    const VARIANTS: &'static [&'static str] = &["openai", "voyage", "hugging_face"];

    fn discriminant(&self) -> &'static str {
        match self {
            EmbeddingModelConfig::Openai(_) => "openai",
            EmbeddingModelConfig::Voyage(_) => "voyage",
            EmbeddingModelConfig::HuggingFace(_) => "hugging_face",
        }
    }

    fn secret_fields(&self) -> &'static [SecretField] {
        const API_KEY: &[SecretField] = &[required("API_KEY")];
        const ACCESS_TOKEN: &[SecretField] = &[optional("ACCESS_TOKEN")];
        match self {
            EmbeddingModelConfig::Openai(_) | EmbeddingModelConfig::Voyage(_) => API_KEY,
            EmbeddingModelConfig::HuggingFace(_) => ACCESS_TOKEN,
        }
    }
}

impl EmbeddingModelConfig {
    /// Fields shared by every embedding model.
    pub fn common(&self) -> &EmbeddingModelCommon {
        match self {
            EmbeddingModelConfig::Openai(c) => &c.common,
            EmbeddingModelConfig::Voyage(c) => &c.common,
            EmbeddingModelConfig::HuggingFace(c) => &c.common,
        }
    }
}

/// Fields shared by every embedding-model variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingModelCommon {
    /// Model identifier sent to the provider.
    pub name: String,

    /// Tokenizer used for chunk budgeting.
    #[serde(default)]
    pub tokenizer: TokenizerConfig,

    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_model_max_retries")]
    pub max_retries: u32,

    #[serde(default)]
    pub splitting: SplittingConfig,
}

fn default_embedding_batch_size() -> usize {
    64
}
fn default_model_max_retries() -> u32 {
    3
}

/// `provider = "openai"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiEmbeddingConfig {
    #[serde(flatten)]
    pub common: EmbeddingModelCommon,

    /// Token ceiling of one embeddings request.
    #[serde(default = "default_max_request_size_in_tokens")]
    pub max_request_size_in_tokens: usize,

    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
}

fn default_max_request_size_in_tokens() -> usize {
    8191
}
fn default_openai_base_url() -> String {
    "https://api.openai.com".into()
}

/// `provider = "voyage"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoyageEmbeddingConfig {
    #[serde(flatten)]
    pub common: EmbeddingModelCommon,

    #[serde(default = "default_voyage_base_url")]
    pub base_url: String,
}

fn default_voyage_base_url() -> String {
    "https://api.voyageai.com".into()
}

/// `provider = "hugging_face"`: a text-embeddings-inference server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HuggingFaceEmbeddingConfig {
    #[serde(flatten)]
    pub common: EmbeddingModelCommon,

    #[serde(default = "default_tei_base_url")]
    pub base_url: String,
}

fn default_tei_base_url() -> String {
    "http://127.0.0.1:8080".into()
}

/// Tokenizer implementation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenizerKind {
    /// Words and punctuation.
    #[default]
    Regex,
    /// A `tokenizer.json` loaded with the `tokenizers` crate.
    Huggingface,
}

/// `[...embedding_model.tokenizer]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenizerConfig {
    #[serde(default)]
    pub kind: TokenizerKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Splitting strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitterKind {
    #[default]
    Basic,
}

/// `[...embedding_model.splitting]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplittingConfig {
    #[serde(default)]
    pub name: SplitterKind,

    #[serde(default = "default_chunk_size")]
    pub chunk_size_in_tokens: usize,

    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap_in_tokens: usize,
}

impl Default for SplittingConfig {
    fn default() -> Self {
        Self {
            name: SplitterKind::Basic,
            chunk_size_in_tokens: default_chunk_size(),
            chunk_overlap_in_tokens: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    384
}
fn default_chunk_overlap() -> usize {
    32
}

// ---------------------------------------------------------------------------
// Language model axis
// ---------------------------------------------------------------------------

/// Language-model provider, discriminated by `provider`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum LanguageModelConfig {
    Openai(OpenAiLanguageModelConfig),
    OpenaiLike(OpenAiLikeLanguageModelConfig),
}

impl ProviderConfig for LanguageModelConfig {
    const AXIS: Axis = Axis::LanguageModel;
    const VARIANTS: &'static [&'static str] = &["openai", "openai_like"];

    fn discriminant(&self) -> &'static str {
        match self {
            LanguageModelConfig::Openai(_) => "openai",
            LanguageModelConfig::OpenaiLike(_) => "openai_like",
        }
    }

    fn secret_fields(&self) -> &'static [SecretField] {
        const OPENAI: &[SecretField] = &[required("API_KEY")];
        const OPENAI_LIKE: &[SecretField] = &[optional("API_KEY"), required("API_BASE")];
        match self {
            LanguageModelConfig::Openai(_) => OPENAI,
            LanguageModelConfig::OpenaiLike(_) => OPENAI_LIKE,
        }
    }
}

impl LanguageModelConfig {
    /// Fields shared by every language model.
    pub fn common(&self) -> &LanguageModelCommon {
        match self {
            LanguageModelConfig::Openai(c) => &c.common,
            LanguageModelConfig::OpenaiLike(c) => &c.common,
        }
    }
}

/// Fields shared by every language-model variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageModelCommon {
    pub name: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_model_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_max_tokens() -> u32 {
    256
}
fn default_temperature() -> f32 {
    0.1
}

/// `provider = "openai"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiLanguageModelConfig {
    #[serde(flatten)]
    pub common: LanguageModelCommon,

    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
}

/// `provider = "openai_like"`: any OpenAI-compatible server, base URL from secrets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiLikeLanguageModelConfig {
    #[serde(flatten)]
    pub common: LanguageModelCommon,

    #[serde(default = "default_context_window")]
    pub context_window: usize,
}

fn default_context_window() -> usize {
    3900
}

// ---------------------------------------------------------------------------
// Vector store axis
// ---------------------------------------------------------------------------

/// Vector-store provider, discriminated by `name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum VectorStoreConfig {
    Qdrant(RemoteVectorStoreConfig),
    Chroma(RemoteVectorStoreConfig),
    Local(LocalVectorStoreConfig),
}

impl ProviderConfig for VectorStoreConfig {
    const AXIS: Axis = Axis::VectorStore;
    const VARIANTS: &'static [&'static str] = &["qdrant", "chroma", "local"];

    fn discriminant(&self) -> &'static str {
        match self {
            VectorStoreConfig::Qdrant(_) => "qdrant",
            VectorStoreConfig::Chroma(_) => "chroma",
            VectorStoreConfig::Local(_) => "local",
        }
    }

    fn secret_fields(&self) -> &'static [SecretField] {
        const QDRANT: &[SecretField] = &[optional("API_KEY")];
        match self {
            VectorStoreConfig::Qdrant(_) => QDRANT,
            VectorStoreConfig::Chroma(_) | VectorStoreConfig::Local(_) => &[],
        }
    }
}

impl VectorStoreConfig {
    /// Collection that identifies this ingestion run.
    pub fn collection_name(&self) -> &str {
        match self {
            VectorStoreConfig::Qdrant(c) | VectorStoreConfig::Chroma(c) => &c.collection_name,
            VectorStoreConfig::Local(c) => &c.collection_name,
        }
    }
}

/// Vector store reached over REST.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteVectorStoreConfig {
    pub collection_name: String,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_http")]
    pub protocol: String,

    pub ports: VectorStorePorts,
}

impl RemoteVectorStoreConfig {
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.ports.rest)
    }
}

/// `[...vector_store.ports]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStorePorts {
    pub rest: u16,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_http() -> String {
    "http".into()
}

/// `name = "local"`: embedded libSQL file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalVectorStoreConfig {
    pub collection_name: String,
    pub path: PathBuf,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Serialization format of a configuration document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Toml,
    Json,
}

impl DocumentFormat {
    /// JSON when the extension is `.json`, TOML otherwise.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => DocumentFormat::Json,
            _ => DocumentFormat::Toml,
        }
    }
}

/// Default document path for an environment.
pub fn default_config_path(environment: Environment) -> PathBuf {
    PathBuf::from(CONFIG_DIR_NAME).join(format!("configuration.{environment}.toml"))
}

/// Parse a configuration document from text.
pub fn parse_document(text: &str, format: DocumentFormat) -> Result<PipelineConfiguration> {
    match format {
        DocumentFormat::Toml => toml::from_str(text)
            .map_err(|e| RagKbError::configuration(e.message().to_string())),
        DocumentFormat::Json => {
            serde_json::from_str(text).map_err(|e| RagKbError::configuration(e.to_string()))
        }
    }
}

/// Load and parse a configuration document from disk.
pub fn load_document(path: &Path) -> Result<PipelineConfiguration> {
    let content = std::fs::read_to_string(path).map_err(|e| RagKbError::io(path, e))?;
    parse_document(&content, DocumentFormat::from_path(path)).map_err(|e| match e {
        RagKbError::Configuration { message } => {
            RagKbError::configuration(format!("{}: {message}", path.display()))
        }
        other => other,
    })
}
