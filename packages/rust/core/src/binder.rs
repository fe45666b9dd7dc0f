//! Hand-written assembly of the runtime component graph.
//!
//! Components are constructed once, in [`BIND_ORDER`], and handed out as
//! immutable graphs. Every builder reads its inputs from [`Dependencies`],
//! which only exposes capabilities that are already bound. Binding never
//! touches the network: clients are built, not used.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tracing::{debug, info, instrument};

use ragkb_datasources::DatasourceManager;
use ragkb_markdown::{MarkdownSplitter, Tokenizer, build_tokenizer};
use ragkb_providers::{EmbeddingModel, LanguageModel};
use ragkb_shared::http::build_client;
use ragkb_shared::{
    Axis, DatasourceConfig, LanguageModelConfig, RagKbError, Resolved, ResolvedConfiguration,
    ResolvedEmbeddingModel, ResolvedIngestion, Result, VectorStoreConfig,
};
use ragkb_storage::VectorStore;

use crate::query_engine::{QueryEngine, Retriever, TreeSynthesizer};
use crate::registry::{BIND_ORDER, Builder, Capability, ComponentRegistry, Registration};
use crate::validators::Validator;

/// Timeout applied to every outgoing request.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(60);

const QUERY_ENGINE_REQUIRES: &[Capability] = &[
    Capability::EmbeddingModel,
    Capability::VectorStore,
    Capability::LanguageModel,
];

// ---------------------------------------------------------------------------
// Dependencies
// ---------------------------------------------------------------------------

/// Capabilities bound so far. Builders receive this and read what they
/// declared in [`Registration::requires`].
#[derive(Default)]
pub struct Dependencies {
    client: Option<Client>,
    tokenizer: Option<Arc<dyn Tokenizer>>,
    splitter: Option<Arc<MarkdownSplitter>>,
    bound: Vec<Capability>,
}

fn unbound(capability: Capability) -> RagKbError {
    RagKbError::configuration(format!("{capability} requested before it was bound"))
}

impl Dependencies {
    pub fn client(&self) -> Result<&Client> {
        self.client.as_ref().ok_or_else(|| unbound(Capability::HttpClient))
    }

    pub fn tokenizer(&self) -> Result<&Arc<dyn Tokenizer>> {
        self.tokenizer.as_ref().ok_or_else(|| unbound(Capability::Tokenizer))
    }

    pub fn splitter(&self) -> Result<&Arc<MarkdownSplitter>> {
        self.splitter.as_ref().ok_or_else(|| unbound(Capability::Splitter))
    }

    /// Capabilities in the order they were bound. Repeated capabilities
    /// (several datasources, several LLMs) appear once.
    pub fn bound(&self) -> &[Capability] {
        &self.bound
    }

    fn mark(&mut self, capability: Capability) {
        if !self.bound.contains(&capability) {
            debug!(%capability, "bound");
            self.bound.push(capability);
        }
    }

    fn ensure(&self, who: &str, requires: &[Capability]) -> Result<()> {
        match requires.iter().find(|c| !self.bound.contains(c)) {
            Some(missing) => Err(RagKbError::configuration(format!(
                "{who} requires {missing}, which is not bound"
            ))),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Component graphs
// ---------------------------------------------------------------------------

/// Everything the ingest trigger runs with.
pub struct IngestionComponents {
    pub splitter: Arc<MarkdownSplitter>,
    pub embedding_model: Arc<dyn EmbeddingModel>,
    pub vector_store: Arc<dyn VectorStore>,
    /// One manager per configured datasource, in configuration order.
    pub datasources: Vec<DatasourceManager>,
    /// Pre-flight checks attached to the vector-store registration.
    pub validators: Vec<Validator>,
    pub bind_order: Vec<Capability>,
}

/// Everything the chat trigger runs with.
pub struct AugmentationComponents {
    pub query_engine: QueryEngine,
    pub bind_order: Vec<Capability>,
}

/// Everything the evaluation trigger runs with.
pub struct EvaluationComponents {
    pub query_engine: QueryEngine,
    pub judge_llm: Arc<dyn LanguageModel>,
    pub judge_embedding_model: Arc<dyn EmbeddingModel>,
    pub bind_order: Vec<Capability>,
}

// ---------------------------------------------------------------------------
// Binder
// ---------------------------------------------------------------------------

pub struct Binder<'r> {
    registry: &'r ComponentRegistry,
    http_timeout: Duration,
}

impl<'r> Binder<'r> {
    pub fn new(registry: &'r ComponentRegistry) -> Self {
        Self {
            registry,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Bind the ingestion graph: HTTP client, tokenizer, splitter, embedding
    /// model, vector store, then datasources in configuration order.
    #[instrument(skip_all, fields(datasources = resolved.datasources.len()))]
    pub fn bind_ingestion(&self, resolved: &ResolvedIngestion) -> Result<IngestionComponents> {
        // Look every discriminant up first so an unregistered one fails
        // before anything is constructed.
        let embedding_reg = self.lookup(Axis::EmbeddingModel, resolved.embedding_model.discriminant())?;
        let store_reg = self.lookup(Axis::VectorStore, resolved.vector_store.discriminant())?;
        let datasource_regs = resolved
            .datasources
            .iter()
            .map(|ds| self.lookup(Axis::Datasource, ds.discriminant()))
            .collect::<Result<Vec<_>>>()?;

        let mut deps = Dependencies::default();
        self.bind_http(&mut deps)?;
        bind_splitter(&mut deps, &resolved.embedding_model)?;

        let embedding_model = build_embedding_model(&deps, embedding_reg, &resolved.embedding_model)?;
        deps.mark(Capability::EmbeddingModel);

        let vector_store = build_vector_store(&deps, store_reg, &resolved.vector_store)?;
        deps.mark(Capability::VectorStore);

        let mut datasources = Vec::with_capacity(resolved.datasources.len());
        for (registration, config) in datasource_regs.into_iter().zip(&resolved.datasources) {
            datasources.push(build_datasource(&deps, registration, config)?);
        }
        deps.mark(Capability::DatasourceManager);

        let splitter = deps.splitter()?.clone();
        info!(
            embedding_model = embedding_model.name(),
            batch_size = embedding_model.batch_size(),
            collection = vector_store.collection_name(),
            sources = ?datasources.iter().map(|d| d.name()).collect::<Vec<_>>(),
            "ingestion components bound"
        );

        Ok(IngestionComponents {
            splitter,
            embedding_model,
            vector_store,
            datasources,
            validators: store_reg.validator.into_iter().collect(),
            bind_order: deps.bound,
        })
    }

    /// Bind the chat graph. The retriever reads the ingestion stage's
    /// embedding model and collection.
    #[instrument(skip_all)]
    pub fn bind_augmentation(&self, resolved: &ResolvedConfiguration) -> Result<AugmentationComponents> {
        let mut deps = Dependencies::default();
        let query_engine = self.bind_query_engine(&mut deps, resolved)?;
        Ok(AugmentationComponents {
            query_engine,
            bind_order: deps.bound,
        })
    }

    /// Bind the evaluation graph: the chat graph plus the judge models.
    #[instrument(skip_all)]
    pub fn bind_evaluation(&self, resolved: &ResolvedConfiguration) -> Result<EvaluationComponents> {
        let evaluation = resolved.evaluation.as_ref().ok_or_else(|| {
            RagKbError::configuration("pipeline.evaluation section is required for 'evaluate'")
        })?;
        let judge_embedding_reg = self.lookup(
            Axis::EmbeddingModel,
            evaluation.judge_embedding_model.discriminant(),
        )?;
        let judge_llm_reg = self.lookup(Axis::LanguageModel, evaluation.judge_llm.discriminant())?;

        let mut deps = Dependencies::default();
        let query_engine = self.bind_query_engine(&mut deps, resolved)?;
        let judge_embedding_model =
            build_embedding_model(&deps, judge_embedding_reg, &evaluation.judge_embedding_model)?;
        let judge_llm = build_language_model(&deps, judge_llm_reg, &evaluation.judge_llm)?;
        info!(
            judge_llm = judge_llm.name(),
            judge_embedding_model = judge_embedding_model.name(),
            "evaluation components bound"
        );

        Ok(EvaluationComponents {
            query_engine,
            judge_llm,
            judge_embedding_model,
            bind_order: deps.bound,
        })
    }

    fn lookup(&self, axis: Axis, discriminant: &str) -> Result<&'r Registration> {
        self.registry.lookup(axis, discriminant)
    }

    fn bind_http(&self, deps: &mut Dependencies) -> Result<()> {
        deps.client = Some(build_client(self.http_timeout)?);
        deps.mark(Capability::HttpClient);
        Ok(())
    }

    fn bind_query_engine(
        &self,
        deps: &mut Dependencies,
        resolved: &ResolvedConfiguration,
    ) -> Result<QueryEngine> {
        let augmentation = resolved.augmentation.as_ref().ok_or_else(|| {
            RagKbError::configuration(format!(
                "pipeline.augmentation section is required for '{}'",
                resolved.trigger.as_str()
            ))
        })?;
        let ingestion = &resolved.ingestion;
        let embedding_reg = self.lookup(Axis::EmbeddingModel, ingestion.embedding_model.discriminant())?;
        let store_reg = self.lookup(Axis::VectorStore, ingestion.vector_store.discriminant())?;
        let retriever_reg = self.lookup(Axis::LanguageModel, augmentation.retriever_llm.discriminant())?;
        let synthesizer_reg =
            self.lookup(Axis::LanguageModel, augmentation.synthesizer_llm.discriminant())?;

        self.bind_http(deps)?;

        let embedding_model = build_embedding_model(deps, embedding_reg, &ingestion.embedding_model)?;
        deps.mark(Capability::EmbeddingModel);

        let vector_store = build_vector_store(deps, store_reg, &ingestion.vector_store)?;
        deps.mark(Capability::VectorStore);

        let retriever_llm = build_language_model(deps, retriever_reg, &augmentation.retriever_llm)?;
        let synthesizer_llm =
            build_language_model(deps, synthesizer_reg, &augmentation.synthesizer_llm)?;
        deps.mark(Capability::LanguageModel);

        deps.ensure("query engine", QUERY_ENGINE_REQUIRES)?;
        let retriever_config = &augmentation.query_engine.retriever;
        let engine = QueryEngine::new(
            Retriever::new(
                retriever_config.name,
                retriever_config.similarity_top_k,
                embedding_model,
                vector_store,
                retriever_llm,
            ),
            TreeSynthesizer::new(synthesizer_llm),
        );
        deps.mark(Capability::QueryEngine);
        Ok(engine)
    }
}

fn bind_splitter(deps: &mut Dependencies, embedding: &ResolvedEmbeddingModel) -> Result<()> {
    let tokenizer = build_tokenizer(&embedding.config.common().tokenizer)?;
    deps.tokenizer = Some(tokenizer);
    deps.mark(Capability::Tokenizer);

    let splitter = MarkdownSplitter::from_config(deps.tokenizer()?.clone(), embedding.splitting())?;
    deps.splitter = Some(Arc::new(splitter));
    deps.mark(Capability::Splitter);
    Ok(())
}

fn who(registration: &Registration) -> String {
    format!("{} '{}'", registration.axis, registration.discriminant)
}

fn mismatched(registration: &Registration) -> RagKbError {
    RagKbError::configuration(format!(
        "registry entry {} has a builder for another axis",
        who(registration)
    ))
}

fn build_embedding_model(
    deps: &Dependencies,
    registration: &Registration,
    resolved: &ResolvedEmbeddingModel,
) -> Result<Arc<dyn EmbeddingModel>> {
    deps.ensure(&who(registration), registration.requires)?;
    let Builder::EmbeddingModel(build) = registration.builder else {
        return Err(mismatched(registration));
    };
    build(deps, resolved)
}

fn build_vector_store(
    deps: &Dependencies,
    registration: &Registration,
    resolved: &Resolved<VectorStoreConfig>,
) -> Result<Arc<dyn VectorStore>> {
    deps.ensure(&who(registration), registration.requires)?;
    let Builder::VectorStore(build) = registration.builder else {
        return Err(mismatched(registration));
    };
    build(deps, resolved)
}

fn build_datasource(
    deps: &Dependencies,
    registration: &Registration,
    resolved: &Resolved<DatasourceConfig>,
) -> Result<DatasourceManager> {
    deps.ensure(&who(registration), registration.requires)?;
    let Builder::Datasource(build) = registration.builder else {
        return Err(mismatched(registration));
    };
    build(deps, resolved)
}

fn build_language_model(
    deps: &Dependencies,
    registration: &Registration,
    resolved: &Resolved<LanguageModelConfig>,
) -> Result<Arc<dyn LanguageModel>> {
    deps.ensure(&who(registration), registration.requires)?;
    let Builder::LanguageModel(build) = registration.builder else {
        return Err(mismatched(registration));
    };
    build(deps, resolved)
}

/// Whether `order` respects [`BIND_ORDER`].
pub fn follows_bind_order(order: &[Capability]) -> bool {
    order.windows(2).all(|w| w[0].rank() < w[1].rank()) && order.iter().all(|c| BIND_ORDER.contains(c))
}
