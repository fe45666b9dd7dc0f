//! Component registry: discriminant → builder, per axis.
//!
//! The table is fixed at compile time. Each registration names the
//! capabilities its builder reads from [`Dependencies`]; the binder checks
//! them before calling the builder, so a provider never depends on another
//! provider's discriminant, only on the capability it supplies.

use std::fmt;
use std::sync::Arc;

use ragkb_datasources::{
    BasicCleaner, Cleaner, ConfluenceReader, DatasourceManager, DocumentReader, HackernewsCleaner,
    HackernewsReader, NotionCleaner, NotionReader, PdfReader,
};
use ragkb_providers::{ChatCompletionModel, EmbeddingModel, LanguageModel, RemoteEmbeddingModel};
use ragkb_shared::{
    Axis, DatasourceConfig, LanguageModelConfig, ProviderConfig, RagKbError, Resolved,
    ResolvedEmbeddingModel, Result, VectorStoreConfig,
};
use ragkb_storage::{ChromaVectorStore, LocalVectorStore, QdrantVectorStore, VectorStore};

use crate::binder::Dependencies;
use crate::validators::{self, Validator};

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// A type of component in the runtime graph. Builders declare what they
/// need in these terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    HttpClient,
    Tokenizer,
    Splitter,
    EmbeddingModel,
    VectorStore,
    DatasourceManager,
    LanguageModel,
    QueryEngine,
}

/// Order in which the binder constructs capabilities.
pub const BIND_ORDER: [Capability; 8] = [
    Capability::HttpClient,
    Capability::Tokenizer,
    Capability::Splitter,
    Capability::EmbeddingModel,
    Capability::VectorStore,
    Capability::DatasourceManager,
    Capability::LanguageModel,
    Capability::QueryEngine,
];

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::HttpClient => "HttpClient",
            Capability::Tokenizer => "Tokenizer",
            Capability::Splitter => "Splitter",
            Capability::EmbeddingModel => "EmbeddingModel",
            Capability::VectorStore => "VectorStore",
            Capability::DatasourceManager => "DatasourceManager",
            Capability::LanguageModel => "LanguageModel",
            Capability::QueryEngine => "QueryEngine",
        }
    }

    /// Position in [`BIND_ORDER`].
    pub fn rank(&self) -> usize {
        BIND_ORDER.iter().position(|c| c == self).unwrap_or(BIND_ORDER.len())
    }

    /// Capability produced by providers of `axis`.
    pub fn for_axis(axis: Axis) -> Self {
        match axis {
            Axis::Datasource => Capability::DatasourceManager,
            Axis::EmbeddingModel => Capability::EmbeddingModel,
            Axis::LanguageModel => Capability::LanguageModel,
            Axis::VectorStore => Capability::VectorStore,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Registrations
// ---------------------------------------------------------------------------

pub type DatasourceBuilder = fn(&Dependencies, &Resolved<DatasourceConfig>) -> Result<DatasourceManager>;
pub type EmbeddingModelBuilder =
    fn(&Dependencies, &ResolvedEmbeddingModel) -> Result<Arc<dyn EmbeddingModel>>;
pub type LanguageModelBuilder =
    fn(&Dependencies, &Resolved<LanguageModelConfig>) -> Result<Arc<dyn LanguageModel>>;
pub type VectorStoreBuilder =
    fn(&Dependencies, &Resolved<VectorStoreConfig>) -> Result<Arc<dyn VectorStore>>;

/// Factory for one provider variant, typed by axis.
#[derive(Clone, Copy)]
pub enum Builder {
    Datasource(DatasourceBuilder),
    EmbeddingModel(EmbeddingModelBuilder),
    LanguageModel(LanguageModelBuilder),
    VectorStore(VectorStoreBuilder),
}

impl Builder {
    fn axis(&self) -> Axis {
        match self {
            Builder::Datasource(_) => Axis::Datasource,
            Builder::EmbeddingModel(_) => Axis::EmbeddingModel,
            Builder::LanguageModel(_) => Axis::LanguageModel,
            Builder::VectorStore(_) => Axis::VectorStore,
        }
    }
}

/// One row of the registry.
#[derive(Clone, Copy)]
pub struct Registration {
    pub axis: Axis,
    pub discriminant: &'static str,
    pub builder: Builder,
    /// Pre-flight check for resource-creating providers.
    pub validator: Option<Validator>,
    /// Capabilities the builder reads from [`Dependencies`].
    pub requires: &'static [Capability],
}

impl Registration {
    /// Capability this registration supplies.
    pub fn capability(&self) -> Capability {
        Capability::for_axis(self.axis)
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("axis", &self.axis)
            .field("discriminant", &self.discriminant)
            .field("validator", &self.validator.is_some())
            .field("requires", &self.requires)
            .finish()
    }
}

const HTTP: &[Capability] = &[Capability::HttpClient];

const BUILTIN: &[Registration] = &[
    // datasources
    Registration {
        axis: Axis::Datasource,
        discriminant: "notion",
        builder: Builder::Datasource(build_notion),
        validator: None,
        requires: HTTP,
    },
    Registration {
        axis: Axis::Datasource,
        discriminant: "confluence",
        builder: Builder::Datasource(build_confluence),
        validator: None,
        requires: HTTP,
    },
    Registration {
        axis: Axis::Datasource,
        discriminant: "hackernews",
        builder: Builder::Datasource(build_hackernews),
        validator: None,
        requires: HTTP,
    },
    Registration {
        axis: Axis::Datasource,
        discriminant: "pdf",
        builder: Builder::Datasource(build_pdf),
        validator: None,
        requires: &[],
    },
    // embedding models
    Registration {
        axis: Axis::EmbeddingModel,
        discriminant: "openai",
        builder: Builder::EmbeddingModel(build_remote_embedding),
        validator: None,
        requires: HTTP,
    },
    Registration {
        axis: Axis::EmbeddingModel,
        discriminant: "voyage",
        builder: Builder::EmbeddingModel(build_remote_embedding),
        validator: None,
        requires: HTTP,
    },
    Registration {
        axis: Axis::EmbeddingModel,
        discriminant: "hugging_face",
        builder: Builder::EmbeddingModel(build_remote_embedding),
        validator: None,
        requires: HTTP,
    },
    // language models
    Registration {
        axis: Axis::LanguageModel,
        discriminant: "openai",
        builder: Builder::LanguageModel(build_chat_completion),
        validator: None,
        requires: HTTP,
    },
    Registration {
        axis: Axis::LanguageModel,
        discriminant: "openai_like",
        builder: Builder::LanguageModel(build_chat_completion),
        validator: None,
        requires: HTTP,
    },
    // vector stores
    Registration {
        axis: Axis::VectorStore,
        discriminant: "qdrant",
        builder: Builder::VectorStore(build_qdrant),
        validator: Some(validators::collection_absent),
        requires: HTTP,
    },
    Registration {
        axis: Axis::VectorStore,
        discriminant: "chroma",
        builder: Builder::VectorStore(build_chroma),
        validator: Some(validators::collection_absent),
        requires: HTTP,
    },
    Registration {
        axis: Axis::VectorStore,
        discriminant: "local",
        builder: Builder::VectorStore(build_local),
        validator: Some(validators::collection_absent),
        requires: &[],
    },
];

/// Read-only lookup table from `(axis, discriminant)` to [`Registration`].
#[derive(Debug, Clone)]
pub struct ComponentRegistry {
    entries: Vec<Registration>,
}

impl ComponentRegistry {
    /// Every provider shipped with ragkb.
    pub fn builtin() -> Self {
        Self {
            entries: BUILTIN.to_vec(),
        }
    }

    /// A registry with exactly `entries`. Rejects entries whose builder
    /// belongs to a different axis, and duplicate keys.
    pub fn from_entries(entries: Vec<Registration>) -> Result<Self> {
        for (i, entry) in entries.iter().enumerate() {
            if entry.builder.axis() != entry.axis {
                return Err(RagKbError::configuration(format!(
                    "registration '{}' on the {} axis has a {} builder",
                    entry.discriminant,
                    entry.axis,
                    entry.builder.axis()
                )));
            }
            if entries[..i]
                .iter()
                .any(|e| e.axis == entry.axis && e.discriminant == entry.discriminant)
            {
                return Err(RagKbError::configuration(format!(
                    "duplicate {} registration '{}'",
                    entry.axis, entry.discriminant
                )));
            }
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[Registration] {
        &self.entries
    }

    /// Registration for a discriminant, or `UnregisteredProvider`.
    pub fn lookup(&self, axis: Axis, discriminant: &str) -> Result<&Registration> {
        self.entries
            .iter()
            .find(|e| e.axis == axis && e.discriminant == discriminant)
            .ok_or_else(|| RagKbError::UnregisteredProvider {
                axis: axis.to_string(),
                discriminant: discriminant.to_string(),
            })
    }

    /// Registered discriminants for one axis, in table order.
    pub fn discriminants(&self, axis: Axis) -> Vec<&'static str> {
        self.entries
            .iter()
            .filter(|e| e.axis == axis)
            .map(|e| e.discriminant)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

fn variant_mismatch<T: ProviderConfig>(expected: &str, config: &T) -> RagKbError {
    RagKbError::configuration(format!(
        "{} builder '{expected}' received a '{}' configuration",
        T::AXIS,
        config.discriminant()
    ))
}

fn manager(
    resolved: &Resolved<DatasourceConfig>,
    reader: impl DocumentReader + 'static,
    cleaner: impl Cleaner + 'static,
) -> DatasourceManager {
    DatasourceManager::new(
        resolved.discriminant(),
        resolved.config.common().required,
        Box::new(reader),
        Box::new(cleaner),
    )
}

fn build_notion(deps: &Dependencies, resolved: &Resolved<DatasourceConfig>) -> Result<DatasourceManager> {
    let DatasourceConfig::Notion(config) = &resolved.config else {
        return Err(variant_mismatch("notion", &resolved.config));
    };
    let token = resolved.secrets.require("API_TOKEN")?.clone();
    let reader = NotionReader::new(deps.client()?.clone(), config.clone(), token);
    Ok(manager(resolved, reader, NotionCleaner))
}

fn build_confluence(
    deps: &Dependencies,
    resolved: &Resolved<DatasourceConfig>,
) -> Result<DatasourceManager> {
    let DatasourceConfig::Confluence(config) = &resolved.config else {
        return Err(variant_mismatch("confluence", &resolved.config));
    };
    let username = resolved.secrets.require("USERNAME")?.expose();
    let password = resolved.secrets.require("PASSWORD")?.clone();
    let reader = ConfluenceReader::new(deps.client()?.clone(), config.clone(), username, password);
    Ok(manager(resolved, reader, BasicCleaner))
}

fn build_hackernews(
    deps: &Dependencies,
    resolved: &Resolved<DatasourceConfig>,
) -> Result<DatasourceManager> {
    let DatasourceConfig::Hackernews(config) = &resolved.config else {
        return Err(variant_mismatch("hackernews", &resolved.config));
    };
    let reader = HackernewsReader::new(deps.client()?.clone(), config.clone());
    Ok(manager(resolved, reader, HackernewsCleaner))
}

fn build_pdf(_deps: &Dependencies, resolved: &Resolved<DatasourceConfig>) -> Result<DatasourceManager> {
    let DatasourceConfig::Pdf(config) = &resolved.config else {
        return Err(variant_mismatch("pdf", &resolved.config));
    };
    Ok(manager(resolved, PdfReader::new(config.clone()), BasicCleaner))
}

fn build_remote_embedding(
    deps: &Dependencies,
    resolved: &ResolvedEmbeddingModel,
) -> Result<Arc<dyn EmbeddingModel>> {
    let model = RemoteEmbeddingModel::from_resolved(deps.client()?.clone(), resolved)?;
    Ok(Arc::new(model))
}

fn build_chat_completion(
    deps: &Dependencies,
    resolved: &Resolved<LanguageModelConfig>,
) -> Result<Arc<dyn LanguageModel>> {
    let model = ChatCompletionModel::from_resolved(deps.client()?.clone(), resolved)?;
    Ok(Arc::new(model))
}

fn build_qdrant(deps: &Dependencies, resolved: &Resolved<VectorStoreConfig>) -> Result<Arc<dyn VectorStore>> {
    let VectorStoreConfig::Qdrant(config) = &resolved.config else {
        return Err(variant_mismatch("qdrant", &resolved.config));
    };
    Ok(Arc::new(QdrantVectorStore::new(
        deps.client()?.clone(),
        &config.url(),
        config.collection_name.clone(),
        resolved.secrets.get("API_KEY").cloned(),
    )))
}

fn build_chroma(deps: &Dependencies, resolved: &Resolved<VectorStoreConfig>) -> Result<Arc<dyn VectorStore>> {
    let VectorStoreConfig::Chroma(config) = &resolved.config else {
        return Err(variant_mismatch("chroma", &resolved.config));
    };
    Ok(Arc::new(ChromaVectorStore::new(
        deps.client()?.clone(),
        &config.url(),
        config.collection_name.clone(),
    )))
}

/// The database file is opened on first use, so binding stays free of I/O.
fn build_local(_deps: &Dependencies, resolved: &Resolved<VectorStoreConfig>) -> Result<Arc<dyn VectorStore>> {
    let VectorStoreConfig::Local(config) = &resolved.config else {
        return Err(variant_mismatch("local", &resolved.config));
    };
    Ok(Arc::new(LocalVectorStore::new(
        config.path.clone(),
        config.collection_name.clone(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_config_variant_is_registered() {
        let registry = ComponentRegistry::builtin();
        for (axis, variants) in [
            (Axis::Datasource, DatasourceConfig::VARIANTS),
            (Axis::EmbeddingModel, ragkb_shared::EmbeddingModelConfig::VARIANTS),
            (Axis::LanguageModel, LanguageModelConfig::VARIANTS),
            (Axis::VectorStore, VectorStoreConfig::VARIANTS),
        ] {
            for variant in variants {
                let entry = registry.lookup(axis, variant).expect("registered");
                assert_eq!(entry.builder.axis(), axis);
            }
            assert_eq!(registry.discriminants(axis), variants.to_vec());
        }
    }

    #[test]
    fn requirements_are_bound_earlier() {
        for entry in ComponentRegistry::builtin().entries() {
            for needed in entry.requires {
                assert!(
                    needed.rank() < entry.capability().rank(),
                    "{} '{}' requires {needed}, bound after {}",
                    entry.axis,
                    entry.discriminant,
                    entry.capability()
                );
            }
        }
    }

    #[test]
    fn vector_stores_carry_the_collection_validator() {
        let registry = ComponentRegistry::builtin();
        for variant in VectorStoreConfig::VARIANTS {
            assert!(registry.lookup(Axis::VectorStore, variant).unwrap().validator.is_some());
        }
    }

    #[test]
    fn unknown_discriminant_is_unregistered() {
        let err = ComponentRegistry::builtin()
            .lookup(Axis::VectorStore, "milvus")
            .unwrap_err();
        assert_eq!(err.kind(), "UnregisteredProviderError");
        assert!(err.to_string().contains("vector store"));
        assert!(err.to_string().contains("milvus"));
    }

    #[test]
    fn from_entries_rejects_mismatched_and_duplicate_rows() {
        let mut row = ComponentRegistry::builtin().entries()[0];
        row.axis = Axis::VectorStore;
        assert!(ComponentRegistry::from_entries(vec![row]).is_err());

        let row = ComponentRegistry::builtin().entries()[0];
        assert!(ComponentRegistry::from_entries(vec![row, row]).is_err());
    }
}
