//! Secret bundle.
//!
//! Secrets are keyed `RAG__{AXIS}__{PROVIDER}__{FIELD}` and come from an
//! optional dotenv file merged with the process environment; the process
//! environment wins. Values never appear in `Debug` output or serialized form.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::{Axis, CONFIG_DIR_NAME, Environment};
use crate::error::{RagKbError, Result};

/// Leading segment of every secret key.
pub const SECRET_NAMESPACE: &str = "RAG";

/// Build the secret key for one provider field.
pub fn secret_key(axis: Axis, discriminant: &str, field: &str) -> String {
    format!(
        "{SECRET_NAMESPACE}__{}__{}__{}",
        axis.secret_segment(),
        discriminant.to_ascii_uppercase(),
        field.to_ascii_uppercase()
    )
}

/// Default secrets file for an environment.
pub fn default_secrets_path(environment: Environment) -> PathBuf {
    PathBuf::from(CONFIG_DIR_NAME).join(format!("secrets.{environment}.env"))
}

/// A secret value. Only [`SecretValue::expose`] reveals it.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretValue(***)")
    }
}

/// Name/value pairs of every `RAG__` secret visible to this process.
#[derive(Clone, Default)]
pub struct SecretBundle {
    values: BTreeMap<String, SecretValue>,
}

impl fmt::Debug for SecretBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretBundle")
            .field("keys", &self.values.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SecretBundle {
    /// Load the dotenv file (when given and present) and overlay `RAG__*`
    /// variables from the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut bundle = Self::default();

        if let Some(path) = path {
            if path.exists() {
                let iter = dotenvy::from_path_iter(path).map_err(|e| {
                    RagKbError::configuration(format!("{}: {e}", path.display()))
                })?;
                for item in iter {
                    let (key, value) = item.map_err(|e| {
                        RagKbError::configuration(format!("{}: {e}", path.display()))
                    })?;
                    bundle.insert(key, value);
                }
                tracing::debug!(path = %path.display(), "loaded secrets file");
            } else {
                tracing::debug!(path = %path.display(), "secrets file not found, using environment only");
            }
        }

        let prefix = format!("{SECRET_NAMESPACE}__");
        for (key, value) in std::env::vars() {
            if key.starts_with(&prefix) {
                bundle.insert(key, value);
            }
        }

        Ok(bundle)
    }

    /// Build a bundle from explicit pairs.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut bundle = Self::default();
        for (k, v) in pairs {
            bundle.insert(k.into(), v.into());
        }
        bundle
    }

    fn insert(&mut self, key: String, value: String) {
        // Empty values count as absent.
        if value.is_empty() {
            self.values.remove(&key);
        } else {
            self.values.insert(key, SecretValue(value));
        }
    }

    pub fn get(&self, key: &str) -> Option<&SecretValue> {
        self.values.get(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn key_layout() {
        assert_eq!(
            secret_key(Axis::EmbeddingModel, "openai", "api_key"),
            "RAG__EMBEDDING_MODELS__OPENAI__API_KEY"
        );
        assert_eq!(
            secret_key(Axis::LanguageModel, "openai_like", "API_BASE"),
            "RAG__LLMS__OPENAI_LIKE__API_BASE"
        );
        assert_eq!(
            secret_key(Axis::Datasource, "notion", "API_TOKEN"),
            "RAG__DATASOURCES__NOTION__API_TOKEN"
        );
    }

    #[test]
    fn debug_never_shows_values() {
        let bundle = SecretBundle::from_pairs([("RAG__LLMS__OPENAI__API_KEY", "sk-very-secret")]);
        let rendered = format!("{bundle:?} {:?}", bundle.get("RAG__LLMS__OPENAI__API_KEY"));
        assert!(!rendered.contains("sk-very-secret"));
        assert!(rendered.contains("RAG__LLMS__OPENAI__API_KEY"));
    }

    #[test]
    fn empty_value_is_absent() {
        let bundle = SecretBundle::from_pairs([("RAG__X__Y__Z", "")]);
        assert!(bundle.get("RAG__X__Y__Z").is_none());
        assert!(bundle.is_empty());
    }

    #[test]
    fn loads_dotenv_file() {
        let path = std::env::temp_dir().join(format!("ragkb-secrets-{}.env", Uuid::now_v7()));
        std::fs::write(
            &path,
            "RAG__VECTOR_STORES__QDRANT__API_KEY=qk\nRAG__DATASOURCES__NOTION__API_TOKEN=\"nt\"\n",
        )
        .expect("write secrets");

        let bundle = SecretBundle::load(Some(&path)).expect("load");
        assert_eq!(
            bundle.get("RAG__VECTOR_STORES__QDRANT__API_KEY").map(|s| s.expose()),
            Some("qk")
        );
        assert_eq!(
            bundle.get("RAG__DATASOURCES__NOTION__API_TOKEN").map(|s| s.expose()),
            Some("nt")
        );

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let path = std::env::temp_dir().join(format!("ragkb-none-{}.env", Uuid::now_v7()));
        assert!(SecretBundle::load(Some(&path)).is_ok());
    }
}
