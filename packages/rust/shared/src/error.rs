//! Error types for ragkb.
//!
//! Library crates use [`RagKbError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` and prints [`RagKbError::kind`] on exit.

use std::path::PathBuf;

/// Top-level error type for all ragkb operations.
#[derive(Debug, thiserror::Error)]
pub enum RagKbError {
    /// Malformed configuration document, bad discriminant, or invalid field.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// A secret required by the selected provider is absent.
    #[error("missing secret: {key} is not set")]
    MissingSecret { key: String },

    /// A discriminant with no entry in the component registry.
    #[error("unregistered provider: no {axis} provider registered as '{discriminant}'")]
    UnregisteredProvider { axis: String, discriminant: String },

    /// The resource a run would create is already present.
    #[error("resource already exists: {resource}")]
    ResourceAlreadyExists { resource: String },

    /// A knowledge source exhausted its retries or failed outright.
    #[error("source unavailable: {datasource}: {message}")]
    SourceUnavailable { datasource: String, message: String },

    /// An embedding batch failed after exhausting retries.
    #[error("embedding request failed: {0}")]
    EmbeddingRequest(String),

    /// A vector-store write was rejected.
    #[error("storage write failed: {0}")]
    StorageWrite(String),

    /// Vector-store read or connection error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Transport-level failure (connect, timeout, body read).
    #[error("network error: {0}")]
    Network(String),

    /// Non-success HTTP status from an upstream API.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// HTTP 429 from an upstream API.
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<u64>,
    },

    /// Response or content could not be parsed.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// A pre-flight validator rejected the run.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Language-model completion error.
    #[error("language model error: {0}")]
    LanguageModel(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// HTML-to-Markdown conversion error.
    #[error("conversion error: {0}")]
    Conversion(String),

    /// Operator cancelled the run between batches.
    #[error("run cancelled")]
    Cancelled,
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, RagKbError>;

impl RagKbError {
    /// Create a configuration error from any displayable message.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Map a non-success HTTP status to the matching variant.
    pub fn from_status(status: u16, body: &str, retry_after: Option<u64>) -> Self {
        let message: String = body.chars().take(300).collect();
        if status == 429 {
            Self::RateLimited {
                message,
                retry_after,
            }
        } else {
            Self::Http { status, message }
        }
    }

    /// Stable taxonomy name, printed by the CLI on failure.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "ConfigurationError",
            Self::MissingSecret { .. } => "MissingSecretError",
            Self::UnregisteredProvider { .. } => "UnregisteredProviderError",
            Self::ResourceAlreadyExists { .. } => "ResourceAlreadyExistsError",
            Self::SourceUnavailable { .. } => "SourceUnavailableError",
            Self::EmbeddingRequest(_) => "EmbeddingRequestError",
            Self::StorageWrite(_) => "StorageWriteError",
            Self::Storage(_) => "StorageError",
            Self::Network(_) => "NetworkError",
            Self::Http { .. } => "HttpError",
            Self::RateLimited { .. } => "RateLimitedError",
            Self::Parse { .. } => "ParseError",
            Self::Validation { .. } => "ValidationError",
            Self::LanguageModel(_) => "LanguageModelError",
            Self::Io { .. } => "IoError",
            Self::Conversion(_) => "ConversionError",
            Self::Cancelled => "CancelledError",
        }
    }

    /// Whether a retry of the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::RateLimited { .. } => true,
            Self::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Server-provided wait hint for rate-limit responses.
    pub fn retry_after_secs(&self) -> Option<u64> {
        if let Self::RateLimited { retry_after, .. } = self {
            *retry_after
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = RagKbError::configuration("unknown vector store provider 'milvus'");
        assert_eq!(
            err.to_string(),
            "configuration error: unknown vector store provider 'milvus'"
        );

        let err = RagKbError::MissingSecret {
            key: "RAG__EMBEDDING_MODELS__OPENAI__API_KEY".into(),
        };
        assert!(err.to_string().contains("RAG__EMBEDDING_MODELS__OPENAI__API_KEY"));
        assert_eq!(err.kind(), "MissingSecretError");
    }

    #[test]
    fn status_mapping() {
        let err = RagKbError::from_status(429, "slow down", Some(3));
        assert!(err.is_retryable());
        assert_eq!(err.retry_after_secs(), Some(3));

        let err = RagKbError::from_status(503, "unavailable", None);
        assert!(err.is_retryable());
        assert_eq!(err.retry_after_secs(), None);

        let err = RagKbError::from_status(401, "bad token", None);
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), "HttpError");
    }

    #[test]
    fn taxonomy_errors_are_not_retryable() {
        assert!(!RagKbError::configuration("x").is_retryable());
        assert!(!RagKbError::EmbeddingRequest("x".into()).is_retryable());
        assert!(!RagKbError::Cancelled.is_retryable());
    }
}
