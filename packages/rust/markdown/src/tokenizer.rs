//! Tokenizers used to budget chunk sizes.
//!
//! Token counting always goes through the tokenizer configured on the active
//! embedding model, so two models can split the same corpus differently.

use std::ops::Range;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tokenizers::tokenizer::Tokenizer as HfTokenizer;

use ragkb_shared::config::{TokenizerConfig, TokenizerKind};
use ragkb_shared::{RagKbError, Result};

/// Splits text into tokens, reported as byte ranges into the input.
pub trait Tokenizer: Send + Sync + std::fmt::Debug {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Byte range of every token, in order and non-overlapping.
    fn token_spans(&self, text: &str) -> Vec<Range<usize>>;

    /// Token spans paired with the number of model tokens each one covers.
    /// Tokens that share a byte range (byte-level pieces of one multibyte
    /// character) collapse into a single span.
    fn weighted_spans(&self, text: &str) -> Vec<(Range<usize>, usize)> {
        self.token_spans(text).into_iter().map(|span| (span, 1)).collect()
    }

    /// Number of model tokens in `text`.
    fn count(&self, text: &str) -> usize {
        self.weighted_spans(text).iter().map(|(_, weight)| weight).sum()
    }
}

/// Build the tokenizer described by an embedding model's configuration.
pub fn build_tokenizer(config: &TokenizerConfig) -> Result<Arc<dyn Tokenizer>> {
    match config.kind {
        TokenizerKind::Regex => Ok(Arc::new(RegexTokenizer)),
        TokenizerKind::Huggingface => {
            let path = config.path.as_deref().ok_or_else(|| {
                RagKbError::configuration("tokenizer kind 'huggingface' requires `path`")
            })?;
            Ok(Arc::new(HuggingFaceTokenizer::from_file(path)?))
        }
    }
}

// ---------------------------------------------------------------------------
// Regex tokenizer
// ---------------------------------------------------------------------------

/// Words and individual punctuation marks. Deterministic, no model files.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegexTokenizer;

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\w+|[^\w\s]").expect("valid regex"));

impl Tokenizer for RegexTokenizer {
    fn name(&self) -> &str {
        "regex"
    }

    fn token_spans(&self, text: &str) -> Vec<Range<usize>> {
        TOKEN_RE.find_iter(text).map(|m| m.range()).collect()
    }
}

// ---------------------------------------------------------------------------
// Hugging Face tokenizer
// ---------------------------------------------------------------------------

/// A `tokenizer.json` loaded through the `tokenizers` crate.
#[derive(Debug, Clone)]
pub struct HuggingFaceTokenizer {
    inner: HfTokenizer,
}

impl HuggingFaceTokenizer {
    pub fn from_file(path: &Path) -> Result<Self> {
        let inner = HfTokenizer::from_file(path).map_err(|e| {
            RagKbError::configuration(format!("failed to load tokenizer {}: {e}", path.display()))
        })?;
        Ok(Self { inner })
    }

    /// Load from the JSON text of a `tokenizer.json`.
    pub fn from_json(json: &str) -> Result<Self> {
        let inner = HfTokenizer::from_str(json)
            .map_err(|e| RagKbError::configuration(format!("invalid tokenizer definition: {e}")))?;
        Ok(Self { inner })
    }
}

impl Tokenizer for HuggingFaceTokenizer {
    fn name(&self) -> &str {
        "huggingface"
    }

    fn token_spans(&self, text: &str) -> Vec<Range<usize>> {
        self.weighted_spans(text).into_iter().map(|(span, _)| span).collect()
    }

    fn weighted_spans(&self, text: &str) -> Vec<(Range<usize>, usize)> {
        match self.inner.encode(text, false) {
            Ok(encoding) => merge_offsets(encoding.get_offsets()),
            Err(e) => {
                tracing::warn!(error = %e, "tokenizer encode failed, falling back to regex tokens");
                RegexTokenizer.weighted_spans(text)
            }
        }
    }

    fn count(&self, text: &str) -> usize {
        match self.inner.encode(text, false) {
            Ok(encoding) => encoding.len(),
            Err(e) => {
                tracing::warn!(error = %e, "tokenizer encode failed, falling back to regex tokens");
                RegexTokenizer.count(text)
            }
        }
    }
}

/// Fold encoder offsets into strictly increasing spans. Overlapping or
/// repeated offsets merge into the previous span; zero-width tokens add their
/// weight to a neighbour. The weights sum to the number of offsets.
fn merge_offsets(offsets: &[(usize, usize)]) -> Vec<(Range<usize>, usize)> {
    let mut spans: Vec<(Range<usize>, usize)> = Vec::with_capacity(offsets.len());
    let mut pending = 0usize;
    for &(start, end) in offsets {
        if end <= start {
            match spans.last_mut() {
                Some((_, weight)) => *weight += 1,
                None => pending += 1,
            }
            continue;
        }
        match spans.last_mut() {
            Some((last, weight)) if start < last.end => {
                last.end = last.end.max(end);
                *weight += 1;
            }
            _ => {
                spans.push((start..end, 1 + pending));
                pending = 0;
            }
        }
    }
    spans
}
