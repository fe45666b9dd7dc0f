//! Structure-aware, token-bounded splitting.
//!
//! Works in token-index space. Each chunk is the longest run of tokens within
//! the budget that ends on the best available boundary: a heading start
//! outranks a paragraph break, which outranks a sentence end, which outranks
//! a hard cut. The next chunk begins `overlap` tokens before the previous one
//! ended.

use std::collections::HashSet;
use std::ops::Range;
use std::sync::Arc;

use tracing::{debug, instrument};

use ragkb_shared::config::SplittingConfig;
use ragkb_shared::{Chunk, Document, RagKbError, Result};

use crate::tokenizer::Tokenizer;

/// Boundary strength before a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Break {
    None,
    Sentence,
    Paragraph,
    Heading,
}

#[derive(Debug, Clone)]
pub struct MarkdownSplitter {
    tokenizer: Arc<dyn Tokenizer>,
    chunk_size: usize,
    overlap: usize,
}

impl MarkdownSplitter {
    pub fn new(tokenizer: Arc<dyn Tokenizer>, chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(RagKbError::configuration("chunk size must be at least 1 token"));
        }
        if overlap >= chunk_size {
            return Err(RagKbError::configuration(format!(
                "chunk overlap ({overlap}) must be less than chunk size ({chunk_size})"
            )));
        }
        Ok(Self {
            tokenizer,
            chunk_size,
            overlap,
        })
    }

    pub fn from_config(tokenizer: Arc<dyn Tokenizer>, config: &SplittingConfig) -> Result<Self> {
        Self::new(
            tokenizer,
            config.chunk_size_in_tokens,
            config.chunk_overlap_in_tokens,
        )
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    pub fn tokenizer(&self) -> &Arc<dyn Tokenizer> {
        &self.tokenizer
    }

    /// Split every document, preserving document order.
    #[instrument(skip_all, fields(documents = documents.len(), chunk_size = self.chunk_size))]
    pub fn split_documents(&self, documents: &[Document]) -> Vec<Chunk> {
        let chunks: Vec<Chunk> = documents.iter().flat_map(|d| self.split_document(d)).collect();
        debug!(chunks = chunks.len(), "split complete");
        chunks
    }

    /// Split one document; each chunk inherits the document's metadata.
    pub fn split_document(&self, document: &Document) -> Vec<Chunk> {
        let metadata = document.chunk_metadata();
        self.split_text(&document.text)
            .into_iter()
            .enumerate()
            .map(|(index, text)| Chunk::new(&document.id, index, text, metadata.clone()))
            .collect()
    }

    /// Split text into chunk strings of at most `chunk_size` tokens each.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        let weighted = self.tokenizer.weighted_spans(text);
        let n = weighted.len();
        if n == 0 {
            return Vec::new();
        }

        // `cost[i]` is the number of model tokens in spans `..i`.
        let mut cost = Vec::with_capacity(n + 1);
        let mut total = 0usize;
        cost.push(total);
        for (_, weight) in &weighted {
            total += weight;
            cost.push(total);
        }
        let spans: Vec<Range<usize>> = weighted.into_iter().map(|(span, _)| span).collect();

        let breaks = classify_breaks(text, &spans);
        let mut chunks = Vec::new();
        let mut start = 0usize;

        loop {
            let mut end = self.pick_end(&breaks, &cost, start);

            // Re-tokenizing a substring can differ from the full-text spans.
            let mut body = slice(text, &spans, start..end);
            while end > start + 1 && self.tokenizer.count(body) > self.chunk_size {
                end -= 1;
                body = slice(text, &spans, start..end);
            }

            chunks.push(body.to_string());
            if end >= n {
                break;
            }
            start = self.next_start(&cost, start, end);
        }

        chunks
    }

    /// Furthest span end whose tokens from `start` fit the budget; at least
    /// one span so an oversize span still makes progress.
    fn budget_end(&self, cost: &[usize], start: usize) -> usize {
        let limit = cost[start] + self.chunk_size;
        let reachable = cost.partition_point(|&c| c <= limit) - 1;
        reachable.max(start + 1)
    }

    /// Best end position within the budget from `start`.
    fn pick_end(&self, breaks: &[Break], cost: &[usize], start: usize) -> usize {
        let max_end = self.budget_end(cost, start);
        if max_end == cost.len() - 1 {
            return max_end;
        }
        // Keep chunks from collapsing to a sliver just to land on a boundary.
        let floor = cost[start] + (self.overlap + 1).max(self.chunk_size / 4);
        let min_end = cost
            .partition_point(|&c| c < floor)
            .clamp(start + 1, max_end);

        let mut best = (Break::None, max_end);
        for end in min_end..=max_end {
            let strength = breaks[end];
            if strength > Break::None && strength >= best.0 {
                best = (strength, end);
            }
        }
        best.1
    }

    /// First span of the next chunk: the tail of `start..end` holding at most
    /// `overlap` tokens, or `end` when that tail would not move forward.
    fn next_start(&self, cost: &[usize], start: usize, end: usize) -> usize {
        let floor = cost[end].saturating_sub(self.overlap);
        let next = cost.partition_point(|&c| c < floor);
        if next > start { next.min(end) } else { end }
    }
}

fn slice<'a>(text: &'a str, spans: &[Range<usize>], tokens: Range<usize>) -> &'a str {
    &text[spans[tokens.start].start..spans[tokens.end - 1].end]
}

/// `breaks[i]` is the boundary strength immediately before token `i`
/// (index `spans.len()` is the end of text).
fn classify_breaks(text: &str, spans: &[Range<usize>]) -> Vec<Break> {
    let headings = heading_offsets(text);
    let mut breaks = vec![Break::None; spans.len() + 1];

    for i in 1..spans.len() {
        let gap = &text[spans[i - 1].end..spans[i].start];
        let prev = &text[spans[i - 1].clone()];
        let line_start = text[..spans[i].start].rfind('\n').map_or(0, |p| p + 1);

        breaks[i] = if gap.contains('\n') && headings.contains(&line_start) {
            Break::Heading
        } else if gap.contains("\n\n") || gap.contains("\n\r\n") {
            Break::Paragraph
        } else if matches!(prev, "." | "!" | "?") || gap.contains('\n') {
            Break::Sentence
        } else {
            Break::None
        };
    }
    breaks[spans.len()] = Break::Paragraph;
    breaks
}

/// Byte offsets of ATX heading lines outside fenced code.
fn heading_offsets(text: &str) -> HashSet<usize> {
    let mut offsets = HashSet::new();
    let mut in_fence = false;
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
        } else if !in_fence && is_heading(trimmed) {
            offsets.insert(offset);
        }
        offset += line.len();
    }
    offsets
}

fn is_heading(line: &str) -> bool {
    let hashes = line.chars().take_while(|&c| c == '#').count();
    (1..=6).contains(&hashes) && line[hashes..].starts_with([' ', '\t'])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::RegexTokenizer;

    fn splitter(size: usize, overlap: usize) -> MarkdownSplitter {
        MarkdownSplitter::new(Arc::new(RegexTokenizer), size, overlap).expect("splitter")
    }

    fn tokens(text: &str) -> Vec<String> {
        RegexTokenizer
            .token_spans(text)
            .into_iter()
            .map(|r| text[r].to_string())
            .collect()
    }

    fn long_body() -> String {
        (0..60)
            .map(|i| format!("Sentence number {i} talks about ingestion and vectors."))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn rejects_overlap_at_or_above_budget() {
        assert!(MarkdownSplitter::new(Arc::new(RegexTokenizer), 10, 10).is_err());
        assert!(MarkdownSplitter::new(Arc::new(RegexTokenizer), 0, 0).is_err());
    }

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = splitter(50, 5).split_text("A short note.");
        assert_eq!(chunks, vec!["A short note.".to_string()]);
        assert!(splitter(50, 5).split_text("   ").is_empty());
    }

    #[test]
    fn long_text_respects_budget_and_overlap() {
        let text = long_body();
        let s = splitter(40, 8);
        let chunks = s.split_text(&text);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(RegexTokenizer.count(chunk) <= 40, "chunk too large: {chunk}");
        }
        for pair in chunks.windows(2) {
            let prev = tokens(&pair[0]);
            let next = tokens(&pair[1]);
            let tail = &prev[prev.len() - 8..];
            assert_eq!(&next[..8], tail, "consecutive chunks must share the overlap");
        }
    }

    #[test]
    fn prefers_sentence_ends() {
        let text = long_body();
        let chunks = splitter(40, 0).split_text(&text);
        for chunk in &chunks[..chunks.len() - 1] {
            assert!(chunk.ends_with('.'), "chunk should end at a sentence: {chunk}");
        }
    }

    #[test]
    fn headings_start_new_chunks() {
        let text = "# Setup\n\nInstall the agent and start it. Then check the logs.\n\n## Usage\n\nRun the ingest command. It loads every source.";
        let chunks = splitter(20, 0).split_text(text);
        assert!(chunks.len() >= 2);
        assert!(chunks[1].starts_with("## Usage"), "{chunks:?}");
    }

    #[test]
    fn heading_inside_code_fence_is_not_a_boundary() {
        let offsets = heading_offsets("intro\n```\n# not a heading\n```\n# Real\n");
        assert_eq!(offsets.len(), 1);
        assert!(offsets.contains(&30));
    }

    #[test]
    fn no_overlap_covers_every_token_once() {
        let text = long_body();
        let chunks = splitter(37, 0).split_text(&text);
        let total: usize = chunks.iter().map(|c| RegexTokenizer.count(c)).sum();
        assert_eq!(total, RegexTokenizer.count(&text));
    }

    #[test]
    fn weighted_spans_bound_the_window() {
        /// Every character is one span worth three model tokens.
        #[derive(Debug)]
        struct ThreePerChar;

        impl Tokenizer for ThreePerChar {
            fn name(&self) -> &str {
                "three-per-char"
            }
            fn token_spans(&self, text: &str) -> Vec<Range<usize>> {
                text.char_indices().map(|(i, c)| i..i + c.len_utf8()).collect()
            }
            fn weighted_spans(&self, text: &str) -> Vec<(Range<usize>, usize)> {
                self.token_spans(text).into_iter().map(|r| (r, 3)).collect()
            }
        }

        let text = "日本語のテキストです。".repeat(10);
        let tok = Arc::new(ThreePerChar);
        let chunks = MarkdownSplitter::new(tok.clone(), 16, 6)
            .expect("splitter")
            .split_text(&text);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(tok.count(chunk) <= 16, "chunk of {} tokens: {chunk}", tok.count(chunk));
        }
        for pair in chunks.windows(2) {
            let prev: Vec<char> = pair[0].chars().collect();
            let tail: String = prev[prev.len() - 2..].iter().collect();
            assert!(pair[1].starts_with(&tail), "{pair:?}");
        }
    }

    #[test]
    fn byte_level_tokenizer_keeps_multibyte_chunks_in_budget() {
        let tok = Arc::new(crate::tokenizer::tests::byte_level());
        let text = "日本語のテキストです。".repeat(10);
        let chunks = MarkdownSplitter::new(tok.clone(), 16, 0)
            .expect("splitter")
            .split_text(&text);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(tok.count(chunk) <= 16, "chunk of {} tokens: {chunk}", tok.count(chunk));
        }
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn chunks_inherit_document_metadata() {
        let mut doc = Document::new("notion", "page-1", "Onboarding", long_body());
        doc.url = Some("https://notion.so/page-1".into());
        let chunks = splitter(40, 4).split_document(&doc);

        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert_eq!(chunk.document_id, "notion:page-1");
            assert_eq!(chunk.metadata["title"], "Onboarding");
            assert_eq!(chunk.metadata["url"], "https://notion.so/page-1");
        }
        let again = splitter(40, 4).split_document(&doc);
        assert_eq!(chunks[0].id, again[0].id);
    }
}
