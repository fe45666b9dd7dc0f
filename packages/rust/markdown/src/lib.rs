//! HTML-to-Markdown conversion, cleanup passes, tokenizers, and splitting.
//!
//! Knowledge sources that return HTML (Confluence page bodies, inline HTML in
//! Notion exports) go through [`html_to_markdown`]. Cleaned Markdown is then
//! cut into token-bounded chunks by [`MarkdownSplitter`] using the tokenizer
//! bound to the active embedding model.

pub mod cleanup;
pub mod splitter;
pub mod tokenizer;

use std::sync::LazyLock;

use scraper::Html;
use tracing::{debug, instrument};
use url::Url;

use ragkb_shared::{RagKbError, Result};

pub use splitter::MarkdownSplitter;
pub use tokenizer::{HuggingFaceTokenizer, RegexTokenizer, Tokenizer, build_tokenizer};

// ---------------------------------------------------------------------------
// Converter
// ---------------------------------------------------------------------------

/// Convert an HTML fragment to clean Markdown.
///
/// Tables are rewritten to Markdown tables first (`htmd` has no table
/// support), then `htmd` converts the rest and the cleanup pipeline runs.
/// Relative links resolve against `base_url` when given.
#[instrument(skip(html), fields(len = html.len()))]
pub fn html_to_markdown(html: &str, base_url: Option<&str>) -> Result<String> {
    let html = preprocess_tables(html);

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec!["script", "style", "nav", "iframe", "noscript", "svg"])
        .build();

    let raw = converter
        .convert(&html)
        .map_err(|e| RagKbError::Conversion(format!("htmd conversion failed: {e}")))?;

    let base = base_url.and_then(|u| Url::parse(u).ok());
    let cleaned = cleanup::run_pipeline(&raw, base.as_ref());

    debug!(raw_len = raw.len(), final_len = cleaned.len(), "conversion complete");
    Ok(cleaned)
}

// ---------------------------------------------------------------------------
// Table pre-processing
// ---------------------------------------------------------------------------

static TABLE_SEL: LazyLock<scraper::Selector> =
    LazyLock::new(|| scraper::Selector::parse("table").expect("valid selector"));
static TR_SEL: LazyLock<scraper::Selector> =
    LazyLock::new(|| scraper::Selector::parse("tr").expect("valid selector"));
static TH_SEL: LazyLock<scraper::Selector> =
    LazyLock::new(|| scraper::Selector::parse("th").expect("valid selector"));
static TD_SEL: LazyLock<scraper::Selector> =
    LazyLock::new(|| scraper::Selector::parse("td").expect("valid selector"));

/// Replace `<table>` elements with Markdown table text.
fn preprocess_tables(html: &str) -> String {
    let doc = Html::parse_fragment(html);

    if doc.select(&TABLE_SEL).next().is_none() {
        return html.to_string();
    }

    let mut result = html.to_string();
    for table in doc.select(&TABLE_SEL) {
        let rows = table_rows(&table);
        result = result.replacen(&table.html(), &markdown_table(&rows), 1);
    }
    result
}

fn table_rows(table: &scraper::ElementRef) -> Vec<Vec<String>> {
    table
        .select(&TR_SEL)
        .filter_map(|tr| {
            let header: Vec<String> = tr.select(&TH_SEL).map(cell_text).collect();
            if !header.is_empty() {
                return Some(header);
            }
            let cells: Vec<String> = tr.select(&TD_SEL).map(cell_text).collect();
            (!cells.is_empty()).then_some(cells)
        })
        .collect()
}

fn cell_text(cell: scraper::ElementRef) -> String {
    cell.text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Render rows as a Markdown table; the first row is the header.
pub fn markdown_table(rows: &[Vec<String>]) -> String {
    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    if width == 0 {
        return String::new();
    }

    let render = |row: &[String]| {
        let mut cells: Vec<String> = row.iter().map(|c| c.replace('|', "\\|")).collect();
        cells.resize(width, String::new());
        format!("| {} |\n", cells.join(" | "))
    };

    let mut md = String::from("\n\n");
    md.push_str(&render(&rows[0]));
    md.push_str(&format!("| {} |\n", vec!["---"; width].join(" | ")));
    for row in &rows[1..] {
        md.push_str(&render(row));
    }
    md.push('\n');
    md
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
