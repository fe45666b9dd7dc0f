//! Per-source cleaners.

use ragkb_markdown::cleanup;
use ragkb_shared::Document;

use crate::Cleaner;

/// Normalizes whitespace and drops documents with a blank body.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicCleaner;

impl Cleaner for BasicCleaner {
    fn clean(&self, documents: Vec<Document>) -> Vec<Document> {
        documents
            .into_iter()
            .filter_map(|mut doc| {
                doc.text = tidy(&doc.text);
                (!doc.text.is_empty()).then_some(doc)
            })
            .collect()
    }
}

fn tidy(text: &str) -> String {
    cleanup::collapse_blank_lines(&cleanup::normalize_whitespace(text))
        .trim()
        .to_string()
}

/// Drops stories without a title or a story URL (Ask HN, deleted items).
#[derive(Debug, Clone, Copy, Default)]
pub struct HackernewsCleaner;

impl Cleaner for HackernewsCleaner {
    fn clean(&self, documents: Vec<Document>) -> Vec<Document> {
        documents
            .into_iter()
            .filter(|doc| {
                let has_url = doc
                    .metadata
                    .get("story_url")
                    .and_then(|v| v.as_str())
                    .is_some_and(|u| !u.trim().is_empty());
                !doc.title.trim().is_empty() && has_url
            })
            .collect()
    }
}

/// Strips export artifacts from Notion Markdown: HTML comments, inline HTML
/// blocks, and blocks with no letters or digits.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotionCleaner;

impl Cleaner for NotionCleaner {
    fn clean(&self, documents: Vec<Document>) -> Vec<Document> {
        let documents = documents
            .into_iter()
            .map(|mut doc| {
                let text = cleanup::strip_html_comments(&doc.text);
                let text = cleanup::inline_html_blocks_to_markdown(&text);
                doc.text = cleanup::drop_empty_blocks(&text);
                doc
            })
            .collect();
        BasicCleaner.clean(documents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_drops_blank_and_keeps_order() {
        let docs = vec![
            Document::new("pdf", "1", "one", "first  \n\n\n\nbody"),
            Document::new("pdf", "2", "two", " \n\t "),
            Document::new("pdf", "3", "three", "third"),
        ];
        let cleaned = BasicCleaner.clean(docs);
        let ids: Vec<_> = cleaned.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["pdf:1", "pdf:3"]);
        assert_eq!(cleaned[0].text, "first\n\nbody");
    }

    #[test]
    fn hackernews_requires_title_and_url() {
        let mut with_url = Document::new("hackernews", 1, "Show HN", "Show HN https://a.dev");
        with_url.metadata.insert("story_url".into(), "https://a.dev".into());
        let ask = Document::new("hackernews", 2, "Ask HN: anything?", "Ask HN: anything? ");
        let mut untitled = Document::new("hackernews", 3, "", " https://b.dev");
        untitled.metadata.insert("story_url".into(), "https://b.dev".into());

        let cleaned = HackernewsCleaner.clean(vec![with_url, ask, untitled]);
        assert_eq!(cleaned.len(), 1);
        assert_eq!(cleaned[0].id, "hackernews:1");
    }

    #[test]
    fn notion_strips_artifacts_and_drops_empty() {
        let docs = vec![
            Document::new(
                "notion",
                "p1",
                "Page",
                "# Page\n\n<!-- synced block -->\n\n<p>Inline <strong>html</strong></p>\n\n---\n\nReal text",
            ),
            Document::new("notion", "p2", "Empty", "<!-- only a comment -->\n\n---"),
        ];
        let cleaned = NotionCleaner.clean(docs);
        assert_eq!(cleaned.len(), 1);
        let text = &cleaned[0].text;
        assert!(!text.contains("<!--"));
        assert!(!text.contains("<p>"));
        assert!(text.contains("**html**"));
        assert!(!text.contains("---"));
        assert!(text.ends_with("Real text"));
    }
}
