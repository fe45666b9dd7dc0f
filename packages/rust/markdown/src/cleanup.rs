//! Markdown cleanup passes.
//!
//! Each pass is a function `&str -> String`. [`run_pipeline`] applies the
//! post-conversion passes in sequence; the remaining public passes are used by
//! source-specific cleaners.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

/// Run the post-conversion cleanup pipeline on raw Markdown text.
pub(crate) fn run_pipeline(md: &str, base_url: Option<&Url>) -> String {
    let mut result = strip_html_comments(md);

    result = fix_code_block_languages(&result);
    result = strip_leftover_html(&result);
    result = resolve_links(&result, base_url);
    result = normalize_whitespace(&result);
    result = collapse_blank_lines(&result);

    result.trim().to_string()
}

// ---------------------------------------------------------------------------
// HTML remnants
// ---------------------------------------------------------------------------

/// Remove `<!-- ... -->` comments, including multi-line ones.
pub fn strip_html_comments(md: &str) -> String {
    static COMMENT_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("valid regex"));

    COMMENT_RE.replace_all(md, "").into_owned()
}

/// Remove layout tags that survived conversion, keeping their text.
/// Fenced code is left untouched.
pub fn strip_leftover_html(md: &str) -> String {
    static LAYOUT_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"</?(?:div|span|section|article|aside|header|footer|figure|figcaption|details|summary|colgroup|col)(?:\s[^>]*)?/?>",
        )
        .expect("valid regex")
    });

    map_outside_fences(md, |line| LAYOUT_TAG_RE.replace_all(line, "").into_owned())
}

/// Convert paragraphs that are raw HTML into Markdown.
///
/// Notion exports keep some blocks as inline HTML; each blank-line separated
/// block starting with a tag is run through `htmd` on its own.
pub fn inline_html_blocks_to_markdown(md: &str) -> String {
    static BLOCK_TAG_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^\s*<[a-zA-Z][^>]*>").expect("valid regex"));

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec!["script", "style"])
        .build();

    split_blocks(md)
        .into_iter()
        .map(|block| {
            if block.trim_start().starts_with("```") || !BLOCK_TAG_RE.is_match(block) {
                return block.to_string();
            }
            converter
                .convert(block)
                .map(|converted| converted.trim().to_string())
                .unwrap_or_else(|_| block.to_string())
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ---------------------------------------------------------------------------
// Content filtering
// ---------------------------------------------------------------------------

/// Drop blank-line separated blocks that contain no letters or digits
/// (stray separators, empty bullets, decorative rules).
pub fn drop_empty_blocks(md: &str) -> String {
    split_blocks(md)
        .into_iter()
        .filter(|block| block.chars().any(char::is_alphanumeric))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn split_blocks(md: &str) -> Vec<&str> {
    static BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n[ \t]*\n").expect("valid regex"));

    BLANK_RE
        .split(md)
        .map(|b| b.trim_matches('\n'))
        .filter(|b| !b.trim().is_empty())
        .collect()
}

// ---------------------------------------------------------------------------
// Code fences
// ---------------------------------------------------------------------------

/// Rewrite class-style language hints (`language-js`, `lang-python`).
pub fn fix_code_block_languages(md: &str) -> String {
    static LANG_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?m)^```(?:language-|lang-|highlight-)(\w+)").expect("valid regex")
    });

    LANG_PREFIX_RE.replace_all(md, "```$1").into_owned()
}

fn map_outside_fences(md: &str, mut f: impl FnMut(&str) -> String) -> String {
    let mut out = Vec::new();
    let mut in_fence = false;
    for line in md.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            out.push(line.to_string());
        } else if in_fence {
            out.push(line.to_string());
        } else {
            out.push(f(line));
        }
    }
    out.join("\n")
}

// ---------------------------------------------------------------------------
// Links
// ---------------------------------------------------------------------------

/// Resolve relative link targets against `base_url`. Images, anchors, and
/// absolute URLs are left alone.
pub fn resolve_links(md: &str, base_url: Option<&Url>) -> String {
    static LINK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(!?)\[([^\]]*)\]\(([^)\s]+)\)").expect("valid regex"));

    let Some(base) = base_url else {
        return md.to_string();
    };

    LINK_RE
        .replace_all(md, |caps: &regex::Captures| {
            let (bang, text, href) = (&caps[1], &caps[2], &caps[3]);
            let absolute = href.contains("://") || href.starts_with('#') || href.starts_with("mailto:");
            if !bang.is_empty() || absolute {
                return caps[0].to_string();
            }
            match base.join(href) {
                Ok(resolved) => format!("[{text}]({resolved})"),
                Err(_) => caps[0].to_string(),
            }
        })
        .into_owned()
}

// ---------------------------------------------------------------------------
// Whitespace
// ---------------------------------------------------------------------------

/// Trim trailing whitespace and turn non-breaking spaces into plain ones.
pub fn normalize_whitespace(md: &str) -> String {
    md.lines()
        .map(|line| line.replace('\u{a0}', " ").trim_end().to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Collapse runs of blank lines into one.
pub fn collapse_blank_lines(md: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

    MULTI_BLANK_RE.replace_all(md, "\n\n").into_owned()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comments_are_removed() {
        let input = "before<!-- hidden\nacross lines -->after";
        assert_eq!(strip_html_comments(input), "beforeafter");
    }

    #[test]
    fn leftover_layout_tags_removed_outside_fences() {
        let input = "<div class=\"note\">Important</div>\n```html\n<div>kept</div>\n```";
        let result = strip_leftover_html(input);
        assert!(result.starts_with("Important\n"));
        assert!(result.contains("<div>kept</div>"));
    }

    #[test]
    fn inline_html_blocks_are_converted() {
        let input = "# Heading\n\n<p>Some <em>inline</em> html</p>\n\nplain text";
        let result = inline_html_blocks_to_markdown(input);
        assert!(result.contains("Some *inline* html") || result.contains("Some _inline_ html"), "{result}");
        assert!(result.contains("# Heading"));
        assert!(result.ends_with("plain text"));
    }

    #[test]
    fn empty_blocks_are_dropped() {
        let input = "Intro\n\n---\n\n- \n\nOutro 2";
        assert_eq!(drop_empty_blocks(input), "Intro\n\nOutro 2");
    }

    #[test]
    fn code_language_prefix_stripped() {
        let input = "```language-javascript\nconsole.log('hi');\n```";
        assert!(fix_code_block_languages(input).starts_with("```javascript"));
    }

    #[test]
    fn relative_links_resolved_images_untouched() {
        let base = Url::parse("https://docs.example.com/guide/intro").unwrap();
        let input = "[Next](/api) ![logo](/logo.png) [Out](https://x.dev) [Top](#top)";
        let result = resolve_links(input, Some(&base));
        assert!(result.contains("[Next](https://docs.example.com/api)"));
        assert!(result.contains("![logo](/logo.png)"));
        assert!(result.contains("[Out](https://x.dev)"));
        assert!(result.contains("[Top](#top)"));
    }

    #[test]
    fn whitespace_normalized() {
        assert_eq!(normalize_whitespace("a\u{a0}b  \nc\t"), "a b\nc");
        assert_eq!(collapse_blank_lines("a\n\n\n\nb"), "a\n\nb");
    }

    #[test]
    fn full_pipeline() {
        let input = "<!-- x -->\n# Title\n\n\n\n<span>Body</span>   \n\n```lang-python\nprint(1)\n```\n";
        let result = run_pipeline(input, None);
        assert_eq!(result, "# Title\n\nBody\n\n```python\nprint(1)\n```");
    }
}
