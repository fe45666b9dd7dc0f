//! Notion pages and databases via the public REST API.
//!
//! Object ids come from the optional home-page database, then workspace
//! search (databases first, then pages). Objects are exported in concurrent
//! batches: pages render their block tree to Markdown, databases render as a
//! Markdown table. An object that fails to export is logged and skipped.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use ragkb_markdown::markdown_table;
use ragkb_shared::config::NotionDatasourceConfig;
use ragkb_shared::http::send_json;
use ragkb_shared::{Document, Result, RetryPolicy, SecretValue};

use crate::{DocumentReader, apply_limit, fetch_ordered};

const DATASOURCE: &str = "notion";
const NOTION_VERSION: &str = "2022-06-28";
const PAGE_SIZE: usize = 100;
/// Nested block levels fetched below a page.
const MAX_BLOCK_DEPTH: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObjectKind {
    Page,
    Database,
}

impl ObjectKind {
    fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Page => "page",
            ObjectKind::Database => "database",
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    results: Vec<Value>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    next_cursor: Option<String>,
}

// ---------------------------------------------------------------------------
// API client
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct NotionApi {
    client: Client,
    base: String,
    token: SecretValue,
    retry: RetryPolicy,
}

impl NotionApi {
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{path}", self.base))
            .bearer_auth(self.token.expose())
            .header("Notion-Version", NOTION_VERSION)
    }

    async fn get(&self, path: &str) -> Result<Value> {
        self.retry
            .run(path, || send_json(self.request(Method::GET, path)))
            .await
    }

    /// Follow `has_more`/`next_cursor` until exhausted or `limit` results.
    /// A `body` makes this a POST (query, search); otherwise a GET.
    async fn paginate(&self, path: &str, body: Option<Value>, limit: Option<usize>) -> Result<Vec<Value>> {
        let mut results = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let page: ListResponse = self
                .retry
                .run(path, || {
                    let request = match &body {
                        Some(body) => {
                            let mut payload = body.clone();
                            payload["page_size"] = PAGE_SIZE.into();
                            if let Some(c) = &cursor {
                                payload["start_cursor"] = c.clone().into();
                            }
                            self.request(Method::POST, path).json(&payload)
                        }
                        None => {
                            let mut query = vec![("page_size", PAGE_SIZE.to_string())];
                            if let Some(c) = &cursor {
                                query.push(("start_cursor", c.clone()));
                            }
                            self.request(Method::GET, path).query(&query)
                        }
                    };
                    send_json(request)
                })
                .await?;

            results.extend(page.results);
            if let Some(limit) = limit {
                if results.len() >= limit {
                    results.truncate(limit);
                    break;
                }
            }
            match (page.has_more, page.next_cursor) {
                (true, Some(next)) => cursor = Some(next),
                _ => break,
            }
        }
        Ok(results)
    }

    async fn search(&self, kind: ObjectKind, limit: Option<usize>) -> Result<Vec<String>> {
        let body = json!({"filter": {"property": "object", "value": kind.as_str()}});
        let results = self.paginate("/v1/search", Some(body), limit).await?;
        Ok(results.iter().filter_map(object_id).collect())
    }

    async fn export(&self, id: &str, kind: ObjectKind) -> Result<Document> {
        match kind {
            ObjectKind::Page => self.export_page(id).await,
            ObjectKind::Database => self.export_database(id).await,
        }
    }

    async fn export_page(&self, id: &str) -> Result<Document> {
        let page = self.get(&format!("/v1/pages/{id}")).await?;
        let title = page_title(&page);
        let body = self.render_children(id.to_string(), 0).await?.join("\n\n");

        let text = if title.is_empty() {
            body
        } else {
            format!("# {title}\n\n{body}")
        };
        Ok(stamp(Document::new(DATASOURCE, id, title, text), &page, ObjectKind::Page))
    }

    async fn export_database(&self, id: &str) -> Result<Document> {
        let database = self.get(&format!("/v1/databases/{id}")).await?;
        let title = plain_text(&database["title"]);
        let rows = self
            .paginate(&format!("/v1/databases/{id}/query"), Some(json!({})), None)
            .await?;

        let columns = database_columns(&database);
        let mut table = vec![columns.clone()];
        for row in &rows {
            table.push(
                columns
                    .iter()
                    .map(|col| property_text(&row["properties"][col.as_str()]))
                    .collect(),
            );
        }

        let text = format!("# {title}\n{}", markdown_table(&table));
        let mut doc = stamp(Document::new(DATASOURCE, id, title, text), &database, ObjectKind::Database);
        doc.metadata.insert("rows".into(), rows.len().into());
        Ok(doc)
    }

    /// Render the children of `block_id` as Markdown blocks, depth first.
    fn render_children(
        &self,
        block_id: String,
        depth: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>>> + Send + '_>> {
        Box::pin(async move {
            let blocks = self
                .paginate(&format!("/v1/blocks/{block_id}/children"), None, None)
                .await?;

            let mut out = Vec::new();
            for block in &blocks {
                let kind = block["type"].as_str().unwrap_or_default();
                let has_children = block["has_children"].as_bool().unwrap_or(false);
                let child_id = object_id(block);

                if kind == "table" {
                    if let Some(child_id) = child_id {
                        out.push(self.render_table(child_id).await?);
                    }
                    continue;
                }

                if let Some(rendered) = render_block(block) {
                    out.push(rendered);
                }

                let nests = !matches!(kind, "child_page" | "child_database");
                if has_children && nests && depth < MAX_BLOCK_DEPTH {
                    if let Some(child_id) = child_id {
                        let children = self.render_children(child_id, depth + 1).await?;
                        let indent = matches!(
                            kind,
                            "bulleted_list_item" | "numbered_list_item" | "to_do" | "toggle"
                        );
                        for child in children {
                            out.push(if indent { indent_block(&child) } else { child });
                        }
                    }
                }
            }
            Ok(out)
        })
    }

    async fn render_table(&self, table_id: String) -> Result<String> {
        let rows = self
            .paginate(&format!("/v1/blocks/{table_id}/children"), None, None)
            .await?;
        let cells: Vec<Vec<String>> = rows
            .iter()
            .filter_map(|row| row["table_row"]["cells"].as_array())
            .map(|cells| cells.iter().map(rich_text).collect())
            .collect();
        Ok(markdown_table(&cells).trim().to_string())
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

pub struct NotionReader {
    api: NotionApi,
    config: NotionDatasourceConfig,
}

impl NotionReader {
    pub fn new(client: Client, config: NotionDatasourceConfig, token: SecretValue) -> Self {
        let api = NotionApi {
            client,
            base: config.base_url.trim_end_matches('/').to_string(),
            token,
            retry: config.common.retry_policy(),
        };
        Self { api, config }
    }

    async fn collect_ids(&self) -> Result<(Vec<String>, Vec<String>)> {
        let limit = self.config.common.export_limit;
        let remaining = |found: usize| limit.map(|l| l.saturating_sub(found));

        let mut database_ids = Vec::new();
        let mut page_ids = Vec::new();

        if let Some(home) = &self.config.home_page_database_id {
            let entries = self
                .api
                .paginate(&format!("/v1/databases/{home}/query"), Some(json!({})), limit)
                .await?;
            for entry in &entries {
                match (entry["object"].as_str(), object_id(entry)) {
                    (Some("database"), Some(id)) => database_ids.push(id),
                    (Some("page"), Some(id)) => page_ids.push(id),
                    _ => {}
                }
            }
        }

        let left = remaining(database_ids.len() + page_ids.len());
        if left != Some(0) {
            database_ids.extend(self.api.search(ObjectKind::Database, left).await?);
        }
        let left = remaining(database_ids.len() + page_ids.len());
        if left != Some(0) {
            page_ids.extend(self.api.search(ObjectKind::Page, left).await?);
        }

        let mut database_ids = dedupe(database_ids);
        if let Some(home) = &self.config.home_page_database_id {
            database_ids.retain(|id| id != home);
        }
        Ok((database_ids, dedupe(page_ids)))
    }

    async fn export_all(&self, ids: Vec<String>, kind: ObjectKind) -> Vec<Document> {
        let batch_size = self.config.export_batch_size.max(1);
        let batches = ids.len().div_ceil(batch_size);
        let mut documents = Vec::new();

        for (i, batch) in ids.chunks(batch_size).enumerate() {
            let results = fetch_ordered(batch.to_vec(), self.config.common.max_concurrency, |id| {
                let api = self.api.clone();
                async move { api.export(&id, kind).await }
            })
            .await;

            for (id, result) in batch.iter().zip(results) {
                match result {
                    Ok(doc) => documents.push(doc),
                    Err(e) => warn!(object = kind.as_str(), %id, error = %e, "export failed, skipping"),
                }
            }
            info!(batch = i + 1, batches, object = kind.as_str(), exported = documents.len(), "export batch complete");
        }
        documents
    }
}

#[async_trait]
impl DocumentReader for NotionReader {
    #[instrument(skip_all, fields(limit = ?self.config.common.export_limit))]
    async fn read_all(&self) -> Result<Vec<Document>> {
        let (database_ids, page_ids) = self.collect_ids().await?;
        info!(databases = database_ids.len(), pages = page_ids.len(), "collected object ids");

        let mut documents = self.export_all(database_ids, ObjectKind::Database).await;
        documents.extend(self.export_all(page_ids, ObjectKind::Page).await);
        Ok(apply_limit(documents, self.config.common.export_limit))
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn object_id(value: &Value) -> Option<String> {
    value["id"].as_str().map(str::to_string)
}

fn dedupe(ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

fn parse_time(value: &Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn stamp(mut doc: Document, object: &Value, kind: ObjectKind) -> Document {
    doc.url = object["url"].as_str().map(str::to_string);
    doc.created_time = parse_time(&object["created_time"]);
    doc.last_edited_time = parse_time(&object["last_edited_time"]);
    doc.metadata.insert("object".into(), kind.as_str().into());
    doc
}

/// Concatenated `plain_text` of a rich-text array, without formatting.
fn plain_text(rich: &Value) -> String {
    rich.as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p["plain_text"].as_str())
                .collect::<String>()
        })
        .unwrap_or_default()
}

/// A rich-text array as inline Markdown.
fn rich_text(rich: &Value) -> String {
    let Some(parts) = rich.as_array() else {
        return String::new();
    };

    parts
        .iter()
        .map(|part| {
            let mut text = part["plain_text"].as_str().unwrap_or_default().to_string();
            if text.trim().is_empty() {
                return text;
            }
            let ann = &part["annotations"];
            if ann["code"].as_bool() == Some(true) {
                text = format!("`{text}`");
            }
            if ann["bold"].as_bool() == Some(true) {
                text = format!("**{text}**");
            }
            if ann["italic"].as_bool() == Some(true) {
                text = format!("*{text}*");
            }
            if ann["strikethrough"].as_bool() == Some(true) {
                text = format!("~~{text}~~");
            }
            if let Some(href) = part["href"].as_str() {
                text = format!("[{text}]({href})");
            }
            text
        })
        .collect()
}

fn render_block(block: &Value) -> Option<String> {
    let kind = block["type"].as_str()?;
    let data = &block[kind];
    let text = rich_text(&data["rich_text"]);

    let rendered = match kind {
        "paragraph" => text,
        "heading_1" => format!("# {text}"),
        "heading_2" => format!("## {text}"),
        "heading_3" => format!("### {text}"),
        "bulleted_list_item" => format!("- {text}"),
        "numbered_list_item" => format!("1. {text}"),
        "to_do" => {
            let mark = if data["checked"].as_bool() == Some(true) { "x" } else { " " };
            format!("- [{mark}] {text}")
        }
        "quote" => format!("> {text}"),
        "callout" => {
            let icon = data["icon"]["emoji"].as_str().unwrap_or_default();
            format!("> {icon} {text}").replace(">  ", "> ")
        }
        "toggle" => text,
        "code" => {
            let language = data["language"].as_str().unwrap_or_default();
            let language = if language == "plain text" { "" } else { language };
            format!("```{language}\n{}\n```", plain_text(&data["rich_text"]))
        }
        "equation" => format!("$$ {} $$", data["expression"].as_str().unwrap_or_default()),
        "divider" => "---".to_string(),
        "bookmark" | "embed" | "link_preview" => {
            let url = data["url"].as_str()?;
            let caption = rich_text(&data["caption"]);
            let label = if caption.is_empty() { url.to_string() } else { caption };
            format!("[{label}]({url})")
        }
        "image" | "video" | "file" | "pdf" => rich_text(&data["caption"]),
        "child_page" | "child_database" => format!("**{}**", data["title"].as_str()?),
        _ => return None,
    };

    (!rendered.trim().is_empty()).then_some(rendered)
}

fn indent_block(block: &str) -> String {
    block
        .lines()
        .map(|line| format!("  {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn page_title(page: &Value) -> String {
    page["properties"]
        .as_object()
        .and_then(|props| props.values().find(|p| p["type"] == "title"))
        .map(|p| plain_text(&p["title"]))
        .unwrap_or_default()
}

/// Property names with the title column first, the rest in name order.
fn database_columns(database: &Value) -> Vec<String> {
    let Some(props) = database["properties"].as_object() else {
        return Vec::new();
    };
    let mut title: Vec<String> = Vec::new();
    let mut rest: Vec<String> = Vec::new();
    for (name, prop) in props {
        if prop["type"] == "title" {
            title.push(name.clone());
        } else {
            rest.push(name.clone());
        }
    }
    rest.sort();
    title.extend(rest);
    title
}

fn property_text(prop: &Value) -> String {
    let Some(kind) = prop["type"].as_str() else {
        return String::new();
    };
    let data = &prop[kind];
    let names = |items: &Value| {
        items
            .as_array()
            .map(|v| {
                v.iter()
                    .filter_map(|i| i["name"].as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default()
    };

    match kind {
        "title" | "rich_text" => plain_text(data),
        "number" => data.as_f64().map(|n| n.to_string()).unwrap_or_default(),
        "select" | "status" => data["name"].as_str().unwrap_or_default().to_string(),
        "multi_select" | "people" => names(data),
        "date" => data["start"].as_str().unwrap_or_default().to_string(),
        "checkbox" => data.as_bool().unwrap_or(false).to_string(),
        "url" | "email" | "phone_number" | "created_time" | "last_edited_time" => {
            data.as_str().unwrap_or_default().to_string()
        }
        "formula" => {
            let inner = data["type"].as_str().unwrap_or_default();
            match &data[inner] {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            }
        }
        _ => String::new(),
    }
}
