//! Confluence global spaces via the REST content API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use ragkb_markdown::html_to_markdown;
use ragkb_shared::config::ConfluenceDatasourceConfig;
use ragkb_shared::http::send_json;
use ragkb_shared::{Document, Result, RetryPolicy, SecretValue};

use crate::{DocumentReader, apply_limit, fetch_ordered};

const DATASOURCE: &str = "confluence";
const PAGE_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
struct Listing<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
    #[serde(default, rename = "_links")]
    links: Links,
}

#[derive(Debug, Default, Deserialize)]
struct Links {
    #[serde(default)]
    base: Option<String>,
    #[serde(default)]
    webui: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Space {
    key: String,
}

#[derive(Debug, Deserialize)]
struct Content {
    id: String,
    title: String,
    #[serde(default)]
    body: Option<Body>,
    #[serde(default)]
    history: Option<History>,
    #[serde(default, rename = "_links")]
    links: Links,
}

#[derive(Debug, Deserialize)]
struct Body {
    view: View,
}

#[derive(Debug, Deserialize)]
struct View {
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct History {
    #[serde(default)]
    created_date: Option<DateTime<Utc>>,
    #[serde(default)]
    last_updated: Option<LastUpdated>,
}

#[derive(Debug, Deserialize)]
struct LastUpdated {
    when: DateTime<Utc>,
}

#[derive(Clone)]
struct ConfluenceApi {
    client: Client,
    base: String,
    username: String,
    password: SecretValue,
    retry: RetryPolicy,
}

impl ConfluenceApi {
    fn get(&self, path: &str) -> RequestBuilder {
        self.client
            .get(format!("{}{path}", self.base))
            .basic_auth(&self.username, Some(self.password.expose()))
    }

    async fn spaces(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut start = 0;
        loop {
            let query = [
                ("type", "global".to_string()),
                ("start", start.to_string()),
                ("limit", PAGE_LIMIT.to_string()),
            ];
            let page: Listing<Space> = self
                .retry
                .run("confluence spaces", || {
                    send_json(self.get("/rest/api/space").query(&query))
                })
                .await?;
            let count = page.results.len();
            if count == 0 {
                break;
            }
            keys.extend(page.results.into_iter().map(|s| s.key));
            start += count;
        }
        Ok(keys)
    }

    async fn space_pages(&self, space: &str, limit: Option<usize>) -> Result<Vec<Document>> {
        let mut documents = Vec::new();
        let mut start = 0;
        loop {
            let query = [
                ("spaceKey", space.to_string()),
                ("type", "page".to_string()),
                ("expand", "body.view,history.lastUpdated".to_string()),
                ("start", start.to_string()),
                ("limit", PAGE_LIMIT.to_string()),
            ];
            let page: Listing<Content> = self
                .retry
                .run(space, || send_json(self.get("/rest/api/content").query(&query)))
                .await?;

            let count = page.results.len();
            if count == 0 {
                break;
            }
            let link_base = page.links.base.unwrap_or_else(|| self.base.clone());
            for content in page.results {
                documents.push(into_document(content, space, &link_base)?);
            }
            debug!(space, fetched = documents.len(), "confluence page batch");

            // Servers may cap the page size below `limit`; only an empty page ends the listing.
            if limit.is_some_and(|l| documents.len() >= l) {
                break;
            }
            start += count;
        }
        Ok(apply_limit(documents, limit))
    }
}

fn into_document(content: Content, space: &str, link_base: &str) -> Result<Document> {
    let html = content.body.map(|b| b.view.value).unwrap_or_default();
    let text = html_to_markdown(&html, Some(link_base))?;

    let mut doc = Document::new(DATASOURCE, &content.id, content.title, text);
    doc.url = content.links.webui.map(|webui| format!("{link_base}{webui}"));
    if let Some(history) = content.history {
        doc.created_time = history.created_date;
        doc.last_edited_time = history.last_updated.map(|u| u.when);
    }
    doc.metadata.insert("space".into(), space.into());
    Ok(doc)
}

pub struct ConfluenceReader {
    api: ConfluenceApi,
    export_limit: Option<usize>,
    max_concurrency: usize,
}

impl ConfluenceReader {
    pub fn new(
        client: Client,
        config: ConfluenceDatasourceConfig,
        username: impl Into<String>,
        password: SecretValue,
    ) -> Self {
        let api = ConfluenceApi {
            client,
            base: config.base_url().trim_end_matches('/').to_string(),
            username: username.into(),
            password,
            retry: config.common.retry_policy(),
        };
        Self {
            api,
            export_limit: config.common.export_limit,
            max_concurrency: config.common.max_concurrency,
        }
    }
}

#[async_trait]
impl DocumentReader for ConfluenceReader {
    #[instrument(skip_all, fields(limit = ?self.export_limit))]
    async fn read_all(&self) -> Result<Vec<Document>> {
        let spaces = self.api.spaces().await?;
        info!(spaces = spaces.len(), "fetching confluence spaces");

        // With a limit, spaces go out in windows so later spaces only see
        // what is left of the budget.
        let window = match self.export_limit {
            Some(_) => self.max_concurrency.max(1),
            None => spaces.len().max(1),
        };

        let mut documents = Vec::new();
        for keys in spaces.chunks(window) {
            let remaining = self.export_limit.map(|l| l.saturating_sub(documents.len()));
            if remaining == Some(0) {
                break;
            }
            let results = fetch_ordered(keys.to_vec(), self.max_concurrency, |space| {
                let api = self.api.clone();
                async move { api.space_pages(&space, remaining).await }
            })
            .await;

            for (space, result) in keys.iter().zip(results) {
                match result {
                    Ok(pages) => documents.extend(pages),
                    Err(e) if e.is_retryable() => return Err(e),
                    Err(e) => warn!(space = %space, error = %e, "skipping confluence space"),
                }
            }
        }
        Ok(apply_limit(documents, self.export_limit))
    }
}
