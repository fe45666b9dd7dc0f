//! Hacker News top stories via the Firebase API.

use async_trait::async_trait;
use chrono::DateTime;
use reqwest::Client;
use serde::Deserialize;
use tracing::{info, instrument};

use ragkb_shared::config::HackernewsDatasourceConfig;
use ragkb_shared::http::send_json;
use ragkb_shared::{Document, Result};

use crate::{DocumentReader, apply_limit, fetch_ordered};

const DATASOURCE: &str = "hackernews";
const ITEM_URL: &str = "https://news.ycombinator.com/item?id=";

#[derive(Debug, Deserialize)]
struct Item {
    id: u64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    time: Option<i64>,
    #[serde(default)]
    by: Option<String>,
    #[serde(default)]
    score: Option<i64>,
}

impl Item {
    fn into_document(self) -> Document {
        let title = self.title.unwrap_or_default();
        let story_url = self.url.unwrap_or_default();
        let mut doc = Document::new(
            DATASOURCE,
            self.id,
            title.clone(),
            format!("{title} {story_url}"),
        );
        doc.url = Some(format!("{ITEM_URL}{}", self.id));
        doc.created_time = self.time.and_then(|t| DateTime::from_timestamp(t, 0));
        doc.metadata.insert("story_url".into(), story_url.into());
        if let Some(by) = self.by {
            doc.metadata.insert("by".into(), by.into());
        }
        if let Some(score) = self.score {
            doc.metadata.insert("score".into(), score.into());
        }
        doc
    }
}

pub struct HackernewsReader {
    client: Client,
    config: HackernewsDatasourceConfig,
}

impl HackernewsReader {
    pub fn new(client: Client, config: HackernewsDatasourceConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl DocumentReader for HackernewsReader {
    #[instrument(skip_all, fields(limit = ?self.config.common.export_limit))]
    async fn read_all(&self) -> Result<Vec<Document>> {
        let base = self.config.base_url.trim_end_matches('/').to_string();
        let retry = self.config.common.retry_policy();

        let top_url = format!("{base}/v0/topstories.json");
        let ids: Vec<u64> = retry
            .run("hackernews topstories", || send_json(self.client.get(&top_url)))
            .await?;
        let ids = apply_limit(ids, self.config.common.export_limit);
        info!(stories = ids.len(), "fetching stories");

        let results = fetch_ordered(ids, self.config.common.max_concurrency, |id| {
            let client = self.client.clone();
            let url = format!("{base}/v0/item/{id}.json");
            async move {
                retry
                    .run(&url, || send_json::<Option<Item>>(client.get(&url)))
                    .await
            }
        })
        .await;

        let mut documents = Vec::new();
        for result in results {
            // Deleted items come back as `null`.
            if let Some(item) = result? {
                documents.push(item.into_document());
            }
        }
        Ok(documents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragkb_shared::config::DatasourceCommon;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn reader(server: &MockServer, limit: Option<usize>, max_retries: u32) -> HackernewsReader {
        let common = DatasourceCommon {
            export_limit: limit,
            max_retries,
            retry_base_delay_ms: 1,
            retry_max_delay_ms: 5,
            ..DatasourceCommon::default()
        };
        HackernewsReader::new(
            Client::new(),
            HackernewsDatasourceConfig {
                common,
                base_url: server.uri(),
            },
        )
    }

    async fn mount_story(server: &MockServer, id: u64, delay_ms: u64) {
        Mock::given(method("GET"))
            .and(path(format!("/v0/item/{id}.json")))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_millis(delay_ms))
                    .set_body_json(serde_json::json!({
                        "id": id,
                        "title": format!("Story {id}"),
                        "url": format!("https://example.com/{id}"),
                        "time": 1_700_000_000 + id as i64,
                        "by": "pg",
                        "type": "story"
                    })),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn reads_top_stories_in_ranking_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v0/topstories.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(vec![3u64, 1, 2, 9]))
            .mount(&server)
            .await;
        // Slowest first, so completion order differs from ranking order.
        mount_story(&server, 3, 60).await;
        mount_story(&server, 1, 30).await;
        mount_story(&server, 2, 0).await;

        let docs = reader(&server, Some(3), 0).read_all().await.unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["hackernews:3", "hackernews:1", "hackernews:2"]);

        let first = &docs[0];
        assert_eq!(first.title, "Story 3");
        assert_eq!(first.text, "Story 3 https://example.com/3");
        assert_eq!(first.url.as_deref(), Some("https://news.ycombinator.com/item?id=3"));
        assert!(first.created_time.is_some());
    }

    #[tokio::test]
    async fn export_limit_caps_document_count() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v0/topstories.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(vec![1u64, 2]))
            .mount(&server)
            .await;
        mount_story(&server, 1, 0).await;
        mount_story(&server, 2, 0).await;

        let docs = reader(&server, Some(10), 0).read_all().await.unwrap();
        assert_eq!(docs.len(), 2);
        let docs = reader(&server, Some(1), 0).read_all().await.unwrap();
        assert_eq!(docs.len(), 1);
    }

    #[tokio::test]
    async fn rate_limited_page_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v0/topstories.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(vec![1u64, 2]))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v0/item/2.json"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(2)
            .with_priority(1)
            .mount(&server)
            .await;
        mount_story(&server, 1, 0).await;
        mount_story(&server, 2, 0).await;

        let docs = reader(&server, None, 3).read_all().await.unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["hackernews:1", "hackernews:2"]);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_the_read() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v0/topstories.json"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let err = reader(&server, None, 2).read_all().await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn null_items_are_skipped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v0/topstories.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(vec![1u64, 2]))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v0/item/1.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("null"))
            .mount(&server)
            .await;
        mount_story(&server, 2, 0).await;

        let docs = reader(&server, None, 0).read_all().await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "hackernews:2");
    }
}
