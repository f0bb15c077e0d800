// src/store/notion.rs
//! Notion-backed [`KnowledgeStore`].

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{KnowledgeStore, PageDraft, PageId, PageSummary, QueryPage, StoreError, StoreHandle};
use crate::blocks::ContentBlock;
use crate::date::CanonicalDate;

pub const DEFAULT_BASE_URL: &str = "https://api.notion.com/v1";
const NOTION_VERSION: &str = "2022-06-28";
const QUERY_PAGE_SIZE: u32 = 100;

const CREATE_TIMEOUT: Duration = Duration::from_secs(30);
const APPEND_TIMEOUT: Duration = Duration::from_secs(20);
const DEDUP_TIMEOUT: Duration = Duration::from_secs(15);
const LIST_TIMEOUT: Duration = Duration::from_secs(20);
const ARCHIVE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct NotionStore {
    http: Client,
    token: String,
    base_url: String,
}

impl NotionStore {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base_url(token, DEFAULT_BASE_URL)
    }

    /// Point at a different host (tests use a local mock server).
    pub fn with_base_url(token: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            token: token.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn authed(&self, rb: RequestBuilder) -> RequestBuilder {
        rb.bearer_auth(&self.token)
            .header("Notion-Version", NOTION_VERSION)
    }

    async fn query(
        &self,
        store: &StoreHandle,
        payload: Value,
        timeout: Duration,
    ) -> Result<QueryPage, StoreError> {
        let url = format!("{}/databases/{}/query", self.base_url, store.database_id);
        let resp = self
            .authed(self.http.post(url))
            .timeout(timeout)
            .json(&payload)
            .send()
            .await?;
        let body: QueryResponse = decode(ensure_ok(resp).await?).await?;
        Ok(QueryPage {
            results: body.results.into_iter().map(RawPage::into_summary).collect(),
            next_cursor: if body.has_more { body.next_cursor } else { None },
        })
    }
}

async fn ensure_ok(resp: Response) -> Result<Response, StoreError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(StoreError::Status {
        status: status.as_u16(),
        body,
    })
}

async fn decode<T: for<'de> Deserialize<'de>>(resp: Response) -> Result<T, StoreError> {
    let text = resp.text().await?;
    serde_json::from_str(&text).map_err(|e| StoreError::Decode(e.to_string()))
}

fn page_properties(draft: &PageDraft) -> Value {
    json!({
        "title": { "title": [{ "text": { "content": draft.title } }] },
        "content": { "rich_text": [{ "text": { "content": draft.summary } }] },
        "url": { "url": draft.url },
        "date": { "date": { "start": draft.date.to_string() } },
        "category": { "select": { "name": draft.category } }
    })
}

fn blocks_json(blocks: &[ContentBlock]) -> Vec<Value> {
    blocks.iter().map(ContentBlock::to_api_json).collect()
}

fn with_cursor(mut payload: Value, cursor: Option<&str>) -> Value {
    if let Some(c) = cursor {
        payload["start_cursor"] = Value::String(c.to_string());
    }
    payload
}

#[async_trait::async_trait]
impl KnowledgeStore for NotionStore {
    async fn create_page(&self, draft: &PageDraft) -> Result<PageId, StoreError> {
        let payload = json!({
            "parent": { "database_id": draft.store.database_id },
            "properties": page_properties(draft),
            "children": blocks_json(&draft.blocks),
        });
        let resp = self
            .authed(self.http.post(format!("{}/pages", self.base_url)))
            .timeout(CREATE_TIMEOUT)
            .json(&payload)
            .send()
            .await?;
        let created: CreatedPage = decode(ensure_ok(resp).await?).await?;
        if created.id.is_empty() {
            return Err(StoreError::Decode("created page has no id".into()));
        }
        Ok(created.id)
    }

    async fn append_blocks(
        &self,
        page_id: &str,
        blocks: &[ContentBlock],
    ) -> Result<(), StoreError> {
        let url = format!("{}/blocks/{}/children", self.base_url, page_id);
        let resp = self
            .authed(self.http.patch(url))
            .timeout(APPEND_TIMEOUT)
            .json(&json!({ "children": blocks_json(blocks) }))
            .send()
            .await?;
        ensure_ok(resp).await?;
        Ok(())
    }

    async fn query_by_url(
        &self,
        store: &StoreHandle,
        url: &str,
    ) -> Result<Vec<PageSummary>, StoreError> {
        let payload = json!({
            "filter": { "property": "url", "url": { "equals": url.trim() } }
        });
        Ok(self.query(store, payload, DEDUP_TIMEOUT).await?.results)
    }

    async fn query_dated_before(
        &self,
        store: &StoreHandle,
        date: CanonicalDate,
        cursor: Option<&str>,
    ) -> Result<QueryPage, StoreError> {
        let payload = json!({
            "filter": { "property": "date", "date": { "before": date.to_string() } },
            "page_size": QUERY_PAGE_SIZE,
        });
        self.query(store, with_cursor(payload, cursor), LIST_TIMEOUT)
            .await
    }

    async fn query_dated_since(
        &self,
        store: &StoreHandle,
        date: CanonicalDate,
        cursor: Option<&str>,
    ) -> Result<QueryPage, StoreError> {
        let payload = json!({
            "filter": { "property": "date", "date": { "on_or_after": date.to_string() } },
            "sorts": [{ "property": "date", "direction": "descending" }],
            "page_size": QUERY_PAGE_SIZE,
        });
        self.query(store, with_cursor(payload, cursor), LIST_TIMEOUT)
            .await
    }

    async fn archive_page(&self, page_id: &str) -> Result<(), StoreError> {
        let url = format!("{}/pages/{}", self.base_url, page_id);
        let resp = self
            .authed(self.http.patch(url))
            .timeout(ARCHIVE_TIMEOUT)
            .json(&json!({ "archived": true }))
            .send()
            .await?;
        ensure_ok(resp).await?;
        Ok(())
    }
}

// --- wire types ---

#[derive(Debug, Deserialize)]
struct CreatedPage {
    #[serde(default)]
    id: String,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<RawPage>,
    #[serde(default)]
    has_more: bool,
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPage {
    id: String,
    #[serde(default)]
    properties: Value,
}

impl RawPage {
    fn into_summary(self) -> PageSummary {
        let props = &self.properties;
        PageSummary {
            title: plain_text(&props["title"]["title"]),
            summary: plain_text(&props["content"]["rich_text"]),
            url: props["url"]["url"].as_str().map(str::to_string),
            date: props["date"]["date"]["start"]
                .as_str()
                .and_then(|s| s.get(..10))
                .and_then(|s| s.parse().ok()),
            id: self.id,
        }
    }
}

fn plain_text(rich: &Value) -> String {
    rich.as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| {
                    p["plain_text"]
                        .as_str()
                        .or_else(|| p["text"]["content"].as_str())
                })
                .collect::<String>()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_page_summary_reads_properties() {
        let raw: RawPage = serde_json::from_value(json!({
            "id": "p1",
            "properties": {
                "title": { "title": [{ "plain_text": "Hello " }, { "plain_text": "world" }] },
                "content": { "type": "rich_text", "rich_text": [{ "plain_text": "sum" }] },
                "url": { "url": "https://x/1" },
                "date": { "date": { "start": "2024-05-01T00:00:00.000+09:00" } }
            }
        }))
        .unwrap();
        let s = raw.into_summary();
        assert_eq!(s.title, "Hello world");
        assert_eq!(s.summary, "sum");
        assert_eq!(s.url.as_deref(), Some("https://x/1"));
        assert_eq!(s.date.map(|d| d.to_string()).as_deref(), Some("2024-05-01"));
    }

    #[test]
    fn missing_properties_degrade_to_empty() {
        let raw: RawPage = serde_json::from_value(json!({ "id": "p2" })).unwrap();
        let s = raw.into_summary();
        assert_eq!(s.title, "");
        assert!(s.url.is_none());
        assert!(s.date.is_none());
    }
}
