use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use metrics::{counter, histogram};
use quick_xml::de::from_str;
use serde::Deserialize;

use crate::ingest::types::{AdapterReport, Candidate, SourceAdapter};
use crate::ingest::{normalize_text, Pipeline};
use crate::notify::Severity;
use crate::store::StoreHandle;

const FETCH_TIMEOUT: Duration = Duration::from_secs(15);
const UNTITLED: &str = "제목 없음";
const NO_CONTENT: &str = "내용 없음";

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}
#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}
#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    description: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    #[serde(rename = "dc:date", alias = "date")]
    dc_date: Option<String>,
}

/// One `<item>` with its date already resolved (`pubDate`, else `dc:date`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    pub title: String,
    pub link: Option<String>,
    pub description: String,
    pub date: Option<String>,
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Parse an RSS 2.0 document into items, in feed order.
pub fn parse_feed(xml: &str) -> Result<Vec<FeedItem>> {
    let t0 = std::time::Instant::now();
    let xml_clean = scrub_html_entities_for_xml(xml);
    let rss: Rss = from_str(&xml_clean).context("parsing rss xml")?;

    let out: Vec<FeedItem> = rss
        .channel
        .item
        .into_iter()
        .map(|it| FeedItem {
            title: non_empty(it.title).unwrap_or_else(|| UNTITLED.to_string()),
            link: non_empty(it.link),
            description: non_empty(it.description).unwrap_or_else(|| NO_CONTENT.to_string()),
            date: non_empty(it.pub_date).or_else(|| non_empty(it.dc_date)),
        })
        .collect();

    histogram!("aggregator_feed_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
    Ok(out)
}

/// Named HTML entities seen in Korean news feeds. XML predefines only five,
/// so any of these left in a description makes quick-xml reject the feed.
const HTML_ONLY_ENTITIES: &[(&str, &str)] = &[
    ("&nbsp;", " "),
    ("&middot;", "·"),
    ("&hellip;", "…"),
    ("&bull;", "•"),
    ("&ndash;", "-"),
    ("&mdash;", "-"),
    ("&ldquo;", "\""),
    ("&rdquo;", "\""),
    ("&lsquo;", "'"),
    ("&rsquo;", "'"),
];

fn scrub_html_entities_for_xml(s: &str) -> String {
    HTML_ONLY_ENTITIES
        .iter()
        .fold(s.to_string(), |acc, (entity, text)| acc.replace(entity, text))
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FeedSpec {
    pub url: String,
    /// Only titles containing this marker are kept from this feed.
    #[serde(default)]
    pub require_title: Option<String>,
}

impl FeedSpec {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            require_title: None,
        }
    }

    pub fn requiring(mut self, marker: impl Into<String>) -> Self {
        self.require_title = Some(marker.into());
        self
    }
}

/// A named group of RSS feeds published under one category.
pub struct RssAdapter {
    name: String,
    category: String,
    store: StoreHandle,
    feeds: Vec<FeedSpec>,
    client: reqwest::Client,
}

impl RssAdapter {
    pub fn new(
        name: impl Into<String>,
        category: impl Into<String>,
        store: StoreHandle,
        feeds: Vec<FeedSpec>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("security-news-aggregator/", env!("CARGO_PKG_VERSION")))
            .timeout(FETCH_TIMEOUT)
            .build()
            .context("building feed http client")?;
        Ok(Self {
            name: name.into(),
            category: category.into(),
            store,
            feeds,
            client,
        })
    }

    pub fn feeds(&self) -> &[FeedSpec] {
        &self.feeds
    }

    async fn fetch(&self, url: &str) -> Result<Vec<FeedItem>> {
        let body = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .context("rss http get()")?
            .text()
            .await
            .context("rss http .text()")?;
        parse_feed(&body)
    }
}

#[async_trait]
impl SourceAdapter for RssAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn store(&self) -> &StoreHandle {
        &self.store
    }

    async fn run(&self, pipeline: &Pipeline) -> Result<AdapterReport> {
        let mut report = AdapterReport::default();
        for feed in &self.feeds {
            let items = match self.fetch(&feed.url).await {
                Ok(items) => items,
                Err(e) => {
                    tracing::warn!(error = ?e, source = %self.name, url = %feed.url, "feed error");
                    counter!("aggregator_source_errors_total", "source" => self.name.clone())
                        .increment(1);
                    pipeline
                        .notifier()
                        .notify(
                            Severity::Error,
                            &format!("{} RSS ({}) failed: {e:#}", self.name, feed.url),
                        )
                        .await;
                    continue;
                }
            };
            tracing::info!(source = %self.name, url = %feed.url, items = items.len(), "feed fetched");

            for it in items {
                let candidate = Candidate::new(it.title, it.link, self.category.clone())
                    .content(normalize_text(&it.description))
                    .raw_date(it.date)
                    .require_title_marker(feed.require_title.clone());
                let outcome = pipeline.process(&self.name, candidate, &self.store).await;
                report.record(outcome);
            }
        }
        Ok(report)
    }
}
