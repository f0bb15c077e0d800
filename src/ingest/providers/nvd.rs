//! NVD CVE API 2.0 adapter: recently published CVEs into the vulnerability collection.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Deserialize;

use crate::ingest::types::{AdapterReport, Candidate, EnrichMode, SourceAdapter};
use crate::ingest::Pipeline;
use crate::notify::Severity;
use crate::store::StoreHandle;

pub const DEFAULT_BASE_URL: &str = "https://services.nvd.nist.gov/rest/json/cves/2.0";
pub const RESULTS_PER_PAGE: usize = 200;
pub const DETAIL_URL_PREFIX: &str = "https://nvd.nist.gov/vuln/detail/";
const SOURCE_NAME: &str = "NVD";
const CATEGORY: &str = "CVE";
const NVD_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Page {
    #[serde(default)]
    total_results: usize,
    #[serde(default)]
    vulnerabilities: Vec<Wrapper>,
}

#[derive(Debug, Deserialize)]
struct Wrapper {
    cve: Cve,
}

#[derive(Debug, Deserialize)]
struct Cve {
    id: String,
    published: Option<String>,
    #[serde(default)]
    descriptions: Vec<Description>,
}

#[derive(Debug, Deserialize)]
struct Description {
    lang: String,
    value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CveRecord {
    pub id: String,
    pub published: Option<String>,
    pub description: String,
}

impl CveRecord {
    pub fn detail_url(&self) -> String {
        format!("{DETAIL_URL_PREFIX}{}", self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CvePage {
    pub total_results: usize,
    pub records: Vec<CveRecord>,
}

/// Decode one API page, keeping the English description of each record.
pub fn parse_page(json: &str) -> Result<CvePage> {
    let page: Page = serde_json::from_str(json).context("parsing nvd json")?;
    let records = page
        .vulnerabilities
        .into_iter()
        .map(|w| {
            let description = w
                .cve
                .descriptions
                .iter()
                .find(|d| d.lang.eq_ignore_ascii_case("en"))
                .map(|d| d.value.trim().to_string())
                .unwrap_or_default();
            CveRecord {
                id: w.cve.id,
                published: w.cve.published,
                description,
            }
        })
        .collect();
    Ok(CvePage {
        total_results: page.total_results,
        records,
    })
}

pub struct NvdAdapter {
    store: StoreHandle,
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    window_days: i64,
}

impl NvdAdapter {
    pub fn new(store: StoreHandle, api_key: Option<String>, window_days: i64) -> Result<Self> {
        Self::with_base_url(store, api_key, window_days, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(
        store: StoreHandle,
        api_key: Option<String>,
        window_days: i64,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("security-news-aggregator/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .context("building nvd http client")?;
        Ok(Self {
            store,
            client,
            base_url: base_url.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            window_days: window_days.max(1),
        })
    }

    async fn fetch_page(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        start_index: usize,
    ) -> Result<CvePage> {
        let mut req = self.client.get(&self.base_url).query(&[
            ("pubStartDate", start.format(NVD_TIME_FORMAT).to_string()),
            ("pubEndDate", end.format(NVD_TIME_FORMAT).to_string()),
            ("resultsPerPage", RESULTS_PER_PAGE.to_string()),
            ("startIndex", start_index.to_string()),
        ]);
        if let Some(key) = &self.api_key {
            req = req.header("apiKey", key);
        }
        let body = req
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .context("nvd http get()")?
            .text()
            .await
            .context("nvd http .text()")?;
        parse_page(&body)
    }

    /// All records published in `[end - window, end]`, following `startIndex`.
    pub async fn fetch_window(&self, end: DateTime<Utc>) -> Result<Vec<CveRecord>> {
        let start = end - chrono::Duration::days(self.window_days);
        let mut out = Vec::new();
        let mut start_index = 0usize;
        loop {
            let page = self.fetch_page(start, end, start_index).await?;
            let got = page.records.len();
            out.extend(page.records);
            start_index += got;
            if got == 0 || start_index >= page.total_results {
                break;
            }
        }
        Ok(out)
    }
}

fn candidate(rec: CveRecord) -> Candidate {
    let url = rec.detail_url();
    let content = format!("{}\n{}", rec.id, rec.description);
    Candidate::new(rec.id.clone(), Some(url), CATEGORY)
        .content(content)
        .raw_date(rec.published)
        .enrich(EnrichMode::Report {
            title_prefix: rec.id,
        })
}

#[async_trait]
impl SourceAdapter for NvdAdapter {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    fn store(&self) -> &StoreHandle {
        &self.store
    }

    async fn run(&self, pipeline: &Pipeline) -> Result<AdapterReport> {
        let mut report = AdapterReport::default();
        let records = match self.fetch_window(Utc::now()).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = ?e, source = SOURCE_NAME, "nvd fetch failed");
                counter!("aggregator_source_errors_total", "source" => SOURCE_NAME).increment(1);
                pipeline
                    .notifier()
                    .notify(Severity::Error, &format!("{SOURCE_NAME} fetch failed: {e:#}"))
                    .await;
                return Ok(report);
            }
        };
        tracing::info!(source = SOURCE_NAME, records = records.len(), "cve window fetched");
        for rec in records {
            if rec.description.is_empty() {
                tracing::debug!(id = %rec.id, "cve without english description");
            }
            let outcome = pipeline.process(SOURCE_NAME, candidate(rec), &self.store).await;
            report.record(outcome);
        }
        Ok(report)
    }
}
