// src/ingest/types.rs
use anyhow::Result;

use super::{ItemOutcome, Pipeline};
use crate::store::StoreHandle;

/// How the pipeline fills summary and details for a new item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrichMode {
    /// AI summary plus AI write-up of the raw content.
    Generate,
    /// AI summary plus a generated report whose title is appended to `title_prefix`.
    Report { title_prefix: String },
    /// Text supplied by the adapter; no AI calls.
    Fixed { summary: String, details: String },
}

/// One raw item as read from a source, before any validation.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub title: String,
    pub url: Option<String>,
    pub content: String,
    pub raw_date: Option<String>,
    pub category: String,
    /// When set, titles without this marker are dropped.
    pub required_title_marker: Option<String>,
    pub enrich: EnrichMode,
}

impl Candidate {
    pub fn new(title: impl Into<String>, url: Option<String>, category: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url,
            content: String::new(),
            raw_date: None,
            category: category.into(),
            required_title_marker: None,
            enrich: EnrichMode::Generate,
        }
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn raw_date(mut self, raw: Option<String>) -> Self {
        self.raw_date = raw;
        self
    }

    pub fn require_title_marker(mut self, marker: Option<String>) -> Self {
        self.required_title_marker = marker;
        self
    }

    pub fn enrich(mut self, mode: EnrichMode) -> Self {
        self.enrich = mode;
        self
    }
}

/// Per-run tally returned by an adapter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdapterReport {
    pub seen: usize,
    pub stored: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl AdapterReport {
    pub fn record(&mut self, outcome: ItemOutcome) {
        self.seen += 1;
        match outcome {
            ItemOutcome::Skipped(_) => self.skipped += 1,
            ItemOutcome::Published(o) if o.stored() => self.stored += 1,
            ItemOutcome::Published(crate::publish::PublishOutcome::AgeFiltered) => {
                self.skipped += 1
            }
            ItemOutcome::Published(_) => self.failed += 1,
        }
    }
}

/// One origin of security news. Adapters run strictly one after another.
#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    fn name(&self) -> &str;
    /// Collection every item of this adapter is published to.
    fn store(&self) -> &StoreHandle;
    /// Fetch and process all current items. `Err` means the whole source failed.
    async fn run(&self, pipeline: &Pipeline) -> Result<AdapterReport>;
}
