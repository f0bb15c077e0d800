// src/store/mod.rs
//! Persistent knowledge store: the source of truth for published items.
//!
//! Items are partitioned into logical collections ([`StoreKind`]); each
//! collection maps to one database id in the backing service.

pub mod memory;
pub mod notion;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::blocks::ContentBlock;
use crate::date::CanonicalDate;

pub use memory::MemoryStore;
pub use notion::NotionStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// General security news and advisories.
    Issues,
    /// CVE / vulnerability records.
    Vulnerabilities,
}

impl StoreKind {
    /// Blog category the mirror files items of this collection under.
    pub fn mirror_category(&self) -> &'static str {
        match self {
            StoreKind::Issues => "보안이슈",
            StoreKind::Vulnerabilities => "CVE",
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKind::Issues => f.write_str("issues"),
            StoreKind::Vulnerabilities => f.write_str("vulnerabilities"),
        }
    }
}

/// Fallback category for posts that belong to no known collection.
pub const OTHER_MIRROR_CATEGORY: &str = "기타";

/// Identifies one collection in the backing service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreHandle {
    pub kind: StoreKind,
    pub database_id: String,
}

impl StoreHandle {
    pub fn new(kind: StoreKind, database_id: impl Into<String>) -> Self {
        Self {
            kind,
            database_id: database_id.into(),
        }
    }
}

pub type PageId = String;

/// Everything needed to create one page.
#[derive(Debug, Clone)]
pub struct PageDraft {
    pub store: StoreHandle,
    pub title: String,
    pub summary: String,
    pub url: String,
    pub date: CanonicalDate,
    pub category: String,
    /// Initial content; at most `MAX_BLOCKS_PER_REQUEST` blocks.
    pub blocks: Vec<ContentBlock>,
}

/// Lightweight view of a stored page as returned by queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSummary {
    pub id: PageId,
    pub title: String,
    pub url: Option<String>,
    pub summary: String,
    pub date: Option<CanonicalDate>,
}

/// One page of a paginated query.
#[derive(Debug, Clone, Default)]
pub struct QueryPage {
    pub results: Vec<PageSummary>,
    /// Present when more results exist.
    pub next_cursor: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("store returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("store response could not be decoded: {0}")]
    Decode(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait::async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn create_page(&self, draft: &PageDraft) -> Result<PageId, StoreError>;

    /// Append up to `MAX_BLOCKS_PER_REQUEST` blocks to an existing page.
    async fn append_blocks(
        &self,
        page_id: &str,
        blocks: &[ContentBlock],
    ) -> Result<(), StoreError>;

    /// Pages in `store` whose url property equals `url` exactly.
    async fn query_by_url(
        &self,
        store: &StoreHandle,
        url: &str,
    ) -> Result<Vec<PageSummary>, StoreError>;

    /// Pages dated strictly before `date`.
    async fn query_dated_before(
        &self,
        store: &StoreHandle,
        date: CanonicalDate,
        cursor: Option<&str>,
    ) -> Result<QueryPage, StoreError>;

    /// Pages dated on or after `date`, newest first.
    async fn query_dated_since(
        &self,
        store: &StoreHandle,
        date: CanonicalDate,
        cursor: Option<&str>,
    ) -> Result<QueryPage, StoreError>;

    async fn archive_page(&self, page_id: &str) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_are_fixed_per_kind() {
        assert_eq!(StoreKind::Vulnerabilities.mirror_category(), "CVE");
        assert_eq!(StoreKind::Issues.mirror_category(), "보안이슈");
    }
}
