// src/store/memory.rs
//! In-memory [`KnowledgeStore`] with a call log and failure injection.
//! Backs the integration tests and `DRY_RUN=1` runs.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{KnowledgeStore, PageDraft, PageId, PageSummary, QueryPage, StoreError, StoreHandle};
use crate::blocks::ContentBlock;
use crate::date::CanonicalDate;

#[derive(Debug, Clone)]
pub struct StoredPage {
    pub id: PageId,
    pub store: StoreHandle,
    pub title: String,
    pub summary: String,
    pub url: String,
    pub date: CanonicalDate,
    pub category: String,
    pub blocks: Vec<ContentBlock>,
    pub archived: bool,
}

impl StoredPage {
    fn summary(&self) -> PageSummary {
        PageSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            url: Some(self.url.clone()),
            summary: self.summary.clone(),
            date: Some(self.date),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Create { title: String, blocks: usize },
    Append { page_id: PageId, blocks: usize },
    QueryUrl { url: String },
    QueryBefore { cursor: Option<String> },
    QuerySince { cursor: Option<String> },
    Archive { page_id: PageId },
}

#[derive(Default)]
struct Inner {
    pages: Vec<StoredPage>,
    calls: Vec<StoreCall>,
    next_id: u64,
    fail_create: bool,
    fail_queries: bool,
    appends_before_failure: Option<usize>,
    fail_archive: HashSet<PageId>,
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
    page_size: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_page_size(100)
    }

    /// Query pagination size; small values exercise cursor handling.
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            page_size: page_size.max(1),
        }
    }

    /// Lock for the setup helpers; a poisoned store is still usable there.
    fn seed_lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store poisoned".into()))
    }

    /// Seed a page directly, bypassing the call log.
    pub fn insert(&self, store: &StoreHandle, title: &str, url: &str, date: CanonicalDate) -> PageId {
        let mut g = self.seed_lock();
        g.next_id += 1;
        let id = format!("page-{}", g.next_id);
        g.pages.push(StoredPage {
            id: id.clone(),
            store: store.clone(),
            title: title.to_string(),
            summary: String::new(),
            url: url.to_string(),
            date,
            category: String::new(),
            blocks: Vec::new(),
            archived: false,
        });
        id
    }

    pub fn fail_create(&self, on: bool) {
        self.seed_lock().fail_create = on;
    }

    pub fn fail_queries(&self, on: bool) {
        self.seed_lock().fail_queries = on;
    }

    /// Let `n` append calls succeed, then fail every later one.
    pub fn fail_appends_after(&self, n: usize) {
        self.seed_lock().appends_before_failure = Some(n);
    }

    pub fn fail_archive_of(&self, page_id: &str) {
        self.seed_lock().fail_archive.insert(page_id.to_string());
    }

    pub fn pages(&self) -> Vec<StoredPage> {
        self.inner
            .lock()
            .map(|g| g.pages.clone())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.inner
            .lock()
            .map(|g| g.calls.clone())
            .unwrap_or_default()
    }

    pub fn create_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, StoreCall::Create { .. }))
            .count()
    }

    fn paginate(&self, matches: Vec<PageSummary>, cursor: Option<&str>) -> QueryPage {
        let start = cursor.and_then(|c| c.parse::<usize>().ok()).unwrap_or(0);
        let end = (start + self.page_size).min(matches.len());
        let results = matches.get(start..end).map(<[_]>::to_vec).unwrap_or_default();
        QueryPage {
            results,
            next_cursor: (end < matches.len()).then(|| end.to_string()),
        }
    }
}

#[async_trait::async_trait]
impl KnowledgeStore for MemoryStore {
    async fn create_page(&self, draft: &PageDraft) -> Result<PageId, StoreError> {
        let mut g = self.lock()?;
        g.calls.push(StoreCall::Create {
            title: draft.title.clone(),
            blocks: draft.blocks.len(),
        });
        if g.fail_create {
            return Err(StoreError::Status {
                status: 400,
                body: "injected create failure".into(),
            });
        }
        g.next_id += 1;
        let id = format!("page-{}", g.next_id);
        g.pages.push(StoredPage {
            id: id.clone(),
            store: draft.store.clone(),
            title: draft.title.clone(),
            summary: draft.summary.clone(),
            url: draft.url.clone(),
            date: draft.date,
            category: draft.category.clone(),
            blocks: draft.blocks.clone(),
            archived: false,
        });
        Ok(id)
    }

    async fn append_blocks(
        &self,
        page_id: &str,
        blocks: &[ContentBlock],
    ) -> Result<(), StoreError> {
        let mut g = self.lock()?;
        g.calls.push(StoreCall::Append {
            page_id: page_id.to_string(),
            blocks: blocks.len(),
        });
        if let Some(left) = g.appends_before_failure {
            if left == 0 {
                return Err(StoreError::Status {
                    status: 502,
                    body: "injected append failure".into(),
                });
            }
            g.appends_before_failure = Some(left - 1);
        }
        let page = g
            .pages
            .iter_mut()
            .find(|p| p.id == page_id)
            .ok_or_else(|| StoreError::Status {
                status: 404,
                body: format!("no page {page_id}"),
            })?;
        page.blocks.extend_from_slice(blocks);
        Ok(())
    }

    async fn query_by_url(
        &self,
        store: &StoreHandle,
        url: &str,
    ) -> Result<Vec<PageSummary>, StoreError> {
        let mut g = self.lock()?;
        g.calls.push(StoreCall::QueryUrl {
            url: url.to_string(),
        });
        if g.fail_queries {
            return Err(StoreError::Unavailable("injected query failure".into()));
        }
        let wanted = url.trim();
        Ok(g.pages
            .iter()
            .filter(|p| !p.archived && p.store == *store && p.url == wanted)
            .map(StoredPage::summary)
            .collect())
    }

    async fn query_dated_before(
        &self,
        store: &StoreHandle,
        date: CanonicalDate,
        cursor: Option<&str>,
    ) -> Result<QueryPage, StoreError> {
        let matches = {
            let mut g = self.lock()?;
            g.calls.push(StoreCall::QueryBefore {
                cursor: cursor.map(str::to_string),
            });
            if g.fail_queries {
                return Err(StoreError::Unavailable("injected query failure".into()));
            }
            g.pages
                .iter()
                .filter(|p| !p.archived && p.store == *store && p.date < date)
                .map(StoredPage::summary)
                .collect::<Vec<_>>()
        };
        Ok(self.paginate(matches, cursor))
    }

    async fn query_dated_since(
        &self,
        store: &StoreHandle,
        date: CanonicalDate,
        cursor: Option<&str>,
    ) -> Result<QueryPage, StoreError> {
        let mut matches = {
            let mut g = self.lock()?;
            g.calls.push(StoreCall::QuerySince {
                cursor: cursor.map(str::to_string),
            });
            if g.fail_queries {
                return Err(StoreError::Unavailable("injected query failure".into()));
            }
            g.pages
                .iter()
                .filter(|p| !p.archived && p.store == *store && p.date >= date)
                .map(StoredPage::summary)
                .collect::<Vec<_>>()
        };
        matches.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(self.paginate(matches, cursor))
    }

    async fn archive_page(&self, page_id: &str) -> Result<(), StoreError> {
        let mut g = self.lock()?;
        g.calls.push(StoreCall::Archive {
            page_id: page_id.to_string(),
        });
        if g.fail_archive.contains(page_id) {
            return Err(StoreError::Status {
                status: 409,
                body: "injected archive failure".into(),
            });
        }
        match g.pages.iter_mut().find(|p| p.id == page_id) {
            Some(p) => {
                p.archived = true;
                Ok(())
            }
            None => Err(StoreError::Status {
                status: 404,
                body: format!("no page {page_id}"),
            }),
        }
    }
}
