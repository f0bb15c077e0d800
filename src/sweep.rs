// src/sweep.rs
//! Retention sweep: archives pages older than the retention window.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use metrics::counter;

use crate::date::CanonicalDate;
use crate::notify::{Notifier, Severity};
use crate::store::{KnowledgeStore, PageId, StoreHandle};

pub const DEFAULT_RETENTION_DAYS: i64 = 90;

pub struct RetentionSweeper {
    store: Arc<dyn KnowledgeStore>,
    notifier: Arc<dyn Notifier>,
    retention_days: i64,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn KnowledgeStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            notifier,
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }

    pub fn with_retention_days(mut self, days: i64) -> Self {
        self.retention_days = days;
        self
    }

    pub async fn sweep(&self, store: &StoreHandle) -> usize {
        self.sweep_at(store, Utc::now().date_naive()).await
    }

    /// Archive every page of `store` dated before `today - retention`.
    /// Returns how many pages were archived.
    pub async fn sweep_at(&self, store: &StoreHandle, today: NaiveDate) -> usize {
        let threshold = CanonicalDate::new(today - chrono::Duration::days(self.retention_days));
        tracing::info!(store = %store.kind, %threshold, "retention sweep started");

        let Some(ids) = self.enumerate(store, threshold).await else {
            return 0;
        };
        if ids.is_empty() {
            tracing::info!(store = %store.kind, "nothing to archive");
            return 0;
        }
        tracing::info!(store = %store.kind, pages = ids.len(), "archiving old pages");

        let mut archived = 0usize;
        for id in &ids {
            match self.store.archive_page(id).await {
                Ok(()) => {
                    archived += 1;
                    tracing::debug!(page_id = %id, "archived");
                }
                Err(e) => {
                    tracing::error!(page_id = %id, error = %e, "archive failed");
                    counter!("aggregator_store_errors_total").increment(1);
                    self.notifier
                        .notify(Severity::Error, &format!("Archive failed ({id}): {e}"))
                        .await;
                }
            }
        }

        counter!("aggregator_archived_total", "store" => store.kind.to_string())
            .increment(archived as u64);
        tracing::info!(store = %store.kind, archived, "retention sweep finished");
        if archived > 0 {
            self.notifier
                .notify(
                    Severity::Info,
                    &format!(
                        "Retention sweep ({}) finished: {archived} pages archived.",
                        store.kind
                    ),
                )
                .await;
        }
        archived
    }

    /// All page ids before `threshold`, following cursors. `None` when a
    /// query failed, in which case nothing may be archived.
    async fn enumerate(&self, store: &StoreHandle, threshold: CanonicalDate) -> Option<Vec<PageId>> {
        let mut ids = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            match self
                .store
                .query_dated_before(store, threshold, cursor.as_deref())
                .await
            {
                Ok(page) => {
                    ids.extend(page.results.into_iter().map(|p| p.id));
                    match page.next_cursor {
                        Some(next) => cursor = Some(next),
                        None => return Some(ids),
                    }
                }
                Err(e) => {
                    tracing::error!(store = %store.kind, error = %e, "old page query failed");
                    counter!("aggregator_store_errors_total").increment(1);
                    self.notifier
                        .notify(
                            Severity::Error,
                            &format!("Old page query failed ({}): {e}", store.kind),
                        )
                        .await;
                    return None;
                }
            }
        }
    }
}
