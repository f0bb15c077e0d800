// src/dedup.rs
//! Deduplication gate: decides whether a candidate URL is already present
//! in its collection. Runs before any enrichment call.

use std::sync::Arc;

use metrics::counter;

use crate::notify::{Notifier, Severity};
use crate::store::{KnowledgeStore, StoreHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupStatus {
    New,
    Duplicate,
    /// The lookup failed; never to be treated as `New`.
    Unknown,
}

pub struct DedupGate {
    store: Arc<dyn KnowledgeStore>,
    notifier: Arc<dyn Notifier>,
}

impl DedupGate {
    pub fn new(store: Arc<dyn KnowledgeStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    /// Exact-match lookup of `url` within `store`. Lookup failures are logged
    /// and notified here so callers only need to skip.
    pub async fn check(&self, url: &str, store: &StoreHandle) -> DedupStatus {
        let url = url.trim();
        match self.store.query_by_url(store, url).await {
            Ok(hits) if hits.is_empty() => DedupStatus::New,
            Ok(_) => {
                counter!("aggregator_items_duplicate_total").increment(1);
                DedupStatus::Duplicate
            }
            Err(e) => {
                tracing::error!(error = %e, %url, store = %store.kind, "duplicate check failed");
                counter!("aggregator_store_errors_total").increment(1);
                self.notifier
                    .notify(
                        Severity::Error,
                        &format!("Duplicate check failed for {url}: {e}"),
                    )
                    .await;
                DedupStatus::Unknown
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::date::CanonicalDate;
    use crate::notify::RecordingNotifier;
    use crate::store::{MemoryStore, StoreKind};

    fn setup() -> (Arc<MemoryStore>, Arc<RecordingNotifier>, DedupGate, StoreHandle) {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let gate = DedupGate::new(store.clone(), notifier.clone());
        (store, notifier, gate, StoreHandle::new(StoreKind::Issues, "db-issues"))
    }

    #[tokio::test]
    async fn existing_url_is_duplicate_and_other_is_new() {
        let (store, _n, gate, handle) = setup();
        let d = CanonicalDate::from_ymd(2024, 5, 1).unwrap();
        store.insert(&handle, "t", "https://x/1", d);

        assert_eq!(gate.check("https://x/1", &handle).await, DedupStatus::Duplicate);
        assert_eq!(gate.check("https://x/2", &handle).await, DedupStatus::New);
    }

    #[tokio::test]
    async fn url_is_trimmed_before_lookup() {
        let (store, _n, gate, handle) = setup();
        let d = CanonicalDate::from_ymd(2024, 5, 1).unwrap();
        store.insert(&handle, "t", "https://x/1", d);
        assert_eq!(
            gate.check("  https://x/1\n", &handle).await,
            DedupStatus::Duplicate
        );
    }

    #[tokio::test]
    async fn collections_are_separate() {
        let (store, _n, gate, handle) = setup();
        let d = CanonicalDate::from_ymd(2024, 5, 1).unwrap();
        store.insert(&handle, "t", "https://x/1", d);
        let cve = StoreHandle::new(StoreKind::Vulnerabilities, "db-cve");
        assert_eq!(gate.check("https://x/1", &cve).await, DedupStatus::New);
    }

    #[tokio::test]
    async fn failed_lookup_is_unknown_and_notified() {
        let (store, notifier, gate, handle) = setup();
        store.fail_queries(true);
        assert_eq!(gate.check("https://x/1", &handle).await, DedupStatus::Unknown);
        assert_eq!(notifier.count(Severity::Error), 1);
    }
}
