// src/digest.rs
//! Weekly digest: the last week of one collection, condensed into a single
//! generated report and posted to the blog.

use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike, Utc, Weekday};
use serde::Deserialize;

use crate::date::CanonicalDate;
use crate::enrich::Enricher;
use crate::mirror::{filter_bmp, render_html, MirrorPost};
use crate::notify::{Notifier, Severity};
use crate::publish::{mirror_category, PublishOutcome, Publisher};
use crate::store::{KnowledgeStore, PageSummary, StoreHandle};

pub const DEFAULT_LOOKBACK_DAYS: i64 = 7;
pub const ENTRY_SEPARATOR: &str = "\n---\n";
const DIGEST_TAG: &str = "주간 보안 리포트";

/// When the digest runs: the batch starting in this weekday/hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct DigestSchedule {
    pub weekday: Weekday,
    pub hour: u32,
}

impl DigestSchedule {
    pub fn is_due<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> bool {
        now.weekday() == self.weekday && now.hour() == self.hour
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestOutcome {
    NoEntries,
    QueryFailed,
    Posted(PublishOutcome),
}

/// One entry as fed to the report prompt.
pub fn format_entry(p: &PageSummary) -> String {
    format!(
        "제목: {}\nURL: {}\n요약: {}\n",
        p.title,
        p.url.as_deref().unwrap_or("URL 없음"),
        p.summary
    )
}

pub struct WeeklyDigest {
    store: Arc<dyn KnowledgeStore>,
    enricher: Arc<dyn Enricher>,
    notifier: Arc<dyn Notifier>,
    lookback_days: i64,
}

impl WeeklyDigest {
    pub fn new(
        store: Arc<dyn KnowledgeStore>,
        enricher: Arc<dyn Enricher>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            enricher,
            notifier,
            lookback_days: DEFAULT_LOOKBACK_DAYS,
        }
    }

    /// Entries dated within the lookback window, newest first, joined for the prompt.
    pub async fn collect(&self, store: &StoreHandle, today: NaiveDate) -> Option<String> {
        let since = CanonicalDate::new(today - chrono::Duration::days(self.lookback_days));
        let mut entries = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            match self
                .store
                .query_dated_since(store, since, cursor.as_deref())
                .await
            {
                Ok(page) => {
                    entries.extend(page.results.iter().map(format_entry));
                    match page.next_cursor {
                        Some(next) => cursor = Some(next),
                        None => break,
                    }
                }
                Err(e) => {
                    tracing::error!(store = %store.kind, error = %e, "recent entries query failed");
                    self.notifier
                        .notify(
                            Severity::Error,
                            &format!("Recent entries query failed ({}): {e}", store.kind),
                        )
                        .await;
                    return None;
                }
            }
        }
        tracing::info!(store = %store.kind, %since, entries = entries.len(), "recent entries collected");
        Some(entries.join(ENTRY_SEPARATOR))
    }

    pub async fn run(&self, store: &StoreHandle, publisher: &Publisher) -> DigestOutcome {
        self.run_at(store, publisher, Utc::now().date_naive()).await
    }

    pub async fn run_at(
        &self,
        store: &StoreHandle,
        publisher: &Publisher,
        today: NaiveDate,
    ) -> DigestOutcome {
        let Some(material) = self.collect(store, today).await else {
            return DigestOutcome::QueryFailed;
        };
        if material.is_empty() {
            return DigestOutcome::NoEntries;
        }

        let report = self.enricher.report(&material).await;
        if let Some(reason) = &report.failure {
            tracing::warn!(store = %store.kind, reason, "digest report incomplete");
            self.notifier
                .notify(
                    Severity::Warn,
                    &format!("Weekly digest ({}) report incomplete: {reason}", store.kind),
                )
                .await;
        }

        let post = MirrorPost {
            title: report.title.clone(),
            html: filter_bmp(&render_html(&report.body)),
            tags: vec![DIGEST_TAG.to_string()],
            category: mirror_category(Some(store.kind)).to_string(),
            source_url: String::new(),
        };
        DigestOutcome::Posted(publisher.mirror_post(&post).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::ScriptedEnricher;
    use crate::mirror::RecordingMirror;
    use crate::notify::RecordingNotifier;
    use crate::store::{MemoryStore, StoreKind};

    #[test]
    fn schedule_matches_weekday_and_hour() {
        let s = DigestSchedule {
            weekday: Weekday::Mon,
            hour: 9,
        };
        let mon9 = Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap();
        let mon10 = Utc.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).unwrap();
        let tue9 = Utc.with_ymd_and_hms(2024, 6, 4, 9, 0, 0).unwrap();
        assert!(s.is_due(&mon9));
        assert!(!s.is_due(&mon10));
        assert!(!s.is_due(&tue9));
    }

    #[tokio::test]
    async fn digest_reports_last_week_newest_first() {
        let store = Arc::new(MemoryStore::new());
        let issues = StoreHandle::new(StoreKind::Issues, "db-issues");
        let d = |day| CanonicalDate::from_ymd(2024, 6, day).unwrap();
        store.insert(&issues, "old", "https://x/old", d(1));
        store.insert(&issues, "mid", "https://x/mid", d(25));
        store.insert(&issues, "new", "https://x/new", d(29));

        let enricher = Arc::new(ScriptedEnricher::ok("s", "d"));
        let notifier = Arc::new(RecordingNotifier::new());
        let mirror = Arc::new(RecordingMirror::new());
        let publisher = Publisher::new(store.clone(), mirror.clone(), notifier.clone());
        let digest = WeeklyDigest::new(store.clone(), enricher.clone(), notifier.clone());

        let today = NaiveDate::from_ymd_opt(2024, 6, 30).unwrap();
        let out = digest.run_at(&issues, &publisher, today).await;
        assert_eq!(out, DigestOutcome::Posted(PublishOutcome::MirrorOk));

        let calls = enricher.calls.lock().unwrap().clone();
        let input = calls[0].strip_prefix("report:").unwrap();
        let parts: Vec<_> = input.split(ENTRY_SEPARATOR).collect();
        assert_eq!(parts.len(), 2);
        assert!(parts[0].starts_with("제목: new"));
        assert!(parts[1].starts_with("제목: mid"));

        let posts = mirror.posts();
        assert_eq!(posts[0].title, "Generated title");
        assert_eq!(posts[0].category, "보안이슈");
    }

    #[tokio::test]
    async fn empty_week_posts_nothing() {
        let store = Arc::new(MemoryStore::new());
        let issues = StoreHandle::new(StoreKind::Issues, "db-issues");
        let enricher = Arc::new(ScriptedEnricher::ok("s", "d"));
        let notifier = Arc::new(RecordingNotifier::new());
        let mirror = Arc::new(RecordingMirror::new());
        let publisher = Publisher::new(store.clone(), mirror.clone(), notifier.clone());
        let digest = WeeklyDigest::new(store, enricher.clone(), notifier);

        let today = NaiveDate::from_ymd_opt(2024, 6, 30).unwrap();
        assert_eq!(
            digest.run_at(&issues, &publisher, today).await,
            DigestOutcome::NoEntries
        );
        assert_eq!(enricher.call_count(), 0);
        assert!(mirror.posts().is_empty());
    }
}
