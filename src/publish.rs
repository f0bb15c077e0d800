// src/publish.rs
//! Publish orchestrator: one request, store first, blog second.
//!
//! Each step fails soft. A store failure ends the request before the
//! mirror is touched; a mirror failure is reported and leaves the stored
//! page alone.

use std::sync::Arc;

use chrono::{Local, NaiveDate};
use metrics::counter;

use crate::blocks::{to_blocks, MAX_BLOCKS_PER_REQUEST};
use crate::date::CanonicalDate;
use crate::mirror::{filter_bmp, render_html, BlogMirror, MirrorPost};
use crate::notify::{Notifier, Severity};
use crate::store::{KnowledgeStore, PageDraft, StoreHandle, StoreKind, OTHER_MIRROR_CATEGORY};

pub const DEFAULT_MAX_AGE_DAYS: i64 = 90;

/// Limit of the store's rich-text property.
pub const SUMMARY_PROPERTY_LIMIT: usize = 2000;

/// Everything gathered for one item after dedup and enrichment.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub title: String,
    pub summary: String,
    pub source_url: String,
    pub posting_date: CanonicalDate,
    pub category: String,
    pub details_markdown: String,
    pub store: StoreHandle,
}

/// Terminal state of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    AgeFiltered,
    StoreFailed,
    MirrorOk,
    MirrorFailed,
}

impl PublishOutcome {
    pub fn stored(&self) -> bool {
        matches!(self, PublishOutcome::MirrorOk | PublishOutcome::MirrorFailed)
    }
}

/// `summary` cut to 1997 characters plus `...` when it exceeds the property limit.
pub fn truncate_summary(summary: &str) -> String {
    if summary.chars().count() <= SUMMARY_PROPERTY_LIMIT {
        return summary.to_string();
    }
    let mut out: String = summary.chars().take(SUMMARY_PROPERTY_LIMIT - 3).collect();
    out.push_str("...");
    out
}

/// Blog category for a collection; posts outside any collection go to "other".
pub fn mirror_category(kind: Option<StoreKind>) -> &'static str {
    kind.map(|k| k.mirror_category())
        .unwrap_or(OTHER_MIRROR_CATEGORY)
}

/// HTML body for the blog, with a fallback when there are no details.
pub fn mirror_html(title: &str, details_markdown: &str) -> String {
    let rendered = if details_markdown.trim().is_empty() {
        String::new()
    } else {
        render_html(details_markdown)
    };
    let html = if rendered.trim().is_empty() {
        format!(
            "<h2>{}</h2><p>상세 내용이 제공되지 않았습니다.</p>",
            html_escape::encode_text(title)
        )
    } else {
        rendered
    };
    filter_bmp(&html)
}

pub struct Publisher {
    store: Arc<dyn KnowledgeStore>,
    mirror: Arc<dyn BlogMirror>,
    notifier: Arc<dyn Notifier>,
    max_age_days: i64,
}

impl Publisher {
    pub fn new(
        store: Arc<dyn KnowledgeStore>,
        mirror: Arc<dyn BlogMirror>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            mirror,
            notifier,
            max_age_days: DEFAULT_MAX_AGE_DAYS,
        }
    }

    pub fn with_max_age_days(mut self, days: i64) -> Self {
        self.max_age_days = days;
        self
    }

    pub fn mirror(&self) -> &Arc<dyn BlogMirror> {
        &self.mirror
    }

    pub async fn publish(&self, req: PublishRequest) -> PublishOutcome {
        self.publish_at(req, Local::now().date_naive()).await
    }

    /// Same as [`Publisher::publish`] with an explicit "today".
    pub async fn publish_at(&self, req: PublishRequest, today: NaiveDate) -> PublishOutcome {
        let age = req.posting_date.age_in_days(today);
        if age > self.max_age_days {
            tracing::info!(title = %req.title, date = %req.posting_date, age, "older than retention window; skipping");
            counter!("aggregator_items_skipped_total", "reason" => "too_old").increment(1);
            return PublishOutcome::AgeFiltered;
        }

        let mut blocks = to_blocks(&req.details_markdown);
        let rest = if blocks.len() > MAX_BLOCKS_PER_REQUEST {
            blocks.split_off(MAX_BLOCKS_PER_REQUEST)
        } else {
            Vec::new()
        };
        let total = blocks.len() + rest.len();

        let draft = PageDraft {
            store: req.store.clone(),
            title: req.title.clone(),
            summary: truncate_summary(&req.summary),
            url: req.source_url.clone(),
            date: req.posting_date,
            category: req.category.clone(),
            blocks,
        };

        let page_id = match self.store.create_page(&draft).await {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(error = %e, title = %req.title, store = %req.store.kind, "page creation failed");
                counter!("aggregator_store_errors_total").increment(1);
                self.notifier
                    .notify(
                        Severity::Error,
                        &format!("Page creation failed: {} - {e}", req.title),
                    )
                    .await;
                return PublishOutcome::StoreFailed;
            }
        };
        tracing::info!(%page_id, title = %req.title, blocks = total, "page created");
        counter!("aggregator_items_published_total", "store" => req.store.kind.to_string())
            .increment(1);

        let mut sent = total - rest.len();
        for batch in rest.chunks(MAX_BLOCKS_PER_REQUEST) {
            if let Err(e) = self.store.append_blocks(&page_id, batch).await {
                tracing::error!(error = %e, %page_id, sent, total, "block append failed; page left partial");
                counter!("aggregator_store_errors_total").increment(1);
                self.notifier
                    .notify(
                        Severity::Error,
                        &format!("Block append failed ({page_id}) after {sent}/{total} blocks: {e}"),
                    )
                    .await;
                break;
            }
            sent += batch.len();
            tracing::debug!(%page_id, sent, total, "blocks appended");
        }

        self.mirror_request(&req).await
    }

    async fn mirror_request(&self, req: &PublishRequest) -> PublishOutcome {
        let post = MirrorPost {
            title: req.title.clone(),
            html: mirror_html(&req.title, &req.details_markdown),
            tags: vec![req.category.clone()],
            category: mirror_category(Some(req.store.kind)).to_string(),
            source_url: req.source_url.clone(),
        };
        self.mirror_post(&post).await
    }

    /// Mirror a post that has no stored counterpart (e.g. the digest).
    pub async fn mirror_post(&self, post: &MirrorPost) -> PublishOutcome {
        match self.mirror.publish(post).await {
            Ok(()) => PublishOutcome::MirrorOk,
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), title = %post.title, "blog mirror failed");
                counter!("aggregator_mirror_errors_total").increment(1);
                self.notifier
                    .notify(
                        Severity::Warn,
                        &format!("Blog mirror failed: {} - {e:#}", post.title),
                    )
                    .await;
                PublishOutcome::MirrorFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::RecordingMirror;
    use crate::notify::RecordingNotifier;
    use crate::store::memory::StoreCall;
    use crate::store::MemoryStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        mirror: Arc<RecordingMirror>,
        notifier: Arc<RecordingNotifier>,
        publisher: Publisher,
    }

    fn fixture(mirror: RecordingMirror) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let mirror = Arc::new(mirror);
        let notifier = Arc::new(RecordingNotifier::new());
        let publisher = Publisher::new(store.clone(), mirror.clone(), notifier.clone());
        Fixture {
            store,
            mirror,
            notifier,
            publisher,
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 30).unwrap()
    }

    fn request(date: CanonicalDate, details: &str) -> PublishRequest {
        PublishRequest {
            title: "Critical patch".into(),
            summary: "summary".into(),
            source_url: "https://news/1".into(),
            posting_date: date,
            category: "보안뉴스".into(),
            details_markdown: details.into(),
            store: StoreHandle::new(StoreKind::Issues, "db-issues"),
        }
    }

    #[test]
    fn summary_over_limit_is_cut_with_ellipsis() {
        let long = "가".repeat(2001);
        let cut = truncate_summary(&long);
        assert_eq!(cut.chars().count(), 2000);
        assert!(cut.ends_with("..."));
        let exact = "a".repeat(2000);
        assert_eq!(truncate_summary(&exact), exact);
    }

    #[test]
    fn category_lookup_falls_back_to_other() {
        assert_eq!(mirror_category(Some(StoreKind::Vulnerabilities)), "CVE");
        assert_eq!(mirror_category(None), OTHER_MIRROR_CATEGORY);
    }

    #[test]
    fn empty_details_use_fallback_html() {
        let html = mirror_html("A <b>", "  ");
        assert_eq!(html, "<h2>A &lt;b&gt;</h2><p>상세 내용이 제공되지 않았습니다.</p>");
    }

    #[test]
    fn mirror_html_drops_astral_emoji() {
        let html = mirror_html("t", "## 🔍 뉴스 요약\n본문");
        assert!(html.contains("<h2> 뉴스 요약</h2>"));
        assert!(!html.contains('🔍'));
    }

    #[tokio::test]
    async fn old_item_never_reaches_store() {
        let f = fixture(RecordingMirror::new());
        let old = CanonicalDate::from_ymd(2024, 3, 1).unwrap();
        let out = f.publisher.publish_at(request(old, "x"), today()).await;
        assert_eq!(out, PublishOutcome::AgeFiltered);
        assert!(f.store.calls().is_empty());
        assert!(f.mirror.posts().is_empty());
        assert!(f.notifier.snapshot().is_empty());
    }

    #[tokio::test]
    async fn item_exactly_at_limit_is_published() {
        let f = fixture(RecordingMirror::new());
        let d = CanonicalDate::new(today() - chrono::Duration::days(90));
        let out = f.publisher.publish_at(request(d, "x"), today()).await;
        assert_eq!(out, PublishOutcome::MirrorOk);
    }

    #[tokio::test]
    async fn create_failure_skips_mirror_and_notifies() {
        let f = fixture(RecordingMirror::new());
        f.store.fail_create(true);
        let d = CanonicalDate::from_ymd(2024, 6, 29).unwrap();
        let out = f.publisher.publish_at(request(d, "x"), today()).await;
        assert_eq!(out, PublishOutcome::StoreFailed);
        assert!(f.mirror.posts().is_empty());
        assert_eq!(f.notifier.count(Severity::Error), 1);
    }

    #[tokio::test]
    async fn long_details_are_appended_in_batches() {
        let f = fixture(RecordingMirror::new());
        let details = (0..250).map(|i| format!("- item {i}")).collect::<Vec<_>>().join("\n");
        let d = CanonicalDate::from_ymd(2024, 6, 29).unwrap();
        let out = f.publisher.publish_at(request(d, &details), today()).await;
        assert_eq!(out, PublishOutcome::MirrorOk);

        let calls = f.store.calls();
        assert!(matches!(&calls[0], StoreCall::Create { blocks: 100, .. }));
        assert!(matches!(&calls[1], StoreCall::Append { blocks: 100, .. }));
        assert!(matches!(&calls[2], StoreCall::Append { blocks: 50, .. }));
        assert_eq!(f.store.pages()[0].blocks.len(), 250);
    }

    #[tokio::test]
    async fn append_failure_stops_batches_but_keeps_page_and_mirrors() {
        let f = fixture(RecordingMirror::new());
        f.store.fail_appends_after(1);
        let details = (0..350).map(|i| format!("- item {i}")).collect::<Vec<_>>().join("\n");
        let d = CanonicalDate::from_ymd(2024, 6, 29).unwrap();
        let out = f.publisher.publish_at(request(d, &details), today()).await;

        assert_eq!(out, PublishOutcome::MirrorOk);
        let appends = f
            .store
            .calls()
            .into_iter()
            .filter(|c| matches!(c, StoreCall::Append { .. }))
            .count();
        assert_eq!(appends, 2);
        assert_eq!(f.store.pages()[0].blocks.len(), 200);
        assert_eq!(f.notifier.count(Severity::Error), 1);
        assert_eq!(f.mirror.posts().len(), 1);
    }

    #[tokio::test]
    async fn mirror_failure_keeps_store_write() {
        let f = fixture(RecordingMirror::failing());
        let d = CanonicalDate::from_ymd(2024, 6, 29).unwrap();
        let out = f.publisher.publish_at(request(d, "## H\nbody"), today()).await;
        assert_eq!(out, PublishOutcome::MirrorFailed);
        assert!(out.stored());
        assert_eq!(f.store.pages().len(), 1);
        assert_eq!(f.notifier.count(Severity::Warn), 1);
    }

    #[tokio::test]
    async fn mirror_post_carries_category_tags_and_source() {
        let f = fixture(RecordingMirror::new());
        let mut req = request(CanonicalDate::from_ymd(2024, 6, 29).unwrap(), "body");
        req.store = StoreHandle::new(StoreKind::Vulnerabilities, "db-cve");
        f.publisher.publish_at(req, today()).await;

        let posts = f.mirror.posts();
        assert_eq!(posts[0].category, "CVE");
        assert_eq!(posts[0].tags, vec!["보안뉴스".to_string()]);
        assert_eq!(posts[0].source_url, "https://news/1");
    }
}
