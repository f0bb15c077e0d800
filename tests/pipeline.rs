// tests/pipeline.rs
use std::sync::Arc;

use chrono::{Duration, Local};
use security_news_aggregator::dedup::DedupGate;
use security_news_aggregator::enrich::{Enrichment, ScriptedEnricher};
use security_news_aggregator::ingest::{Candidate, EnrichMode, ItemOutcome, Pipeline, SkipReason};
use security_news_aggregator::mirror::RecordingMirror;
use security_news_aggregator::notify::{RecordingNotifier, Severity};
use security_news_aggregator::publish::{PublishOutcome, Publisher};
use security_news_aggregator::store::{MemoryStore, StoreHandle, StoreKind};

struct Rig {
    store: Arc<MemoryStore>,
    enricher: Arc<ScriptedEnricher>,
    mirror: Arc<RecordingMirror>,
    notifier: Arc<RecordingNotifier>,
    pipeline: Pipeline,
}

fn rig(enricher: ScriptedEnricher) -> Rig {
    let store = Arc::new(MemoryStore::new());
    let enricher = Arc::new(enricher);
    let mirror = Arc::new(RecordingMirror::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let publisher = Publisher::new(store.clone(), mirror.clone(), notifier.clone());
    let pipeline = Pipeline::new(
        DedupGate::new(store.clone(), notifier.clone()),
        enricher.clone(),
        publisher,
        notifier.clone(),
    );
    Rig {
        store,
        enricher,
        mirror,
        notifier,
        pipeline,
    }
}

fn issues() -> StoreHandle {
    StoreHandle::new(StoreKind::Issues, "db-issues")
}

fn yesterday_rfc2822() -> String {
    (Local::now() - Duration::days(1))
        .format("%a, %d %b %Y %H:%M:%S %z")
        .to_string()
}

fn news(url: &str) -> Candidate {
    Candidate::new("랜섬웨어 주의보", Some(url.to_string()), "보안뉴스")
        .content("A new ransomware strain targets NAS devices.")
        .raw_date(Some(yesterday_rfc2822()))
}

#[tokio::test]
async fn new_item_is_stored_and_mirrored_once() {
    let r = rig(ScriptedEnricher::ok("짧은 요약", "## 상세\n- 항목"));
    let out = r.pipeline.process("보안뉴스", news("https://n/1"), &issues()).await;
    assert_eq!(out, ItemOutcome::Published(PublishOutcome::MirrorOk));

    let pages = r.store.pages();
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0].summary, "짧은 요약");
    assert_eq!(pages[0].url, "https://n/1");
    assert_eq!(pages[0].category, "보안뉴스");

    let posts = r.mirror.posts();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].category, "보안이슈");
    assert!(posts[0].html.contains("<h2>상세</h2>"));
}

#[tokio::test]
async fn duplicate_url_skips_before_any_enrichment() {
    let r = rig(ScriptedEnricher::ok("s", "d"));
    let first = r.pipeline.process("보안뉴스", news("https://n/dup"), &issues()).await;
    assert!(matches!(first, ItemOutcome::Published(_)));
    let calls_after_first = r.enricher.call_count();

    let second = r
        .pipeline
        .process("보안뉴스", news("  https://n/dup "), &issues())
        .await;
    assert_eq!(second, ItemOutcome::Skipped(SkipReason::Duplicate));
    assert_eq!(r.enricher.call_count(), calls_after_first);
    assert_eq!(r.store.create_calls(), 1);
    assert_eq!(r.mirror.posts().len(), 1);
}

#[tokio::test]
async fn same_url_in_other_collection_is_not_a_duplicate() {
    let r = rig(ScriptedEnricher::ok("s", "d"));
    r.pipeline.process("a", news("https://n/x"), &issues()).await;
    let cves = StoreHandle::new(StoreKind::Vulnerabilities, "db-cve");
    let out = r.pipeline.process("b", news("https://n/x"), &cves).await;
    assert!(matches!(out, ItemOutcome::Published(_)));
    assert_eq!(r.store.pages().len(), 2);
}

#[tokio::test]
async fn failed_lookup_is_skipped_not_published() {
    let r = rig(ScriptedEnricher::ok("s", "d"));
    r.store.fail_queries(true);
    let out = r.pipeline.process("보안뉴스", news("https://n/2"), &issues()).await;
    assert_eq!(out, ItemOutcome::Skipped(SkipReason::DedupUnknown));
    assert_eq!(r.store.create_calls(), 0);
    assert_eq!(r.enricher.call_count(), 0);
    assert_eq!(r.notifier.count(Severity::Error), 1);
}

#[tokio::test]
async fn missing_url_and_bad_date_are_skipped_quietly() {
    let r = rig(ScriptedEnricher::ok("s", "d"));
    let no_url = Candidate::new("t", None, "c").raw_date(Some(yesterday_rfc2822()));
    assert_eq!(
        r.pipeline.process("src", no_url, &issues()).await,
        ItemOutcome::Skipped(SkipReason::MissingUrl)
    );

    let bad_date = news("https://n/3").raw_date(Some("sometime last week".into()));
    assert_eq!(
        r.pipeline.process("src", bad_date, &issues()).await,
        ItemOutcome::Skipped(SkipReason::BadDate)
    );
    assert!(r.store.calls().is_empty());
    assert!(r.notifier.snapshot().is_empty());
}

#[tokio::test]
async fn title_marker_filters_non_matching_items() {
    let r = rig(ScriptedEnricher::ok("s", "d"));
    let plain = news("https://n/4").require_title_marker(Some("[긴급]".into()));
    assert_eq!(
        r.pipeline.process("src", plain, &issues()).await,
        ItemOutcome::Skipped(SkipReason::TitleFiltered)
    );

    let urgent = Candidate::new("[긴급] 제로데이 패치", Some("https://n/5".into()), "보안뉴스")
        .raw_date(Some(yesterday_rfc2822()))
        .require_title_marker(Some("[긴급]".into()));
    assert!(matches!(
        r.pipeline.process("src", urgent, &issues()).await,
        ItemOutcome::Published(_)
    ));
}

#[tokio::test]
async fn soft_failure_text_is_published_and_flagged() {
    let r = rig(
        ScriptedEnricher::ok("unused", "d")
            .with_summary(Enrichment::failed("Summary failed (API error)", "HTTP 500")),
    );
    r.pipeline.process("보안뉴스", news("https://n/6"), &issues()).await;

    let pages = r.store.pages();
    assert_eq!(pages[0].summary, "Summary failed (API error)");
    let warns: Vec<_> = r
        .notifier
        .snapshot()
        .into_iter()
        .filter(|(s, _)| *s == Severity::Warn)
        .collect();
    assert_eq!(warns.len(), 1);
    assert!(warns[0].1.contains("HTTP 500"));
}

#[tokio::test]
async fn report_mode_builds_title_from_generated_report() {
    let r = rig(ScriptedEnricher::ok("cve summary", "### Impact\nRCE"));
    let cves = StoreHandle::new(StoreKind::Vulnerabilities, "db-cve");
    let c = Candidate::new("CVE-2024-0001", Some("https://nvd/1".into()), "CVE")
        .content("CVE-2024-0001\nBuffer overflow")
        .raw_date(Some(
            (Local::now() - Duration::days(2))
                .format("%Y-%m-%dT%H:%M:%S%.3f")
                .to_string(),
        ))
        .enrich(EnrichMode::Report {
            title_prefix: "CVE-2024-0001".into(),
        });
    r.pipeline.process("NVD", c, &cves).await;

    let pages = r.store.pages();
    assert_eq!(pages[0].title, "CVE-2024-0001 Generated title");
    assert_eq!(r.mirror.posts()[0].category, "CVE");
}

#[tokio::test]
async fn fixed_mode_never_calls_the_enricher() {
    let r = rig(ScriptedEnricher::ok("s", "d"));
    let c = news("https://n/7").enrich(EnrichMode::Fixed {
        summary: "template summary".into(),
        details: "template details".into(),
    });
    r.pipeline.process("NCSC", c, &issues()).await;
    assert_eq!(r.enricher.call_count(), 0);
    assert_eq!(r.store.pages()[0].summary, "template summary");
}
