// src/ingest/mod.rs
pub mod providers;
pub mod types;

use std::sync::Arc;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

use crate::date;
use crate::dedup::{DedupGate, DedupStatus};
use crate::enrich::{Enricher, Enrichment};
use crate::notify::{Notifier, Severity};
use crate::publish::{PublishOutcome, PublishRequest, Publisher};
use crate::store::StoreHandle;

pub use types::{AdapterReport, Candidate, EnrichMode, SourceAdapter};

/// One-time metrics registration (so series show up on the scrape endpoint).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("aggregator_items_seen_total", "Candidates read from sources.");
        describe_counter!(
            "aggregator_items_duplicate_total",
            "Candidates already present in their collection."
        );
        describe_counter!(
            "aggregator_items_published_total",
            "Pages created in the knowledge store."
        );
        describe_counter!(
            "aggregator_items_skipped_total",
            "Candidates skipped (missing url, bad date, filtered, too old, unknown dedup)."
        );
        describe_counter!(
            "aggregator_store_errors_total",
            "Knowledge store calls that failed."
        );
        describe_counter!("aggregator_mirror_errors_total", "Blog mirror posts that failed.");
        describe_counter!(
            "aggregator_enrichment_soft_failures_total",
            "Enrichment calls that returned a soft failure."
        );
        describe_counter!(
            "aggregator_archived_total",
            "Pages archived by the retention sweep."
        );
        describe_counter!("aggregator_source_errors_total", "Feed fetch/parse errors.");
        describe_histogram!("aggregator_feed_parse_ms", "Feed parse time in milliseconds.");
        describe_histogram!("aggregator_batch_seconds", "Duration of one full batch.");
        describe_gauge!(
            "aggregator_last_batch_ts",
            "Unix ts when the last batch finished."
        );
    });
}

/// Normalize feed text: decode entities, strip tags, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Non-breaking spaces survive the decode; fold them into plain spaces
    out = out.replace('\u{00A0}', " ");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    re_ws.replace_all(&out, " ").trim().to_string()
}

/// Why a candidate did not reach the publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MissingUrl,
    BadDate,
    TitleFiltered,
    Duplicate,
    DedupUnknown,
}

impl SkipReason {
    fn label(&self) -> &'static str {
        match self {
            SkipReason::MissingUrl => "missing_url",
            SkipReason::BadDate => "bad_date",
            SkipReason::TitleFiltered => "title_filtered",
            SkipReason::Duplicate => "duplicate",
            SkipReason::DedupUnknown => "dedup_unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Skipped(SkipReason),
    Published(PublishOutcome),
}

/// Drives one candidate through normalize, dedup, enrich and publish.
pub struct Pipeline {
    gate: DedupGate,
    enricher: Arc<dyn Enricher>,
    publisher: Publisher,
    notifier: Arc<dyn Notifier>,
}

impl Pipeline {
    pub fn new(
        gate: DedupGate,
        enricher: Arc<dyn Enricher>,
        publisher: Publisher,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            gate,
            enricher,
            publisher,
            notifier,
        }
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    pub fn enricher(&self) -> &Arc<dyn Enricher> {
        &self.enricher
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    fn skip(&self, source: &str, title: &str, reason: SkipReason) -> ItemOutcome {
        tracing::debug!(source, title, reason = reason.label(), "candidate skipped");
        if reason != SkipReason::Duplicate {
            counter!("aggregator_items_skipped_total", "reason" => reason.label()).increment(1);
        }
        ItemOutcome::Skipped(reason)
    }

    async fn flag_soft_failure(&self, source: &str, title: &str, what: &str, e: &Enrichment) {
        if let Some(reason) = e.failure_reason() {
            tracing::warn!(source, title, call = what, reason, "enrichment soft failure");
            self.notifier
                .notify(
                    Severity::Warn,
                    &format!(
                        "{source} '{title}': {what} enrichment failed ({reason}); publishing with: {}",
                        e.text()
                    ),
                )
                .await;
        }
    }

    /// Process one candidate for `store`. Never fails; every outcome is
    /// logged and, where it matters, notified.
    pub async fn process(&self, source: &str, c: Candidate, store: &StoreHandle) -> ItemOutcome {
        counter!("aggregator_items_seen_total", "source" => source.to_string()).increment(1);

        let url = match c.url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            Some(u) => u.to_string(),
            None => return self.skip(source, &c.title, SkipReason::MissingUrl),
        };

        let Some(posting_date) = c.raw_date.as_deref().and_then(date::normalize) else {
            tracing::info!(source, title = %c.title, raw_date = ?c.raw_date, "unparseable date");
            return self.skip(source, &c.title, SkipReason::BadDate);
        };

        if let Some(marker) = &c.required_title_marker {
            if !c.title.contains(marker.as_str()) {
                return self.skip(source, &c.title, SkipReason::TitleFiltered);
            }
        }

        match self.gate.check(&url, store).await {
            DedupStatus::New => {}
            DedupStatus::Duplicate => return self.skip(source, &c.title, SkipReason::Duplicate),
            DedupStatus::Unknown => return self.skip(source, &c.title, SkipReason::DedupUnknown),
        }

        tracing::info!(source, title = %c.title, %url, "new item");
        let (title, summary, details) = match c.enrich {
            EnrichMode::Generate => {
                let summary = self.enricher.summarize(&c.content).await;
                let details = self.enricher.elaborate(&c.content).await;
                self.flag_soft_failure(source, &c.title, "summary", &summary)
                    .await;
                self.flag_soft_failure(source, &c.title, "details", &details)
                    .await;
                (c.title, summary.into_text(), details.into_text())
            }
            EnrichMode::Report { title_prefix } => {
                let summary = self.enricher.summarize(&c.content).await;
                self.flag_soft_failure(source, &c.title, "summary", &summary)
                    .await;
                let report = self.enricher.report(&c.content).await;
                if let Some(reason) = &report.failure {
                    let flagged = Enrichment::failed(report.body.clone(), reason.clone());
                    self.flag_soft_failure(source, &c.title, "report", &flagged)
                        .await;
                }
                let title = format!("{title_prefix} {}", report.title);
                (title, summary.into_text(), report.body)
            }
            EnrichMode::Fixed { summary, details } => (c.title, summary, details),
        };

        let outcome = self
            .publisher
            .publish(PublishRequest {
                title,
                summary,
                source_url: url,
                posting_date,
                category: c.category,
                details_markdown: details,
                store: store.clone(),
            })
            .await;
        ItemOutcome::Published(outcome)
    }
}
