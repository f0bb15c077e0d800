// src/enrich/mod.rs
//! Enrichment boundary: AI-generated summaries, write-ups and reports.
//!
//! Failures are soft. An enricher never errors out; it hands back a
//! [`Enrichment::SoftFailure`] whose text is still embedded downstream so a
//! single bad call cannot stop a batch.

pub mod gemini;

use std::sync::Mutex;

pub use gemini::GeminiEnricher;

pub const REPORT_TITLE_START: &str = "[TITLE_START]";
pub const REPORT_TITLE_END: &str = "[TITLE_END]";
pub const REPORT_BODY_START: &str = "[BODY_START]";
pub const REPORT_BODY_END: &str = "[BODY_END]";

pub const TITLE_MISSING: &str = "Title missing";
pub const BODY_MISSING: &str = "Body missing";

/// Outcome of one enrichment call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enrichment {
    Ok(String),
    /// `text` is what gets published; `reason` is for logs and notifications.
    SoftFailure { text: String, reason: String },
}

impl Enrichment {
    pub fn failed(text: impl Into<String>, reason: impl Into<String>) -> Self {
        Enrichment::SoftFailure {
            text: text.into(),
            reason: reason.into(),
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Enrichment::Ok(t) => t,
            Enrichment::SoftFailure { text, .. } => text,
        }
    }

    pub fn into_text(self) -> String {
        match self {
            Enrichment::Ok(t) => t,
            Enrichment::SoftFailure { text, .. } => text,
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            Enrichment::Ok(_) => None,
            Enrichment::SoftFailure { reason, .. } => Some(reason),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Enrichment::SoftFailure { .. })
    }
}

/// Title/body pair parsed out of a report response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportDraft {
    pub title: String,
    pub body: String,
    /// Set when the call failed or a marker was missing.
    pub failure: Option<String>,
}

#[async_trait::async_trait]
pub trait Enricher: Send + Sync {
    /// Short news-style summary.
    async fn summarize(&self, text: &str) -> Enrichment;
    /// Detailed markdown write-up.
    async fn elaborate(&self, text: &str) -> Enrichment;
    /// Report with a generated title.
    async fn report(&self, text: &str) -> ReportDraft;
}

fn between<'a>(raw: &'a str, start: &str, end: &str) -> Option<&'a str> {
    let from = raw.find(start)? + start.len();
    let len = raw[from..].find(end)?;
    Some(raw[from..from + len].trim())
}

/// Extract title and body from marker-delimited model output. A missing or
/// unterminated marker yields a placeholder and flags the draft.
pub fn parse_report(raw: &str) -> ReportDraft {
    let title = between(raw, REPORT_TITLE_START, REPORT_TITLE_END);
    let body = between(raw, REPORT_BODY_START, REPORT_BODY_END);

    let mut missing = Vec::new();
    if title.is_none() {
        missing.push("title");
    }
    if body.is_none() {
        missing.push("body");
    }

    ReportDraft {
        title: title.unwrap_or(TITLE_MISSING).to_string(),
        body: body.unwrap_or(BODY_MISSING).to_string(),
        failure: (!missing.is_empty())
            .then(|| format!("report markers missing: {}", missing.join(", "))),
    }
}

/// Canned responses for tests; records every input it sees.
pub struct ScriptedEnricher {
    pub summary: Enrichment,
    pub details: Enrichment,
    pub report_raw: String,
    pub calls: Mutex<Vec<String>>,
}

impl ScriptedEnricher {
    pub fn ok(summary: &str, details: &str) -> Self {
        Self {
            summary: Enrichment::Ok(summary.to_string()),
            details: Enrichment::Ok(details.to_string()),
            report_raw: format!(
                "{REPORT_TITLE_START}Generated title{REPORT_TITLE_END}\n{REPORT_BODY_START}{details}{REPORT_BODY_END}"
            ),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_summary(mut self, summary: Enrichment) -> Self {
        self.summary = summary;
        self
    }

    pub fn with_report(mut self, raw: &str) -> Self {
        self.report_raw = raw.to_string();
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or_default()
    }

    fn record(&self, kind: &str, input: &str) {
        if let Ok(mut c) = self.calls.lock() {
            c.push(format!("{kind}:{input}"));
        }
    }
}

#[async_trait::async_trait]
impl Enricher for ScriptedEnricher {
    async fn summarize(&self, text: &str) -> Enrichment {
        self.record("summarize", text);
        self.summary.clone()
    }

    async fn elaborate(&self, text: &str) -> Enrichment {
        self.record("elaborate", text);
        self.details.clone()
    }

    async fn report(&self, text: &str) -> ReportDraft {
        self.record("report", text);
        parse_report(&self.report_raw)
    }
}
