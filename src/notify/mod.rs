// src/notify/mod.rs
//! Operator notifications. Fire-and-forget: a failed delivery is logged
//! locally and never propagates into the pipeline.

pub mod slack;

use std::fmt;
use std::sync::Mutex;

pub use slack::SlackNotifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warn,
    Error,
    Critical,
}

impl Severity {
    pub fn tag(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// `[WARN] message` style line sent to the channel.
pub fn format_message(severity: Severity, message: &str) -> String {
    format!("[{}] {}", severity.tag(), message)
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, severity: Severity, message: &str);
}

/// Keeps every message in memory. Used by tests and dry runs.
#[derive(Default)]
pub struct RecordingNotifier {
    pub messages: Mutex<Vec<(Severity, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<(Severity, String)> {
        self.messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.snapshot()
            .iter()
            .filter(|(s, _)| *s == severity)
            .count()
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, severity: Severity, message: &str) {
        tracing::debug!(%severity, message, "recorded notification");
        if let Ok(mut m) = self.messages.lock() {
            m.push((severity, message.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_uses_severity_tag() {
        assert_eq!(format_message(Severity::Warn, "x"), "[WARN] x");
        assert_eq!(format_message(Severity::Critical, "y"), "[CRITICAL] y");
    }

    #[tokio::test]
    async fn recording_notifier_keeps_order() {
        let n = RecordingNotifier::new();
        n.notify(Severity::Info, "a").await;
        n.notify(Severity::Error, "b").await;
        let all = n.snapshot();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1], (Severity::Error, "b".to_string()));
        assert_eq!(n.count(Severity::Error), 1);
    }
}
