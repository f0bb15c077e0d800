// src/app.rs
//! Wiring: turns an [`AppConfig`] into the ordered task list.

use std::sync::Arc;

use anyhow::Result;

use crate::config::AppConfig;
use crate::dedup::DedupGate;
use crate::digest::WeeklyDigest;
use crate::enrich::{Enricher, GeminiEnricher};
use crate::ingest::providers::{NcscBoardAdapter, NvdAdapter, RssAdapter};
use crate::ingest::{Pipeline, SourceAdapter};
use crate::mirror::{BlogMirror, DisabledMirror, TistoryMirror};
use crate::notify::{Notifier, SlackNotifier};
use crate::publish::Publisher;
use crate::scheduler::{AdapterTask, DigestTask, Runner, SweepTask, Task};
use crate::store::{KnowledgeStore, MemoryStore, NotionStore, StoreHandle, StoreKind};
use crate::sweep::RetentionSweeper;

/// External capabilities; swapped for fakes in tests.
pub struct Capabilities {
    pub store: Arc<dyn KnowledgeStore>,
    pub enricher: Arc<dyn Enricher>,
    pub mirror: Arc<dyn BlogMirror>,
    pub notifier: Arc<dyn Notifier>,
}

impl Capabilities {
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        let store: Arc<dyn KnowledgeStore> = if cfg.dry_run {
            tracing::warn!("DRY_RUN: pages are kept in memory only");
            Arc::new(MemoryStore::new())
        } else {
            Arc::new(NotionStore::new(cfg.notion_api_token.clone()))
        };

        let mirror: Arc<dyn BlogMirror> = match (&cfg.tistory, &cfg.webdriver_url, cfg.dry_run) {
            (Some(creds), Some(driver), false) => {
                Arc::new(TistoryMirror::new(driver.clone(), creds.clone()))
            }
            (Some(_), None, false) => {
                tracing::warn!("TISTORY_* set without WEBDRIVER_URL; blog mirror disabled");
                Arc::new(DisabledMirror)
            }
            _ => Arc::new(DisabledMirror),
        };

        Ok(Self {
            store,
            enricher: Arc::new(GeminiEnricher::new(cfg.gemini_api_key.clone())?),
            mirror,
            notifier: Arc::new(SlackNotifier::new(cfg.slack_webhook_url.clone())),
        })
    }
}

/// Source adapters in batch order: RSS groups, NVD, then the NCSC board.
pub fn source_adapters(cfg: &AppConfig) -> Result<Vec<Box<dyn SourceAdapter>>> {
    let issues = StoreHandle::new(StoreKind::Issues, cfg.issues_database_id.clone());
    let cves = StoreHandle::new(StoreKind::Vulnerabilities, cfg.cve_database_id.clone());

    let mut adapters: Vec<Box<dyn SourceAdapter>> = Vec::new();
    for group in &cfg.tuning.feeds {
        adapters.push(Box::new(RssAdapter::new(
            group.name.clone(),
            group.category.clone(),
            issues.clone(),
            group.feeds.clone(),
        )?));
    }
    if cfg.tuning.nvd_enabled {
        adapters.push(Box::new(NvdAdapter::new(
            cves,
            cfg.nvd_api_key.clone(),
            cfg.tuning.nvd_window_days,
        )?));
    }
    match &cfg.webdriver_url {
        Some(driver) => adapters.push(Box::new(NcscBoardAdapter::new(driver.clone(), issues))),
        None => tracing::info!("WEBDRIVER_URL not set; NCSC board adapter disabled"),
    }
    Ok(adapters)
}

/// Full task list: adapters, one sweep per collection, then digests.
pub fn build_runner(
    cfg: &AppConfig,
    caps: Capabilities,
    adapters: Vec<Box<dyn SourceAdapter>>,
) -> Runner {
    let publisher = Publisher::new(caps.store.clone(), caps.mirror.clone(), caps.notifier.clone())
        .with_max_age_days(cfg.tuning.max_age_days);
    let pipeline = Arc::new(Pipeline::new(
        DedupGate::new(caps.store.clone(), caps.notifier.clone()),
        caps.enricher.clone(),
        publisher,
        caps.notifier.clone(),
    ));

    let mut tasks: Vec<Box<dyn Task>> = adapters
        .into_iter()
        .map(|a| Box::new(AdapterTask::new(a, pipeline.clone())) as Box<dyn Task>)
        .collect();

    let handles = [
        StoreHandle::new(StoreKind::Issues, cfg.issues_database_id.clone()),
        StoreHandle::new(StoreKind::Vulnerabilities, cfg.cve_database_id.clone()),
    ];
    let sweeper = Arc::new(
        RetentionSweeper::new(caps.store.clone(), caps.notifier.clone())
            .with_retention_days(cfg.tuning.retention_days),
    );
    for h in &handles {
        tasks.push(Box::new(SweepTask::new(sweeper.clone(), h.clone())));
    }

    if let Some(schedule) = cfg.tuning.digest {
        let digest = Arc::new(WeeklyDigest::new(
            caps.store.clone(),
            caps.enricher.clone(),
            caps.notifier.clone(),
        ));
        for h in handles {
            tasks.push(Box::new(DigestTask::new(
                digest.clone(),
                pipeline.clone(),
                h,
                schedule,
            )));
        }
    }

    Runner::new(tasks, caps.notifier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Tuning;
    use crate::digest::DigestSchedule;
    use crate::enrich::ScriptedEnricher;
    use crate::mirror::RecordingMirror;
    use crate::notify::RecordingNotifier;

    fn cfg(pairs: &[(&str, &str)], tuning: Tuning) -> AppConfig {
        let pairs: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(tuning, move |k| {
            pairs.iter().find(|(pk, _)| pk == k).map(|(_, v)| v.clone())
        })
        .unwrap()
    }

    fn fakes() -> Capabilities {
        Capabilities {
            store: Arc::new(MemoryStore::new()),
            enricher: Arc::new(ScriptedEnricher::ok("s", "d")),
            mirror: Arc::new(RecordingMirror::new()),
            notifier: Arc::new(RecordingNotifier::new()),
        }
    }

    #[test]
    fn task_order_matches_batch_contract() {
        let c = cfg(
            &[("GEMINI_API_KEY", "g"), ("DRY_RUN", "true"), ("WEBDRIVER_URL", "http://wd:4444")],
            Tuning::default(),
        );
        let adapters = source_adapters(&c).unwrap();
        let runner = build_runner(&c, fakes(), adapters);
        assert_eq!(
            runner.task_names(),
            vec![
                "보안뉴스",
                "데일리시큐",
                "KRCERT 보안공지",
                "NVD",
                "NCSC 보안공지",
                "retention sweep (issues)",
                "retention sweep (vulnerabilities)",
            ]
        );
    }

    #[test]
    fn browser_adapter_needs_webdriver_and_digest_is_opt_in() {
        let tuning = Tuning {
            nvd_enabled: false,
            digest: Some(DigestSchedule {
                weekday: chrono::Weekday::Mon,
                hour: 9,
            }),
            ..Tuning::default()
        };
        let c = cfg(&[("GEMINI_API_KEY", "g"), ("DRY_RUN", "1")], tuning);
        let adapters = source_adapters(&c).unwrap();
        let names: Vec<_> = adapters.iter().map(|a| a.name().to_string()).collect();
        assert!(!names.iter().any(|n| n.starts_with("NCSC") || n == "NVD"));

        let runner = build_runner(&c, fakes(), adapters);
        assert!(runner
            .task_names()
            .iter()
            .any(|n| *n == "weekly digest (issues)"));
    }

    #[test]
    fn adapters_declare_their_collection() {
        let c = cfg(&[("GEMINI_API_KEY", "g"), ("DRY_RUN", "1")], Tuning::default());
        for a in source_adapters(&c).unwrap() {
            let expected = if a.name() == "NVD" {
                StoreKind::Vulnerabilities
            } else {
                StoreKind::Issues
            };
            assert_eq!(a.store().kind, expected, "{}", a.name());
        }
    }
}
