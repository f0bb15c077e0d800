// src/config.rs
//! Startup configuration. Built once, then passed down explicitly.
//!
//! Secrets and ids come from the environment (optionally seeded from
//! `.env`); non-secret tuning comes from an optional TOML file:
//! 1) $AGGREGATOR_CONFIG_PATH
//! 2) config/aggregator.toml
//! 3) built-in defaults

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::digest::DigestSchedule;
use crate::ingest::providers::FeedSpec;
use crate::mirror::tistory::TistoryCredentials;

pub const ENV_CONFIG_PATH: &str = "AGGREGATOR_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/aggregator.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("{0} still holds a placeholder value")]
    Placeholder(&'static str),
    #[error("{key} is invalid: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error("reading config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config file {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// A value nobody filled in: empty, a `YOUR_...` stub, or the variable's own name.
pub fn is_placeholder(key: &str, value: &str) -> bool {
    let v = value.trim();
    v.is_empty() || v.contains("YOUR_") || v.contains(key)
}

/// RSS feeds published under one source name.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FeedGroup {
    pub name: String,
    pub category: String,
    pub feeds: Vec<FeedSpec>,
}

pub fn default_feed_groups() -> Vec<FeedGroup> {
    vec![
        FeedGroup {
            name: "보안뉴스".into(),
            category: "보안뉴스".into(),
            feeds: vec![
                FeedSpec::new("http://www.boannews.com/media/news_rss.xml?skind=5"),
                FeedSpec::new("http://www.boannews.com/media/news_rss.xml?skind=6"),
                FeedSpec::new("http://www.boannews.com/media/news_rss.xml?mkind=1").requiring("[긴급]"),
            ],
        },
        FeedGroup {
            name: "데일리시큐".into(),
            category: "데일리시큐".into(),
            feeds: vec![FeedSpec::new("https://www.dailysecu.com/rss/S1N2.xml")],
        },
        FeedGroup {
            name: "KRCERT 보안공지".into(),
            category: "KRCERT".into(),
            feeds: vec![FeedSpec::new("http://knvd.krcert.or.kr/rss/securityNotice.do")],
        },
    ]
}

/// Non-secret knobs, read from TOML.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Tuning {
    /// Items older than this are never published.
    pub max_age_days: i64,
    /// Pages older than this are archived by the sweep.
    pub retention_days: i64,
    pub nvd_enabled: bool,
    pub nvd_window_days: i64,
    /// Weekly digest slot; no digest when absent.
    pub digest: Option<DigestSchedule>,
    pub feeds: Vec<FeedGroup>,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            max_age_days: crate::publish::DEFAULT_MAX_AGE_DAYS,
            retention_days: crate::sweep::DEFAULT_RETENTION_DAYS,
            nvd_enabled: true,
            nvd_window_days: 1,
            digest: None,
            feeds: default_feed_groups(),
        }
    }
}

impl Tuning {
    pub fn from_toml_str(s: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content, path)
    }

    /// $AGGREGATOR_CONFIG_PATH, else config/aggregator.toml, else defaults.
    pub fn load_default() -> Result<Self, ConfigError> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            return Self::load_from(Path::new(&p));
        }
        let p = PathBuf::from(DEFAULT_CONFIG_PATH);
        if p.exists() {
            return Self::load_from(&p);
        }
        Ok(Self::default())
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub gemini_api_key: String,
    pub notion_api_token: String,
    pub issues_database_id: String,
    pub cve_database_id: String,
    pub slack_webhook_url: Option<String>,
    pub tistory: Option<TistoryCredentials>,
    pub webdriver_url: Option<String>,
    pub nvd_api_key: Option<String>,
    pub run_scheduler: bool,
    pub metrics_addr: Option<SocketAddr>,
    pub dry_run: bool,
    pub tuning: Tuning,
}

fn parse_bool(key: &'static str, raw: Option<String>, default: bool) -> Result<bool, ConfigError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "" => Ok(default),
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Invalid {
            key,
            reason: format!("expected a boolean, got {other:?}"),
        }),
    }
}

impl AppConfig {
    /// `.env`, tuning file, then the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let tuning = Tuning::load_default()?;
        Self::from_lookup(tuning, |k| std::env::var(k).ok())
    }

    /// Build from any key lookup.
    pub fn from_lookup<F>(tuning: Tuning, get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| -> Result<String, ConfigError> {
            let v = get(key).ok_or(ConfigError::Missing(key))?;
            if v.trim().is_empty() {
                return Err(ConfigError::Missing(key));
            }
            if is_placeholder(key, &v) {
                return Err(ConfigError::Placeholder(key));
            }
            Ok(v.trim().to_string())
        };
        let optional = |key: &'static str| -> Option<String> {
            match get(key) {
                Some(v) if !is_placeholder(key, &v) => Some(v.trim().to_string()),
                Some(v) if !v.trim().is_empty() => {
                    tracing::warn!(key, "placeholder value ignored");
                    None
                }
                _ => None,
            }
        };

        let dry_run = parse_bool("DRY_RUN", get("DRY_RUN"), false)?;
        let run_scheduler = parse_bool("RUN_SCHEDULER", get("RUN_SCHEDULER"), true)?;

        let gemini_api_key = required("GEMINI_API_KEY")?;
        let (notion_api_token, issues_database_id, cve_database_id) = if dry_run {
            (
                optional("NOTION_API_TOKEN").unwrap_or_default(),
                optional("NOTION_ISSUES_DATABASE_ID").unwrap_or_else(|| "dry-run-issues".into()),
                optional("NOTION_CVE_DATABASE_ID").unwrap_or_else(|| "dry-run-cve".into()),
            )
        } else {
            (
                required("NOTION_API_TOKEN")?,
                required("NOTION_ISSUES_DATABASE_ID")?,
                required("NOTION_CVE_DATABASE_ID")?,
            )
        };

        let tistory = match (
            optional("TISTORY_BLOG_NAME"),
            optional("TISTORY_EMAIL"),
            optional("TISTORY_PASSWORD"),
        ) {
            (Some(blog_name), Some(email), Some(password)) => Some(TistoryCredentials {
                blog_name,
                email,
                password,
            }),
            (None, None, None) => None,
            _ => {
                tracing::warn!("incomplete TISTORY_* settings; blog mirror disabled");
                None
            }
        };

        let metrics_addr = match optional("METRICS_ADDR") {
            Some(raw) => Some(raw.parse::<SocketAddr>().map_err(|e| ConfigError::Invalid {
                key: "METRICS_ADDR",
                reason: e.to_string(),
            })?),
            None => None,
        };

        Ok(Self {
            gemini_api_key,
            notion_api_token,
            issues_database_id,
            cve_database_id,
            slack_webhook_url: optional("SLACK_WEBHOOK_URL"),
            tistory,
            webdriver_url: optional("WEBDRIVER_URL"),
            nvd_api_key: optional("NVD_API_KEY"),
            run_scheduler,
            metrics_addr,
            dry_run,
            tuning,
        })
    }
}
