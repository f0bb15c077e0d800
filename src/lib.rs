// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod app;
pub mod blocks;
pub mod browser;
pub mod config;
pub mod date;
pub mod dedup;
pub mod digest;
pub mod enrich;
pub mod ingest;
pub mod mirror;
pub mod notify;
pub mod publish;
pub mod scheduler;
pub mod store;
pub mod sweep;
pub mod telemetry;

// ---- Re-exports for stable public API ----
pub use crate::config::{AppConfig, ConfigError, Tuning};
pub use crate::ingest::{Candidate, EnrichMode, Pipeline, SourceAdapter};
pub use crate::notify::{Notifier, Severity};
pub use crate::publish::{PublishOutcome, PublishRequest, Publisher};
pub use crate::store::{KnowledgeStore, StoreHandle, StoreKind};
