// src/scheduler.rs
//! Batch runner: every task in order, once now and then at the top of each hour.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Local, TimeZone, Timelike};
use metrics::{gauge, histogram};

use crate::digest::{DigestOutcome, DigestSchedule, WeeklyDigest};
use crate::ingest::{ensure_metrics_described, Pipeline, SourceAdapter};
use crate::notify::{Notifier, Severity};
use crate::store::StoreHandle;
use crate::sweep::RetentionSweeper;

pub const DEFAULT_TASK_PAUSE: Duration = Duration::from_secs(1);

/// One step of a batch. An `Err` is reported and the batch moves on.
#[async_trait::async_trait]
pub trait Task: Send + Sync {
    fn name(&self) -> &str;
    /// Source tasks are paced against each other; maintenance tasks are not.
    fn is_source(&self) -> bool {
        false
    }
    async fn run(&self, batch_started: DateTime<Local>) -> Result<()>;
}

/// Runs one source adapter through the shared pipeline.
pub struct AdapterTask {
    adapter: Box<dyn SourceAdapter>,
    pipeline: Arc<Pipeline>,
}

impl AdapterTask {
    pub fn new(adapter: Box<dyn SourceAdapter>, pipeline: Arc<Pipeline>) -> Self {
        Self { adapter, pipeline }
    }
}

#[async_trait::async_trait]
impl Task for AdapterTask {
    fn name(&self) -> &str {
        self.adapter.name()
    }

    fn is_source(&self) -> bool {
        true
    }

    async fn run(&self, _batch_started: DateTime<Local>) -> Result<()> {
        let report = self.adapter.run(&self.pipeline).await?;
        tracing::info!(
            source = self.adapter.name(),
            store = %self.adapter.store().kind,
            seen = report.seen,
            stored = report.stored,
            skipped = report.skipped,
            failed = report.failed,
            "source finished"
        );
        Ok(())
    }
}

pub struct SweepTask {
    name: String,
    sweeper: Arc<RetentionSweeper>,
    store: StoreHandle,
}

impl SweepTask {
    pub fn new(sweeper: Arc<RetentionSweeper>, store: StoreHandle) -> Self {
        Self {
            name: format!("retention sweep ({})", store.kind),
            sweeper,
            store,
        }
    }
}

#[async_trait::async_trait]
impl Task for SweepTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _batch_started: DateTime<Local>) -> Result<()> {
        self.sweeper.sweep(&self.store).await;
        Ok(())
    }
}

/// Weekly digest for one collection; only runs in the scheduled hour.
pub struct DigestTask {
    name: String,
    digest: Arc<WeeklyDigest>,
    pipeline: Arc<Pipeline>,
    store: StoreHandle,
    schedule: DigestSchedule,
}

impl DigestTask {
    pub fn new(
        digest: Arc<WeeklyDigest>,
        pipeline: Arc<Pipeline>,
        store: StoreHandle,
        schedule: DigestSchedule,
    ) -> Self {
        Self {
            name: format!("weekly digest ({})", store.kind),
            digest,
            pipeline,
            store,
            schedule,
        }
    }
}

#[async_trait::async_trait]
impl Task for DigestTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, batch_started: DateTime<Local>) -> Result<()> {
        if !self.schedule.is_due(&batch_started) {
            tracing::debug!(store = %self.store.kind, "digest not due");
            return Ok(());
        }
        let out = self
            .digest
            .run(&self.store, self.pipeline.publisher())
            .await;
        tracing::info!(store = %self.store.kind, outcome = ?out, "digest finished");
        if out == DigestOutcome::QueryFailed {
            anyhow::bail!("digest could not read recent entries");
        }
        Ok(())
    }
}

/// Time left until the next top of the hour (a full hour when exactly on it).
pub fn until_next_hour<Tz: TimeZone>(now: &DateTime<Tz>) -> Duration {
    let into_hour = u64::from(now.minute() * 60 + now.second());
    let nanos = u64::from(now.nanosecond().min(999_999_999));
    Duration::from_secs(3600 - into_hour) - Duration::from_nanos(nanos)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub tasks: usize,
    pub failed: usize,
}

pub struct Runner {
    tasks: Vec<Box<dyn Task>>,
    notifier: Arc<dyn Notifier>,
    pause: Duration,
}

impl Runner {
    pub fn new(tasks: Vec<Box<dyn Task>>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            tasks,
            notifier,
            pause: DEFAULT_TASK_PAUSE,
        }
    }

    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.name()).collect()
    }

    /// Run every task once, in order. Task failures never stop the batch.
    pub async fn run_batch(&self) -> BatchSummary {
        ensure_metrics_described();
        let started = Local::now();
        let t0 = Instant::now();
        self.notifier
            .notify(
                Severity::Info,
                &format!("Security news batch started ({} tasks)", self.tasks.len()),
            )
            .await;

        let mut failed = 0usize;
        for (i, task) in self.tasks.iter().enumerate() {
            let t = Instant::now();
            tracing::info!(task = task.name(), "task started");
            match task.run(started).await {
                Ok(()) => {
                    tracing::info!(task = task.name(), secs = t.elapsed().as_secs_f64(), "task done")
                }
                Err(e) => {
                    failed += 1;
                    tracing::error!(task = task.name(), error = ?e, "task failed");
                    self.notifier
                        .notify(
                            Severity::Critical,
                            &format!("Task '{}' failed: {e:#}", task.name()),
                        )
                        .await;
                }
            }
            let next_is_source = self.tasks.get(i + 1).is_some_and(|n| n.is_source());
            if task.is_source() && next_is_source {
                tokio::time::sleep(self.pause).await;
            }
        }

        let secs = t0.elapsed().as_secs_f64();
        histogram!("aggregator_batch_seconds").record(secs);
        gauge!("aggregator_last_batch_ts").set(chrono::Utc::now().timestamp() as f64);
        self.notifier
            .notify(
                Severity::Info,
                &format!("Security news batch finished in {secs:.1}s ({failed} failed tasks)"),
            )
            .await;
        BatchSummary {
            tasks: self.tasks.len(),
            failed,
        }
    }

    /// Batch now; with `repeat`, again at every top of the hour until Ctrl-C.
    pub async fn run_forever(&self, repeat: bool) {
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        let mut first = true;
        loop {
            if !first {
                let wait = until_next_hour(&Local::now());
                tracing::info!(secs = wait.as_secs(), "waiting for next batch");
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = &mut shutdown => break,
                }
            }
            first = false;

            tokio::select! {
                _ = self.run_batch() => {}
                _ = &mut shutdown => break,
            }
            if !repeat {
                tracing::info!("scheduler disabled; single batch done");
                return;
            }
        }

        tracing::info!("interrupted; scheduler stopping");
        self.notifier
            .notify(Severity::Info, "Security news scheduler stopped by user.")
            .await;
    }
}
