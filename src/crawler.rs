use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::checkpoint::{CheckpointError, CheckpointStore, RunStats};
use crate::collaborators::{Discoverer, PostSink, PostSource};
use crate::config::{ConfigError, CrawlerConfig};
use crate::context::{CrawlContext, DiscoveryGate, SharedContext};
use crate::frontier::Frontier;
use crate::metrics::{CrawlMetrics, MetricsSnapshot};
use crate::shutdown::{ShutdownController, ShutdownReason};
use crate::supervisor::{Supervisor, WorkerState};

#[derive(Error, Debug)]
pub enum CrawlerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
}

/// Summary of one process run.
#[derive(Debug, Clone)]
pub struct CrawlReport {
    pub reason: Option<ShutdownReason>,
    pub elapsed: Duration,
    pub metrics: MetricsSnapshot,
    /// Ids written to the pending record.
    pub pending: usize,
    /// Size of the dedup set at shutdown.
    pub seen: usize,
    pub crashed_workers: usize,
    /// Cumulative totals including this run.
    pub run_log: RunStats,
}

impl std::fmt::Display for CrawlReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = self
            .reason
            .map_or_else(|| "unknown".to_string(), |reason| reason.to_string());
        writeln!(f, "Stopped after {:.1}s ({})", self.elapsed.as_secs_f64(), reason)?;
        writeln!(f, "{}", self.metrics)?;
        writeln!(f, "Pending: {} | Seen: {}", self.pending, self.seen)?;
        write!(f, "Run log: {}", self.run_log)
    }
}

pub struct Crawler {
    ctx: SharedContext,
}

impl Crawler {
    /// Validates the configuration and opens the checkpoint store. No worker runs yet.
    pub fn new(
        config: CrawlerConfig,
        source: Arc<dyn PostSource>,
        discoverer: Arc<dyn Discoverer>,
        sink: Arc<dyn PostSink>,
    ) -> Result<Self, CrawlerError> {
        config.validate()?;
        let checkpoint = CheckpointStore::open(&config.output_dir)?;

        let ctx = CrawlContext {
            frontier: Frontier::new(config.crash_policy()),
            checkpoint: Arc::new(checkpoint),
            source,
            discovery: DiscoveryGate::new(discoverer, config.discovery_concurrency),
            sink,
            metrics: Arc::new(CrawlMetrics::new()),
            shutdown: ShutdownController::new(),
            config,
        };

        Ok(Self { ctx: Arc::new(ctx) })
    }

    pub fn shutdown_handle(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.ctx.shutdown)
    }

    pub fn context(&self) -> &SharedContext {
        &self.ctx
    }

    /// Restores the checkpoint, runs the pool until stopped or out of work, then
    /// persists the pending queue, dedup set and run log and releases the discoverer.
    #[tracing::instrument(skip_all, fields(seed = %self.ctx.config.seed, workers = self.ctx.config.workers))]
    pub async fn run(&self) -> Result<CrawlReport, CrawlerError> {
        let ctx = &self.ctx;
        let loaded = ctx.checkpoint.load()?;
        let done = loaded.done.len();
        let queued = ctx
            .frontier
            .restore(loaded.done.into_iter().chain(loaded.seen), loaded.pending);

        if loaded.first_run {
            tracing::info!("First run, seeding frontier");
            ctx.frontier.seed(ctx.config.seed.clone());
        } else {
            tracing::info!(
                done,
                queued,
                previous_runs = loaded.run_log.number_of_run,
                "Resuming from checkpoint"
            );
        }

        let started = Instant::now();
        let mut supervisor = Supervisor::new(Arc::clone(ctx));
        let states = supervisor.run().await;
        let elapsed = started.elapsed();
        let crashed_workers = states
            .iter()
            .filter(|(_, state)| *state == WorkerState::Crashed)
            .count();

        let pending = ctx.frontier.drain();
        let seen = ctx.frontier.snapshot().seen;
        let mut run_log = loaded.run_log;
        run_log.accumulate(elapsed, ctx.metrics.accounts_crawled.get());
        ctx.checkpoint.save(&pending, &seen, &run_log)?;
        tracing::info!(pending = pending.len(), seen = seen.len(), %run_log, "Checkpoint written");

        if let Err(e) = ctx.discovery.close().await {
            tracing::warn!(error = %e, "Failed to release discovery session");
        }
        ctx.shutdown.mark_stopped();

        Ok(CrawlReport {
            reason: ctx.shutdown.reason(),
            elapsed,
            metrics: ctx.metrics.snapshot(),
            pending: pending.len(),
            seen: seen.len(),
            crashed_workers,
            run_log,
        })
    }
}
