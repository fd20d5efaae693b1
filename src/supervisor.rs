//! Fixed-size, self-healing worker pool.

use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::Config;
use crate::context::SharedContext;
use crate::shutdown::ShutdownSignal;
use crate::worker::{Worker, WorkerExit};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    Exited(WorkerExit),
    /// Panicked or was aborted.
    Crashed,
}

pub struct WorkerHandle {
    slot: usize,
    generation: u64,
    task: JoinHandle<WorkerExit>,
}

impl WorkerHandle {
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Waits for the task and classifies how it ended.
    async fn reap(self) -> WorkerState {
        match self.task.await {
            Ok(exit) => WorkerState::Exited(exit),
            Err(e) => {
                if e.is_panic() {
                    tracing::error!(worker = self.slot, generation = self.generation, "Worker panicked");
                } else {
                    tracing::warn!(worker = self.slot, generation = self.generation, "Worker was cancelled");
                }
                WorkerState::Crashed
            }
        }
    }
}

/// What one liveness pass saw.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub live: usize,
    pub exited: usize,
    pub crashed: usize,
    pub respawned: usize,
}

pub struct Supervisor {
    ctx: SharedContext,
    slots: Vec<Option<WorkerHandle>>,
    generations: Vec<u64>,
    signal: ShutdownSignal,
}

impl Supervisor {
    pub fn new(ctx: SharedContext) -> Self {
        let size = ctx.config.workers;
        let signal = ctx.shutdown.signal();
        Self {
            ctx,
            slots: (0..size).map(|_| None).collect(),
            generations: vec![0; size],
            signal,
        }
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Spawns a worker into every empty slot.
    pub fn start(&mut self) {
        for slot in 0..self.slots.len() {
            if self.slots[slot].is_none() {
                self.spawn(slot);
            }
        }
        tracing::info!(workers = self.slots.len(), "Worker pool started");
    }

    fn spawn(&mut self, slot: usize) {
        self.generations[slot] += 1;
        let worker = Worker::new(slot, std::sync::Arc::clone(&self.ctx));
        self.slots[slot] = Some(WorkerHandle {
            slot,
            generation: self.generations[slot],
            task: tokio::spawn(worker.run()),
        });
    }

    pub fn live_count(&self) -> usize {
        self.slots
            .iter()
            .flatten()
            .filter(|handle| handle.is_running())
            .count()
    }

    /// Liveness pass: reaps finished workers and, unless the stop flag is set,
    /// replaces each one with a fresh worker in the same slot.
    pub async fn poll_once(&mut self) -> PollReport {
        let mut report = PollReport::default();

        for slot in 0..self.slots.len() {
            let finished = self.slots[slot]
                .as_ref()
                .is_some_and(|handle| !handle.is_running());
            if !finished {
                continue;
            }
            let Some(handle) = self.slots[slot].take() else {
                continue;
            };

            match handle.reap().await {
                WorkerState::Crashed => report.crashed += 1,
                _ => report.exited += 1,
            }

            if !self.signal.is_raised() {
                tracing::warn!(worker = slot, "Worker exited while running, respawning");
                self.spawn(slot);
                self.ctx.metrics.worker_respawns.inc();
                report.respawned += 1;
            }
        }

        report.live = self.live_count();
        report
    }

    /// Aborts one worker as if it had crashed. Returns false for an empty slot.
    pub fn abort_worker(&self, slot: usize) -> bool {
        match self.slots.get(slot).and_then(Option::as_ref) {
            Some(handle) => {
                handle.task.abort();
                true
            }
            None => false,
        }
    }

    /// Runs the pool until the stop flag is raised, then waits for every worker.
    #[tracing::instrument(skip_all, fields(workers = self.slots.len()))]
    pub async fn run(&mut self) -> Vec<(usize, WorkerState)> {
        self.start();

        let poll_interval = self.ctx.config.poll_interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + poll_interval, poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_progress = Instant::now();
        let mut stop = self.signal.clone();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.poll_once().await;
                    if report.respawned > 0 {
                        tracing::info!(respawned = report.respawned, live = report.live, "Worker pool healed");
                    }
                    if last_progress.elapsed() >= Duration::from_secs(Config::PROGRESS_TIME_SECS) {
                        tracing::info!("{} | {}", self.ctx.metrics.snapshot(), self.ctx.frontier.stats());
                        last_progress = Instant::now();
                    }
                }
                _ = stop.raised() => break,
            }
        }

        self.drain().await
    }

    /// Waits for every worker to exit. Only call once the stop flag is set.
    pub async fn drain(&mut self) -> Vec<(usize, WorkerState)> {
        let mut states = Vec::with_capacity(self.slots.len());
        for slot in 0..self.slots.len() {
            if let Some(handle) = self.slots[slot].take() {
                states.push((slot, handle.reap().await));
            }
        }
        tracing::info!(workers = states.len(), "All workers exited");
        states
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CheckpointStore;
    use crate::collaborators::{Discoverer, PostSink, PostSource, SourceError};
    use crate::config::CrawlerConfig;
    use crate::context::{CrawlContext, DiscoveryGate};
    use crate::frontier::{CrashPolicy, Frontier};
    use crate::metrics::CrawlMetrics;
    use crate::models::{AccountId, AccountMeta, PostRecord, PostsPage};
    use crate::shutdown::{ShutdownController, ShutdownReason};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Never answers, so workers stay busy until aborted or stopped.
    struct StuckSource;

    #[async_trait]
    impl PostSource for StuckSource {
        async fn fetch_account_meta(&self, _id: &AccountId) -> Result<AccountMeta, SourceError> {
            std::future::pending().await
        }

        async fn fetch_posts_page(&self, _id: &AccountId, _page: u64) -> Result<PostsPage, SourceError> {
            std::future::pending().await
        }

        async fn fetch_full_post(&self, _post_id: &str) -> Result<Option<PostRecord>, SourceError> {
            Ok(None)
        }
    }

    struct NoDiscovery;

    #[async_trait]
    impl Discoverer for NoDiscovery {
        async fn discover_related_ids(&self, _id: &AccountId) -> Result<HashSet<AccountId>, SourceError> {
            Ok(HashSet::new())
        }
    }

    struct NullSink;

    #[async_trait]
    impl PostSink for NullSink {
        async fn persist_posts(
            &self,
            _account: &AccountId,
            _meta: &AccountMeta,
            _posts: &[PostRecord],
            _is_final: bool,
        ) -> Result<(), SourceError> {
            Ok(())
        }
    }

    fn context(dir: &TempDir, workers: usize) -> SharedContext {
        let mut config = CrawlerConfig::new("U1", "2020-01-05").unwrap();
        config.workers = workers;
        config.poll_interval = Duration::from_millis(50);
        Arc::new(CrawlContext {
            frontier: Frontier::new(CrashPolicy::Drop),
            checkpoint: Arc::new(CheckpointStore::open(dir.path()).unwrap()),
            source: Arc::new(StuckSource),
            discovery: DiscoveryGate::new(Arc::new(NoDiscovery), 1),
            sink: Arc::new(NullSink),
            metrics: Arc::new(CrawlMetrics::new()),
            shutdown: ShutdownController::new(),
            config,
        })
    }

    #[tokio::test]
    async fn test_aborted_worker_is_replaced() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, 4);
        for n in 0..8 {
            ctx.frontier.try_enqueue(AccountId::from(format!("U{}", n)));
        }

        let mut supervisor = Supervisor::new(Arc::clone(&ctx));
        supervisor.start();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(supervisor.live_count(), 4);
        assert_eq!(ctx.frontier.in_flight(), 4);

        assert!(supervisor.abort_worker(2));
        tokio::time::sleep(Duration::from_millis(20)).await;

        let report = supervisor.poll_once().await;
        assert_eq!(report.crashed, 1);
        assert_eq!(report.respawned, 1);
        assert_eq!(report.live, 4);
        assert_eq!(ctx.metrics.worker_respawns.get(), 1);

        // The aborted lease was dropped, and the replacement took the next id.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ctx.frontier.in_flight(), 4);
        assert_eq!(ctx.frontier.size(), 3);
        assert_eq!(ctx.frontier.dedup_len(), 8);

        ctx.shutdown.request(ShutdownReason::Interrupt);
        for slot in 0..4 {
            supervisor.abort_worker(slot);
        }
        let states = supervisor.drain().await;
        assert_eq!(states.len(), 4);
    }

    #[tokio::test]
    async fn test_no_respawn_after_stop() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, 2);

        let mut supervisor = Supervisor::new(Arc::clone(&ctx));
        supervisor.start();
        ctx.shutdown.request(ShutdownReason::Terminate);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let report = supervisor.poll_once().await;
        assert_eq!(report.exited, 2);
        assert_eq!(report.respawned, 0);
        assert_eq!(supervisor.live_count(), 0);
    }

    #[tokio::test]
    async fn test_run_returns_when_frontier_exhausted() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, 3);

        let mut supervisor = Supervisor::new(Arc::clone(&ctx));
        let states = tokio::time::timeout(Duration::from_secs(5), supervisor.run())
            .await
            .unwrap();

        assert_eq!(states.len(), 3);
        assert!(states
            .iter()
            .all(|(_, state)| *state == WorkerState::Exited(WorkerExit::Exhausted)));
        assert_eq!(ctx.shutdown.reason(), Some(ShutdownReason::Exhausted));
    }
}
