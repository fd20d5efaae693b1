//! One worker drains the frontier an account at a time: profile header, timeline
//! pages down to the since-date, incremental flushes, then discovery of related
//! accounts and the done record.

use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Instant;

use crate::collaborators::SourceError;
use crate::config::Config;
use crate::context::SharedContext;
use crate::frontier::Lease;
use crate::models::{AccountId, AccountMeta, PostKind, PostRecord};
use crate::pacer::{Pace, Pacer};
use crate::shutdown::{ShutdownReason, ShutdownSignal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// The stop flag was observed.
    Stopped,
    /// The frontier ran dry with nothing in flight.
    Exhausted,
}

/// Result of one turn of the worker loop.
#[derive(Debug)]
pub enum Step {
    Processed {
        account: AccountId,
        outcome: AccountOutcome,
    },
    Stopped,
    Exhausted,
}

#[derive(Debug)]
pub enum AccountOutcome {
    Crawled {
        posts: u64,
        pages: u64,
        reached_cutoff: bool,
    },
    /// Too few pages to be a real account; posts not crawled.
    SkippedFake { pages: u64 },
    /// Stop flag seen mid-crawl; the account went back to the frontier.
    Interrupted { posts: u64 },
    /// A collaborator failed; whatever was collected was flushed.
    Failed { posts: u64, error: SourceError },
}

impl AccountOutcome {
    pub fn is_done(&self) -> bool {
        !matches!(self, AccountOutcome::Interrupted { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admit {
    Keep,
    /// Older than the cutoff but pinned, so outside the timeline order.
    SkipPinned,
    Stop,
}

/// Per-account paging state.
#[derive(Debug)]
pub struct CrawlCursor {
    since: NaiveDate,
    pending: Vec<PostRecord>,
    stored: u64,
    pages: u64,
    reached_cutoff: bool,
}

impl CrawlCursor {
    pub fn new(since: NaiveDate) -> Self {
        Self {
            since,
            pending: Vec::new(),
            stored: 0,
            pages: 0,
            reached_cutoff: false,
        }
    }

    /// Posts strictly older than the cutoff end the crawl unless pinned.
    pub fn admit(&self, post: &PostRecord) -> Admit {
        if post.created_at >= self.since {
            Admit::Keep
        } else if post.pinned {
            Admit::SkipPinned
        } else {
            Admit::Stop
        }
    }

    pub fn collected(&self) -> u64 {
        self.stored + self.pending.len() as u64
    }

    fn take_pending(&mut self) -> Vec<PostRecord> {
        let batch = std::mem::take(&mut self.pending);
        self.stored += batch.len() as u64;
        batch
    }
}

/// Originals and retweets carrying their original are always kept; a retweet whose
/// original is gone only in crawl-all mode.
pub fn should_retain(post: &PostRecord, crawl_all: bool) -> bool {
    crawl_all
        || match &post.kind {
            PostKind::Original => true,
            PostKind::Retweet { original } => original.is_some(),
        }
}

enum PagesEnd {
    Completed,
    Interrupted,
}

pub struct Worker {
    slot: usize,
    ctx: SharedContext,
    pacer: Pacer,
    signal: ShutdownSignal,
}

impl Worker {
    pub fn new(slot: usize, ctx: SharedContext) -> Self {
        let pacer = Pacer::new(ctx.config.pacing);
        Self::with_pacer(slot, ctx, pacer)
    }

    pub fn with_pacer(slot: usize, ctx: SharedContext, pacer: Pacer) -> Self {
        let signal = ctx.shutdown.signal();
        Self {
            slot,
            ctx,
            pacer,
            signal,
        }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub async fn run(mut self) -> WorkerExit {
        tracing::debug!(worker = self.slot, "Worker started");
        loop {
            match self.step().await {
                Step::Processed { .. } => {}
                Step::Stopped => {
                    tracing::debug!(worker = self.slot, "Worker observed stop flag");
                    return WorkerExit::Stopped;
                }
                Step::Exhausted => {
                    tracing::info!(worker = self.slot, "Frontier exhausted");
                    self.ctx.shutdown.request(ShutdownReason::Exhausted);
                    return WorkerExit::Exhausted;
                }
            }
        }
    }

    /// Takes one account off the frontier and processes it to completion.
    pub async fn step(&mut self) -> Step {
        let frontier = Arc::clone(&self.ctx.frontier);
        let Some(lease) = frontier.dequeue(&mut self.signal).await else {
            return if frontier.is_exhausted() {
                Step::Exhausted
            } else {
                Step::Stopped
            };
        };

        let account = lease.id().clone();
        let outcome = self.process(lease).await;
        Step::Processed { account, outcome }
    }

    #[tracing::instrument(name = "account", skip_all, fields(worker = self.slot, account = %lease.id()))]
    async fn process(&mut self, lease: Lease) -> AccountOutcome {
        let id = lease.id().clone();
        let outcome = self.crawl_account(&id).await;
        let metrics = &self.ctx.metrics;

        match &outcome {
            AccountOutcome::Interrupted { posts } => {
                tracing::info!(posts, "Crawl interrupted, returning account to the frontier");
                metrics.accounts_interrupted.inc();
                lease.release_for_resume();
                return outcome;
            }
            AccountOutcome::Crawled {
                posts,
                pages,
                reached_cutoff,
            } => {
                tracing::info!(posts, pages, reached_cutoff, "Account crawled");
            }
            AccountOutcome::SkippedFake { pages } => {
                tracing::info!(pages, "Too few pages, skipping posts of likely fake account");
                metrics.accounts_skipped.inc();
            }
            AccountOutcome::Failed { posts, error } => {
                tracing::warn!(posts, error = %error, "Account finished best-effort after error");
                metrics.accounts_failed.inc();
            }
        }

        self.discover(&id).await;

        if let Err(e) = self.ctx.checkpoint.append_done(&id).await {
            tracing::error!(error = %e, "Failed to record completed account");
        }
        lease.complete();

        let crawled = metrics.accounts_crawled.inc() + 1;
        if crawled % Config::PROGRESS_INTERVAL == 0 {
            tracing::info!("{} | {}", metrics.snapshot(), self.ctx.frontier.stats());
        }

        outcome
    }

    async fn crawl_account(&mut self, id: &AccountId) -> AccountOutcome {
        let meta = match self.ctx.source.fetch_account_meta(id).await {
            Ok(meta) => meta,
            Err(error) => return AccountOutcome::Failed { posts: 0, error },
        };

        let pages = meta.page_count(self.ctx.config.posts_per_page);
        if pages < self.ctx.config.min_pages {
            return AccountOutcome::SkippedFake { pages };
        }
        tracing::debug!(name = %meta.display_name, total_posts = meta.total_post_count, pages, "Crawling timeline");

        let mut cursor = CrawlCursor::new(self.ctx.config.since_date);
        let result = self.crawl_pages(id, &meta, pages, &mut cursor).await;

        let is_final = !matches!(result, Ok(PagesEnd::Interrupted));
        let flushed = self.flush(id, &meta, &mut cursor, is_final).await;
        let posts = cursor.collected();

        match (result, flushed) {
            (Err(error), _) | (Ok(_), Err(error)) => AccountOutcome::Failed { posts, error },
            (Ok(PagesEnd::Interrupted), Ok(())) => AccountOutcome::Interrupted { posts },
            (Ok(PagesEnd::Completed), Ok(())) => AccountOutcome::Crawled {
                posts,
                pages: cursor.pages,
                reached_cutoff: cursor.reached_cutoff,
            },
        }
    }

    async fn crawl_pages(
        &mut self,
        id: &AccountId,
        meta: &AccountMeta,
        pages: u64,
        cursor: &mut CrawlCursor,
    ) -> Result<PagesEnd, SourceError> {
        let flush_every = self.ctx.config.flush_every_pages;

        for page in 1..=pages {
            if self.signal.is_raised() {
                return Ok(PagesEnd::Interrupted);
            }

            let started = Instant::now();
            let fetched = self.ctx.source.fetch_posts_page(id, page).await?;
            self.ctx.metrics.record_page(started.elapsed());
            cursor.pages = page;

            let hit_cutoff = self.absorb(cursor, fetched.posts).await?;
            if hit_cutoff || fetched.end_of_data || page == pages {
                break;
            }

            if page % flush_every == 0 {
                self.flush(id, meta, cursor, false).await?;
            }

            if self.pacer.after_page(&mut self.signal).await == Pace::Interrupted {
                return Ok(PagesEnd::Interrupted);
            }
        }

        Ok(PagesEnd::Completed)
    }

    /// Applies the cutoff and retention rules to one page. Returns true at the cutoff.
    async fn absorb(
        &self,
        cursor: &mut CrawlCursor,
        posts: Vec<PostRecord>,
    ) -> Result<bool, SourceError> {
        for mut post in posts {
            match cursor.admit(&post) {
                Admit::Keep => {}
                Admit::SkipPinned => continue,
                Admit::Stop => {
                    cursor.reached_cutoff = true;
                    return Ok(true);
                }
            }
            if !should_retain(&post, self.ctx.config.crawl_all) {
                continue;
            }
            self.complete_truncated(&mut post).await?;
            cursor.pending.push(post);
        }
        Ok(false)
    }

    async fn complete_truncated(&self, post: &mut PostRecord) -> Result<(), SourceError> {
        if post.truncated {
            if let Some(full) = self.ctx.source.fetch_full_post(&post.id).await? {
                merge_full_text(post, full);
            }
        }
        if let Some(original) = post.retweeted_mut()
            && original.truncated
            && let Some(full) = self.ctx.source.fetch_full_post(&original.id).await?
        {
            merge_full_text(original, full);
        }
        Ok(())
    }

    async fn flush(
        &self,
        id: &AccountId,
        meta: &AccountMeta,
        cursor: &mut CrawlCursor,
        is_final: bool,
    ) -> Result<(), SourceError> {
        if cursor.pending.is_empty() && !is_final {
            return Ok(());
        }
        let batch = cursor.take_pending();
        self.ctx.sink.persist_posts(id, meta, &batch, is_final).await?;
        self.ctx.metrics.posts_stored.add(batch.len() as u64);
        tracing::debug!(flushed = batch.len(), is_final, "Flushed posts");
        Ok(())
    }

    async fn discover(&self, id: &AccountId) {
        let frontier = &self.ctx.frontier;
        if !frontier.accepts_discovery(self.ctx.config.backpressure_threshold) {
            tracing::debug!(queued = frontier.size(), "Frontier above threshold, skipping discovery");
            self.ctx.metrics.discovery_skipped.inc();
            return;
        }

        let candidates = match self.ctx.discovery.discover(id).await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!(error = %e, "Discovery failed");
                return;
            }
        };

        let mut candidates: Vec<_> = candidates.into_iter().filter(|c| c != id).collect();
        candidates.sort();
        let found = candidates.len();
        let admitted = candidates
            .into_iter()
            .filter(|candidate| frontier.try_enqueue(candidate.clone()))
            .count();

        self.ctx.metrics.ids_discovered.add(admitted as u64);
        tracing::debug!(found, admitted, "Discovered related accounts");
    }
}

fn merge_full_text(post: &mut PostRecord, full: PostRecord) {
    post.text = full.text;
    post.topics = full.topics;
    post.mentions = full.mentions;
    if full.location.is_some() {
        post.location = full.location;
    }
    post.truncated = false;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CheckpointStore;
    use crate::collaborators::{Discoverer, PostSink, PostSource};
    use crate::config::{Bounds, CrawlerConfig, PacingConfig};
    use crate::context::{CrawlContext, DiscoveryGate};
    use crate::frontier::{CrashPolicy, Frontier};
    use crate::metrics::CrawlMetrics;
    use crate::models::PostsPage;
    use crate::models::fixtures::post;
    use crate::shutdown::ShutdownController;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::{HashMap, HashSet};
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Default)]
    struct PagedSource {
        pages: HashMap<u64, Vec<PostRecord>>,
        total_posts: u64,
        full: HashMap<String, PostRecord>,
        fetched_pages: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl PostSource for PagedSource {
        async fn fetch_account_meta(&self, _id: &AccountId) -> Result<AccountMeta, SourceError> {
            Ok(AccountMeta {
                display_name: "fake".to_string(),
                total_post_count: self.total_posts,
            })
        }

        async fn fetch_posts_page(&self, _id: &AccountId, page: u64) -> Result<PostsPage, SourceError> {
            self.fetched_pages.lock().push(page);
            Ok(PostsPage {
                posts: self.pages.get(&page).cloned().unwrap_or_default(),
                end_of_data: false,
            })
        }

        async fn fetch_full_post(&self, post_id: &str) -> Result<Option<PostRecord>, SourceError> {
            Ok(self.full.get(post_id).cloned())
        }
    }

    struct FixedDiscoverer(HashSet<AccountId>);

    #[async_trait]
    impl Discoverer for FixedDiscoverer {
        async fn discover_related_ids(&self, _id: &AccountId) -> Result<HashSet<AccountId>, SourceError> {
            Ok(self.0.clone())
        }
    }

    #[derive(Default)]
    struct MemorySink {
        posts: Mutex<Vec<PostRecord>>,
        finals: Mutex<u32>,
    }

    #[async_trait]
    impl PostSink for MemorySink {
        async fn persist_posts(
            &self,
            _account: &AccountId,
            _meta: &AccountMeta,
            posts: &[PostRecord],
            is_final: bool,
        ) -> Result<(), SourceError> {
            self.posts.lock().extend_from_slice(posts);
            if is_final {
                *self.finals.lock() += 1;
            }
            Ok(())
        }
    }

    fn context(
        dir: &TempDir,
        source: PagedSource,
        related: &[&str],
        sink: Arc<MemorySink>,
    ) -> SharedContext {
        context_with(dir, source, related, sink, |_| {})
    }

    fn context_with(
        dir: &TempDir,
        source: PagedSource,
        related: &[&str],
        sink: Arc<MemorySink>,
        configure: impl FnOnce(&mut CrawlerConfig),
    ) -> SharedContext {
        let mut config = CrawlerConfig::new("U1", "2020-01-05").unwrap();
        config.min_pages = 1;
        config.pacing = PacingConfig {
            pages_between_pauses: Bounds::new(1, 1),
            pause: Bounds::new(Duration::ZERO, Duration::ZERO),
            tick: Duration::from_millis(1),
        };
        configure(&mut config);

        let discoverer = FixedDiscoverer(related.iter().map(|r| AccountId::from(*r)).collect());
        Arc::new(CrawlContext {
            frontier: Frontier::new(CrashPolicy::Drop),
            checkpoint: Arc::new(CheckpointStore::open(dir.path()).unwrap()),
            source: Arc::new(source),
            discovery: DiscoveryGate::new(Arc::new(discoverer), 1),
            sink,
            metrics: Arc::new(CrawlMetrics::new()),
            shutdown: ShutdownController::new(),
            config,
        })
    }

    fn dated(raw: &[&str]) -> Vec<PostRecord> {
        raw.iter()
            .enumerate()
            .map(|(n, date)| post(&n.to_string(), date))
            .collect()
    }

    #[test]
    fn test_cursor_admit() {
        let cursor = CrawlCursor::new(NaiveDate::from_ymd_opt(2020, 1, 5).unwrap());
        assert_eq!(cursor.admit(&post("a", "2020-01-05")), Admit::Keep);
        assert_eq!(cursor.admit(&post("b", "2020-01-04")), Admit::Stop);

        let mut pinned = post("c", "2019-01-01");
        pinned.pinned = true;
        assert_eq!(cursor.admit(&pinned), Admit::SkipPinned);
    }

    #[test]
    fn test_retention() {
        let original = post("1", "2020-01-10");
        let mut bare_retweet = post("2", "2020-01-10");
        bare_retweet.kind = PostKind::Retweet { original: None };
        let mut full_retweet = post("3", "2020-01-10");
        full_retweet.kind = PostKind::Retweet {
            original: Some(Box::new(post("4", "2019-01-01"))),
        };

        assert!(should_retain(&original, false));
        assert!(should_retain(&full_retweet, false));
        assert!(!should_retain(&bare_retweet, false));
        assert!(should_retain(&bare_retweet, true));
    }

    #[tokio::test]
    async fn test_cutoff_stops_pagination() {
        let dir = TempDir::new().unwrap();
        let source = PagedSource {
            pages: HashMap::from([(1, dated(&["2020-01-10", "2020-01-07", "2020-01-03"]))]),
            total_posts: 30,
            ..Default::default()
        };
        let sink = Arc::new(MemorySink::default());
        let ctx = context(&dir, source, &[], sink.clone());
        ctx.frontier.seed(AccountId::from("U1"));

        let mut worker = Worker::new(0, Arc::clone(&ctx));
        let Step::Processed { outcome, .. } = worker.step().await else {
            panic!("expected a processed account");
        };

        assert!(matches!(
            outcome,
            AccountOutcome::Crawled { posts: 2, pages: 1, reached_cutoff: true }
        ));
        let kept: Vec<_> = sink.posts.lock().iter().map(|p| p.created_at.to_string()).collect();
        assert_eq!(kept, vec!["2020-01-10", "2020-01-07"]);
        assert_eq!(*sink.finals.lock(), 1);
    }

    #[tokio::test]
    async fn test_pinned_old_post_is_skipped() {
        let dir = TempDir::new().unwrap();
        let mut first = dated(&["2020-01-10", "2020-01-07", "2020-01-03"]);
        first[2].pinned = true;
        let source = PagedSource {
            pages: HashMap::from([(1, first), (2, dated(&["2020-01-06", "2020-01-01"]))]),
            total_posts: 30,
            ..Default::default()
        };
        let sink = Arc::new(MemorySink::default());
        let ctx = context(&dir, source, &[], sink.clone());
        ctx.frontier.seed(AccountId::from("U1"));

        let mut worker = Worker::new(0, Arc::clone(&ctx));
        worker.step().await;

        let kept: Vec<_> = sink.posts.lock().iter().map(|p| p.created_at.to_string()).collect();
        assert_eq!(kept, vec!["2020-01-10", "2020-01-07", "2020-01-06"]);
    }

    #[tokio::test]
    async fn test_truncated_post_is_completed() {
        let dir = TempDir::new().unwrap();
        let mut short = post("7", "2020-02-01");
        short.truncated = true;
        short.text = "prefix...".to_string();
        let mut full = post("7", "2020-02-01");
        full.text = "the whole text".to_string();
        full.topics = vec!["topic".to_string()];

        let source = PagedSource {
            pages: HashMap::from([(1, vec![short])]),
            total_posts: 1,
            full: HashMap::from([("7".to_string(), full)]),
            ..Default::default()
        };
        let sink = Arc::new(MemorySink::default());
        let ctx = context(&dir, source, &[], sink.clone());
        ctx.frontier.seed(AccountId::from("U1"));

        Worker::new(0, Arc::clone(&ctx)).step().await;

        let stored = sink.posts.lock();
        assert_eq!(stored[0].text, "the whole text");
        assert_eq!(stored[0].topics, vec!["topic".to_string()]);
        assert!(!stored[0].truncated);
    }

    #[tokio::test]
    async fn test_discovery_enqueues_and_records_done() {
        let dir = TempDir::new().unwrap();
        let source = PagedSource {
            total_posts: 0,
            ..Default::default()
        };
        let sink = Arc::new(MemorySink::default());
        let ctx = context(&dir, source, &["U1", "U2", "U3", "U4"], sink);
        ctx.frontier.seed(AccountId::from("U1"));

        let mut worker = Worker::new(0, Arc::clone(&ctx));
        worker.step().await;

        let snapshot = ctx.frontier.snapshot();
        assert_eq!(
            snapshot.pending,
            vec![AccountId::from("U2"), AccountId::from("U3"), AccountId::from("U4")]
        );
        assert_eq!(snapshot.seen.len(), 4);
        assert_eq!(ctx.checkpoint.load().unwrap().done, vec![AccountId::from("U1")]);
        assert_eq!(ctx.metrics.ids_discovered.get(), 3);
    }

    #[tokio::test]
    async fn test_backpressure_skips_discovery() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(MemorySink::default());
        let ctx = context(&dir, PagedSource::default(), &["NEW"], sink);
        ctx.frontier.seed(AccountId::from("U1"));
        for n in 0..25 {
            ctx.frontier.try_enqueue(AccountId::from(format!("Q{}", n)));
        }

        Worker::new(0, Arc::clone(&ctx)).step().await;

        assert!(!ctx.frontier.contains(&AccountId::from("NEW")));
        assert_eq!(ctx.metrics.discovery_skipped.get(), 1);
    }

    #[tokio::test]
    async fn test_fake_account_skipped_but_completed() {
        let dir = TempDir::new().unwrap();
        let source = PagedSource {
            total_posts: 5,
            ..Default::default()
        };
        let sink = Arc::new(MemorySink::default());
        let ctx = context_with(&dir, source, &["U2"], sink, |config| config.min_pages = 3);
        ctx.frontier.seed(AccountId::from("U1"));

        let mut worker = Worker::new(0, Arc::clone(&ctx));
        let Step::Processed { outcome, .. } = worker.step().await else {
            panic!("expected a processed account");
        };

        assert!(matches!(outcome, AccountOutcome::SkippedFake { pages: 1 }));
        assert!(ctx.frontier.contains(&AccountId::from("U2")));
        assert_eq!(ctx.checkpoint.load().unwrap().done, vec![AccountId::from("U1")]);
    }

    #[tokio::test]
    async fn test_run_reports_exhaustion() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(MemorySink::default());
        let ctx = context(&dir, PagedSource::default(), &[], sink);
        ctx.frontier.seed(AccountId::from("U1"));

        let exit = Worker::new(0, Arc::clone(&ctx)).run().await;
        assert_eq!(exit, WorkerExit::Exhausted);
        assert_eq!(ctx.shutdown.reason(), Some(ShutdownReason::Exhausted));
        assert_eq!(ctx.metrics.accounts_crawled.get(), 1);
    }
}
