//! In-memory collaborators shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use follow_crawler::config::{Bounds, CrawlerConfig, PacingConfig};
use follow_crawler::{
    AccountId, AccountMeta, Discoverer, PostKind, PostRecord, PostSink, PostSource, PostsPage,
    SourceError,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

pub fn id(raw: &str) -> AccountId {
    AccountId::from(raw)
}

pub fn post(post_id: &str, date: &str) -> PostRecord {
    PostRecord {
        id: post_id.to_string(),
        author_id: None,
        author_name: None,
        text: format!("post {}", post_id),
        created_at: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
        source: None,
        location: None,
        likes: 0,
        comments: 0,
        reposts: 0,
        topics: Vec::new(),
        mentions: Vec::new(),
        pinned: false,
        truncated: false,
        kind: PostKind::Original,
    }
}

/// Config with pacing switched off and fast polling, writing under `dir`.
pub fn quick_config(dir: &Path, seed: &str, since: &str, workers: usize) -> CrawlerConfig {
    let mut config = CrawlerConfig::new(seed, since).unwrap();
    config.workers = workers;
    config.min_pages = 1;
    config.poll_interval = Duration::from_millis(20);
    config.output_dir = dir.to_path_buf();
    config.pacing = PacingConfig {
        pages_between_pauses: Bounds::new(1, 1),
        pause: Bounds::new(Duration::ZERO, Duration::ZERO),
        tick: Duration::from_millis(5),
    };
    config
}

#[derive(Default)]
struct Timeline {
    total_posts: u64,
    pages: HashMap<u64, Vec<PostRecord>>,
}

/// Serves scripted timelines. Unknown accounts have one page with one fresh post.
#[derive(Default)]
pub struct ScriptedSource {
    timelines: HashMap<AccountId, Timeline>,
    panic_once: Option<AccountId>,
    panicked: AtomicBool,
    failing_page: Option<(AccountId, u64)>,
    meta_calls: Mutex<Vec<AccountId>>,
    pages_fetched: AtomicUsize,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeline(mut self, account: &str, total_posts: u64, pages: Vec<Vec<PostRecord>>) -> Self {
        let pages = pages
            .into_iter()
            .enumerate()
            .map(|(n, posts)| (n as u64 + 1, posts))
            .collect();
        self.timelines.insert(id(account), Timeline { total_posts, pages });
        self
    }

    /// The first profile fetch for `account` panics the calling worker.
    pub fn panicking_once(mut self, account: &str) -> Self {
        self.panic_once = Some(id(account));
        self
    }

    /// Fetching `page` of `account` returns a network error every time.
    pub fn failing_page(mut self, account: &str, page: u64) -> Self {
        self.failing_page = Some((id(account), page));
        self
    }

    pub fn meta_calls(&self) -> Vec<AccountId> {
        self.meta_calls.lock().clone()
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PostSource for ScriptedSource {
    async fn fetch_account_meta(&self, account: &AccountId) -> Result<AccountMeta, SourceError> {
        self.meta_calls.lock().push(account.clone());
        if self.panic_once.as_ref() == Some(account) && !self.panicked.swap(true, Ordering::SeqCst) {
            panic!("scripted failure for {}", account);
        }
        let total_post_count = self.timelines.get(account).map_or(1, |t| t.total_posts);
        Ok(AccountMeta {
            display_name: format!("name-{}", account),
            total_post_count,
        })
    }

    async fn fetch_posts_page(&self, account: &AccountId, page: u64) -> Result<PostsPage, SourceError> {
        self.pages_fetched.fetch_add(1, Ordering::SeqCst);
        if let Some((failing, failing_page)) = &self.failing_page
            && failing == account
            && *failing_page == page
        {
            return Err(SourceError::Network(format!("page {} of {} timed out", page, account)));
        }
        let posts = match self.timelines.get(account) {
            Some(timeline) => timeline.pages.get(&page).cloned().unwrap_or_default(),
            None => vec![post(&format!("{}-1", account), "2030-01-01")],
        };
        Ok(PostsPage {
            end_of_data: posts.is_empty(),
            posts,
        })
    }

    async fn fetch_full_post(&self, _post_id: &str) -> Result<Option<PostRecord>, SourceError> {
        Ok(None)
    }
}

/// Related accounts from a fixed adjacency list.
#[derive(Default)]
pub struct GraphDiscoverer {
    edges: HashMap<AccountId, HashSet<AccountId>>,
    failing: HashSet<AccountId>,
    closed: AtomicBool,
}

impl GraphDiscoverer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn edge(mut self, from: &str, to: &[&str]) -> Self {
        self.edges.insert(id(from), to.iter().map(|t| id(t)).collect());
        self
    }

    /// Discovery for `account` fails with an unavailable session.
    pub fn failing_on(mut self, account: &str) -> Self {
        self.failing.insert(id(account));
        self
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Discoverer for GraphDiscoverer {
    async fn discover_related_ids(&self, account: &AccountId) -> Result<HashSet<AccountId>, SourceError> {
        if self.failing.contains(account) {
            return Err(SourceError::SessionUnavailable("browser session lost".to_string()));
        }
        Ok(self.edges.get(account).cloned().unwrap_or_default())
    }

    async fn close(&self) -> Result<(), SourceError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Flush {
    pub account: AccountId,
    pub post_ids: Vec<String>,
    pub is_final: bool,
}

#[derive(Default)]
pub struct RecordingSink {
    flushes: Mutex<Vec<Flush>>,
}

impl RecordingSink {
    pub fn flushes(&self) -> Vec<Flush> {
        self.flushes.lock().clone()
    }

    pub fn final_flushes(&self, account: &str) -> usize {
        let account = id(account);
        self.flushes
            .lock()
            .iter()
            .filter(|f| f.account == account && f.is_final)
            .count()
    }
}

#[async_trait]
impl PostSink for RecordingSink {
    async fn persist_posts(
        &self,
        account: &AccountId,
        _meta: &AccountMeta,
        posts: &[PostRecord],
        is_final: bool,
    ) -> Result<(), SourceError> {
        self.flushes.lock().push(Flush {
            account: account.clone(),
            post_ids: posts.iter().map(|p| p.id.clone()).collect(),
            is_final,
        });
        Ok(())
    }
}
