use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Latency buckets in milliseconds.
#[derive(Debug, Clone)]
pub struct Histogram {
    buckets: Vec<(u64, u64)>,
    sum_ms: u64,
    count: u64,
}

impl Histogram {
    pub fn new() -> Self {
        Self {
            buckets: vec![
                (50, 0),
                (100, 0),
                (250, 0),
                (500, 0),
                (1000, 0),
                (2500, 0),
                (5000, 0),
                (u64::MAX, 0),
            ],
            sum_ms: 0,
            count: 0,
        }
    }

    pub fn observe(&mut self, value_ms: u64) {
        self.sum_ms += value_ms;
        self.count += 1;

        for (threshold, count) in &mut self.buckets {
            if value_ms <= *threshold {
                *count += 1;
                break;
            }
        }
    }

    pub fn mean_ms(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.sum_ms / self.count
        }
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

// Lock-free counter shared by all workers
#[derive(Debug)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self { value: AtomicU64::new(0) }
    }

    /// Returns the value before the increment.
    pub fn inc(&self) -> u64 {
        self.value.fetch_add(1, Ordering::Relaxed)
    }

    pub fn add(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}

pub struct CrawlMetrics {
    started: Instant,
    pub page_latency: Mutex<Histogram>,

    pub accounts_crawled: Counter,
    pub accounts_skipped: Counter,
    pub accounts_failed: Counter,
    pub accounts_interrupted: Counter,
    pub pages_fetched: Counter,
    pub posts_stored: Counter,
    pub ids_discovered: Counter,
    pub discovery_skipped: Counter,
    pub worker_respawns: Counter,
}

impl CrawlMetrics {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            page_latency: Mutex::new(Histogram::new()),
            accounts_crawled: Counter::new(),
            accounts_skipped: Counter::new(),
            accounts_failed: Counter::new(),
            accounts_interrupted: Counter::new(),
            pages_fetched: Counter::new(),
            posts_stored: Counter::new(),
            ids_discovered: Counter::new(),
            discovery_skipped: Counter::new(),
            worker_respawns: Counter::new(),
        }
    }

    pub fn record_page(&self, latency: Duration) {
        self.pages_fetched.inc();
        self.page_latency.lock().observe(latency.as_millis() as u64);
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            elapsed: self.elapsed(),
            accounts_crawled: self.accounts_crawled.get(),
            accounts_skipped: self.accounts_skipped.get(),
            accounts_failed: self.accounts_failed.get(),
            accounts_interrupted: self.accounts_interrupted.get(),
            pages_fetched: self.pages_fetched.get(),
            posts_stored: self.posts_stored.get(),
            ids_discovered: self.ids_discovered.get(),
            discovery_skipped: self.discovery_skipped.get(),
            worker_respawns: self.worker_respawns.get(),
            mean_page_ms: self.page_latency.lock().mean_ms(),
        }
    }
}

impl Default for CrawlMetrics {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedMetrics = Arc<CrawlMetrics>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub elapsed: Duration,
    pub accounts_crawled: u64,
    pub accounts_skipped: u64,
    pub accounts_failed: u64,
    pub accounts_interrupted: u64,
    pub pages_fetched: u64,
    pub posts_stored: u64,
    pub ids_discovered: u64,
    pub discovery_skipped: u64,
    pub worker_respawns: u64,
    pub mean_page_ms: u64,
}

impl MetricsSnapshot {
    pub fn accounts_per_minute(&self) -> f64 {
        let minutes = self.elapsed.as_secs_f64() / 60.0;
        if minutes > 0.0 {
            self.accounts_crawled as f64 / minutes
        } else {
            0.0
        }
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Crawled {} accounts ({:.1}/min), {} posts over {} pages (avg {}ms), {} discovered, {} skipped, {} failed, {} respawns",
            self.accounts_crawled,
            self.accounts_per_minute(),
            self.posts_stored,
            self.pages_fetched,
            self.mean_page_ms,
            self.ids_discovered,
            self.accounts_skipped,
            self.accounts_failed,
            self.worker_respawns
        )
    }
}
