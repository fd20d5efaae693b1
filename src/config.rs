// Defaults live in `Config`; the validated runtime settings live in `CrawlerConfig`.

use chrono::NaiveDate;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::frontier::CrashPolicy;
use crate::models::AccountId;

pub struct Config;

impl Config {
    // Discovery and supervision
    pub const BACKPRESSURE_THRESHOLD: usize = 20;
    pub const POLL_INTERVAL_SECS: u64 = 10;
    pub const DISCOVERY_CONCURRENCY: usize = 1;
    pub const MAX_DEFAULT_WORKERS: usize = 8;

    // Pacing: pause 6-10s after every 1-5 page fetches
    pub const PAUSE_EVERY_PAGES_MIN: u32 = 1;
    pub const PAUSE_EVERY_PAGES_MAX: u32 = 5;
    pub const PAUSE_SECS_MIN: u64 = 6;
    pub const PAUSE_SECS_MAX: u64 = 10;
    pub const PAUSE_TICK_MS: u64 = 250;

    // Timeline paging
    pub const POSTS_PER_PAGE: u64 = 10;
    pub const FLUSH_EVERY_PAGES: u64 = 20;
    pub const MIN_PAGES: u64 = 3;

    // Progress reporting
    pub const PROGRESS_INTERVAL: u64 = 25;
    pub const PROGRESS_TIME_SECS: u64 = 60;

    // HTTP
    pub const USER_AGENT: &'static str = "Mozilla/5.0 (compatible; FollowCrawler/0.1)";
    pub const TIMEOUT_SECS: u64 = 20;
    pub const MAX_CONTENT_SIZE: usize = 10 * 1024 * 1024;
    pub const MAX_RETRIES: u32 = 2;
    pub const RETRY_BACKOFF_MS: u64 = 500;

    /// Available parallelism minus one, at least one, capped.
    pub fn default_workers() -> usize {
        num_cpus::get()
            .saturating_sub(1)
            .clamp(1, Self::MAX_DEFAULT_WORKERS)
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid seed account id: {0:?}")]
    InvalidSeed(String),

    #[error("Invalid since-date {0:?}, expected YYYY-MM-DD")]
    InvalidSinceDate(String),

    #[error("{0} must be positive")]
    NotPositive(&'static str),

    #[error("{name} range is inverted: {min} > {max}")]
    InvertedRange {
        name: &'static str,
        min: u64,
        max: u64,
    },
}

/// Inclusive bounds for a randomized draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds<T> {
    pub min: T,
    pub max: T,
}

impl<T> Bounds<T> {
    pub const fn new(min: T, max: T) -> Self {
        Self { min, max }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingConfig {
    /// Number of page fetches between pauses.
    pub pages_between_pauses: Bounds<u32>,
    pub pause: Bounds<Duration>,
    /// Granularity at which a pause observes the stop flag.
    pub tick: Duration,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            pages_between_pauses: Bounds::new(
                Config::PAUSE_EVERY_PAGES_MIN,
                Config::PAUSE_EVERY_PAGES_MAX,
            ),
            pause: Bounds::new(
                Duration::from_secs(Config::PAUSE_SECS_MIN),
                Duration::from_secs(Config::PAUSE_SECS_MAX),
            ),
            tick: Duration::from_millis(Config::PAUSE_TICK_MS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    pub seed: AccountId,
    /// Posts strictly older than this date end an account's crawl.
    pub since_date: NaiveDate,
    /// Keep retweets whose original is unavailable.
    pub crawl_all: bool,
    pub workers: usize,
    pub backpressure_threshold: usize,
    pub pacing: PacingConfig,
    pub poll_interval: Duration,
    pub posts_per_page: u64,
    pub flush_every_pages: u64,
    /// Accounts with fewer pages are treated as fake and not crawled.
    pub min_pages: u64,
    pub discovery_concurrency: usize,
    /// Put an account back on the frontier when its worker crashed mid-crawl.
    pub requeue_crashed: bool,
    pub output_dir: PathBuf,
    pub user_agent: String,
    pub timeout_secs: u64,
}

impl CrawlerConfig {
    /// Parses the two free-form inputs; everything else starts at its default.
    pub fn new(seed: &str, since_date: &str) -> Result<Self, ConfigError> {
        let seed = AccountId::parse(seed).ok_or_else(|| ConfigError::InvalidSeed(seed.to_string()))?;
        let since_date = parse_since_date(since_date)?;

        Ok(Self {
            seed,
            since_date,
            crawl_all: false,
            workers: Config::default_workers(),
            backpressure_threshold: Config::BACKPRESSURE_THRESHOLD,
            pacing: PacingConfig::default(),
            poll_interval: Duration::from_secs(Config::POLL_INTERVAL_SECS),
            posts_per_page: Config::POSTS_PER_PAGE,
            flush_every_pages: Config::FLUSH_EVERY_PAGES,
            min_pages: Config::MIN_PAGES,
            discovery_concurrency: Config::DISCOVERY_CONCURRENCY,
            requeue_crashed: false,
            output_dir: PathBuf::from("./data"),
            user_agent: Config::USER_AGENT.to_string(),
            timeout_secs: Config::TIMEOUT_SECS,
        })
    }

    pub fn crash_policy(&self) -> CrashPolicy {
        if self.requeue_crashed {
            CrashPolicy::Requeue
        } else {
            CrashPolicy::Drop
        }
    }

    /// Rejects settings that would make the pool misbehave. Runs before any worker starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::NotPositive("workers"));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::NotPositive("poll interval"));
        }
        if self.posts_per_page == 0 {
            return Err(ConfigError::NotPositive("posts per page"));
        }
        if self.flush_every_pages == 0 {
            return Err(ConfigError::NotPositive("flush interval"));
        }
        if self.discovery_concurrency == 0 {
            return Err(ConfigError::NotPositive("discovery concurrency"));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::NotPositive("timeout"));
        }
        if self.pacing.tick.is_zero() {
            return Err(ConfigError::NotPositive("pause tick"));
        }

        let pages = self.pacing.pages_between_pauses;
        if pages.min == 0 {
            return Err(ConfigError::NotPositive("pages between pauses"));
        }
        if pages.min > pages.max {
            return Err(ConfigError::InvertedRange {
                name: "pages between pauses",
                min: pages.min as u64,
                max: pages.max as u64,
            });
        }

        let pause = self.pacing.pause;
        if pause.min > pause.max {
            return Err(ConfigError::InvertedRange {
                name: "pause",
                min: pause.min.as_millis() as u64,
                max: pause.max.as_millis() as u64,
            });
        }

        Ok(())
    }
}

pub fn parse_since_date(raw: &str) -> Result<NaiveDate, ConfigError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| ConfigError::InvalidSinceDate(raw.to_string()))
}
