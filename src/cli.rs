use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{Bounds, Config, ConfigError, CrawlerConfig};

/// Command line for the follow-graph crawler.
/// Exit codes: 0=success, 2=invalid arguments or configuration, 3=I/O or checkpoint error
#[derive(Parser, Debug)]
#[command(name = "follow_crawler")]
#[command(about = "Resumable crawler for a social follow graph")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Crawl from the seed account, or resume if the data directory holds a checkpoint.
    Crawl(CrawlArgs),

    /// Print the run log and checkpoint sizes without crawling.
    Stats {
        #[arg(
            short,
            long,
            default_value = "./data",
            help = "Directory containing crawl state"
        )]
        data_dir: PathBuf,
    },
}

#[derive(Args, Debug, Clone)]
pub struct CrawlArgs {
    #[arg(short = 'u', long, help = "Seed account id, crawled first on a fresh run")]
    pub seed: String,

    #[arg(
        short,
        long,
        help = "Earliest post date to keep, YYYY-MM-DD; older posts end an account's crawl"
    )]
    pub since_date: String,

    #[arg(long, help = "Also keep retweets whose original post is unavailable")]
    pub crawl_all: bool,

    #[arg(
        short,
        long,
        default_value = "./data",
        help = "Directory for posts, checkpoint and logs"
    )]
    pub data_dir: PathBuf,

    #[arg(short, long, help = "Worker pool size (default: available CPUs minus one, capped at 8)")]
    pub workers: Option<usize>,

    #[arg(
        long,
        default_value_t = Config::BACKPRESSURE_THRESHOLD,
        help = "Skip discovery while this many accounts are queued"
    )]
    pub backpressure: usize,

    #[arg(long, default_value_t = Config::POLL_INTERVAL_SECS, help = "Worker liveness poll interval in seconds")]
    pub poll_interval: u64,

    #[arg(long, default_value_t = Config::PAUSE_EVERY_PAGES_MIN, help = "Fewest page fetches between pauses")]
    pub pause_every_min: u32,

    #[arg(long, default_value_t = Config::PAUSE_EVERY_PAGES_MAX, help = "Most page fetches between pauses")]
    pub pause_every_max: u32,

    #[arg(long, default_value_t = Config::PAUSE_SECS_MIN, help = "Shortest pause in seconds")]
    pub pause_min: u64,

    #[arg(long, default_value_t = Config::PAUSE_SECS_MAX, help = "Longest pause in seconds")]
    pub pause_max: u64,

    #[arg(long, default_value_t = Config::FLUSH_EVERY_PAGES, help = "Flush collected posts every N pages")]
    pub flush_every: u64,

    #[arg(long, default_value_t = Config::MIN_PAGES, help = "Skip posts of accounts with fewer pages")]
    pub min_pages: u64,

    #[arg(long, default_value_t = Config::DISCOVERY_CONCURRENCY, help = "Concurrent discovery calls")]
    pub discovery_concurrency: usize,

    #[arg(long, help = "Requeue an account whose worker crashed mid-crawl")]
    pub requeue_crashed: bool,

    #[arg(long, default_value = Config::USER_AGENT, help = "User agent string for requests")]
    pub user_agent: String,

    #[arg(short, long, default_value_t = Config::TIMEOUT_SECS, help = "Request timeout in seconds")]
    pub timeout: u64,

    #[arg(long, env = "FOLLOW_CRAWLER_COOKIE", help = "Session cookie sent with every request")]
    pub cookie: Option<String>,
}

impl CrawlArgs {
    /// Builds and validates the runtime configuration.
    pub fn to_config(&self) -> Result<CrawlerConfig, ConfigError> {
        let mut config = CrawlerConfig::new(&self.seed, &self.since_date)?;
        config.crawl_all = self.crawl_all;
        config.output_dir = self.data_dir.clone();
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        config.backpressure_threshold = self.backpressure;
        config.poll_interval = Duration::from_secs(self.poll_interval);
        config.pacing.pages_between_pauses = Bounds::new(self.pause_every_min, self.pause_every_max);
        config.pacing.pause = Bounds::new(
            Duration::from_secs(self.pause_min),
            Duration::from_secs(self.pause_max),
        );
        config.flush_every_pages = self.flush_every;
        config.min_pages = self.min_pages;
        config.discovery_concurrency = self.discovery_concurrency;
        config.requeue_crashed = self.requeue_crashed;
        config.user_agent = self.user_agent.clone();
        config.timeout_secs = self.timeout;

        config.validate()?;
        Ok(config)
    }
}

impl Cli {
    /// On error, clap prints help and exits with code 2 (usage error).
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
