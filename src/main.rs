use follow_crawler::checkpoint::{CheckpointError, CheckpointStore};
use follow_crawler::cli::{Cli, Commands, CrawlArgs};
use follow_crawler::collaborators::SourceError;
use follow_crawler::config::{ConfigError, CrawlerConfig};
use follow_crawler::crawler::{Crawler, CrawlerError};
use follow_crawler::logging::{LoggingError, init_logging};
use follow_crawler::network::{FetchError, HttpClient};
use follow_crawler::sink::JsonlSink;
use follow_crawler::weibo::{MobileApiSource, ProfilePageDiscoverer};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MainError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Crawler error: {0}")]
    Crawler(#[from] CrawlerError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Logging error: {0}")]
    Logging(#[from] LoggingError),

    #[error("HTTP client error: {0}")]
    Http(#[from] FetchError),

    #[error("Setup error: {0}")]
    Setup(#[from] SourceError),
}

impl MainError {
    /// 2 for bad arguments or configuration, 3 for anything touching disk or network setup.
    fn exit_code(&self) -> u8 {
        match self {
            MainError::Config(_) | MainError::Crawler(CrawlerError::Config(_)) => 2,
            _ => 3,
        }
    }
}

/// Wires the Weibo collaborators into a crawler.
fn build_crawler(config: CrawlerConfig, cookie: Option<&str>) -> Result<Crawler, MainError> {
    let source_http = HttpClient::new(&config.user_agent, config.timeout_secs, cookie)?;
    let session_http = HttpClient::new(&config.user_agent, config.timeout_secs, cookie)?;

    let source = Arc::new(MobileApiSource::new(source_http));
    let discoverer = Arc::new(ProfilePageDiscoverer::new(session_http)?);
    let sink = Arc::new(JsonlSink::new(&config.output_dir)?);

    Ok(Crawler::new(config, source, discoverer, sink)?)
}

async fn run_crawl_command(args: CrawlArgs) -> Result<(), MainError> {
    // Validate before touching the data directory.
    let config = args.to_config()?;
    let _logging = init_logging(&config.output_dir)?;
    let output_dir = config.output_dir.clone();

    println!(
        "Crawling from {} (posts since {}, {} workers)",
        config.seed, config.since_date, config.workers
    );
    if args.cookie.is_none() {
        tracing::warn!("No session cookie set; discovery may be refused");
    }

    let crawler = build_crawler(config, args.cookie.as_deref())?;
    let signals = crawler.shutdown_handle().install_os_handlers();

    let report = crawler.run().await?;
    signals.abort();

    println!("{}", report);
    println!("Data: {}", output_dir.display());
    Ok(())
}

fn run_stats_command(data_dir: &Path) -> Result<(), MainError> {
    let store = CheckpointStore::open(data_dir)?;
    let loaded = store.load()?;

    if loaded.first_run {
        println!("No checkpoint in {}", data_dir.display());
        return Ok(());
    }

    println!("Run log: {}", loaded.run_log);
    println!(
        "Done: {} | Pending: {} | Seen: {}",
        loaded.done.len(),
        loaded.pending.len(),
        loaded.seen.len()
    );
    if let Some(next) = loaded.pending.first() {
        println!("Next account: {}", next);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();

    let result = match cli.command {
        Commands::Crawl(args) => run_crawl_command(args).await,
        Commands::Stats { data_dir } => run_stats_command(&data_dir),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}
