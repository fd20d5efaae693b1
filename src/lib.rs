pub mod backoff;
pub mod checkpoint;
pub mod cli;
pub mod collaborators;
pub mod config;
pub mod context;
pub mod crawler;
pub mod frontier;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod network;
pub mod pacer;
pub mod shutdown;
pub mod sink;
pub mod supervisor;
pub mod weibo;
pub mod worker;

// Re-export main types for library usage
pub use checkpoint::{CheckpointError, CheckpointStore, LoadedCheckpoint, RunStats};
pub use collaborators::{Discoverer, PostSink, PostSource, SourceError};
pub use config::{ConfigError, CrawlerConfig};
pub use crawler::{CrawlReport, Crawler, CrawlerError};
pub use frontier::{CrashPolicy, Frontier, FrontierSnapshot, Lease};
pub use models::{AccountId, AccountMeta, PostKind, PostRecord, PostsPage};
pub use network::{FetchError, FetchResult, HttpClient};
pub use shutdown::{ShutdownController, ShutdownReason, ShutdownSignal, ShutdownState};
pub use sink::JsonlSink;
