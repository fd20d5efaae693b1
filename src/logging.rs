/// Multi-layer tracing setup: compact stdout plus daily-rotated text and JSON
/// files under `<output_dir>/logs`.
///
/// `RUST_LOG` controls filtering (default `info`), for example
/// `RUST_LOG=follow_crawler=debug,reqwest=warn`.
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const TEXT_LOG: &str = "crawler.log";
pub const JSON_LOG: &str = "crawler.json.log";

#[derive(thiserror::Error, Debug)]
pub enum LoggingError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("Subscriber already installed: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Keeps the background file writers alive. Drop it last so buffered lines are flushed.
pub struct LoggingGuard {
    _text: WorkerGuard,
    _json: WorkerGuard,
    dir: PathBuf,
}

impl LoggingGuard {
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

pub fn log_dir<P: AsRef<Path>>(output_dir: P) -> PathBuf {
    output_dir.as_ref().join("logs")
}

fn env_filter() -> Result<EnvFilter, LoggingError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => Ok(EnvFilter::try_new("info")?),
    }
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init_logging<P: AsRef<Path>>(output_dir: P) -> Result<LoggingGuard, LoggingError> {
    let dir = log_dir(output_dir);
    std::fs::create_dir_all(&dir)?;

    let (text_writer, text_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&dir, TEXT_LOG));
    let (json_writer, json_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&dir, JSON_LOG));

    let text_layer = fmt::layer()
        .with_writer(text_writer)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_ansi(false)
        .compact()
        .with_filter(env_filter()?);

    let json_layer = fmt::layer()
        .json()
        .with_writer(json_writer)
        .with_target(true)
        .with_thread_ids(true)
        .with_current_span(true)
        .with_span_list(true)
        .with_filter(env_filter()?);

    // Terminal output stays short
    let stdout_layer = fmt::layer()
        .with_target(false)
        .compact()
        .with_filter(env_filter()?);

    tracing_subscriber::registry()
        .with(text_layer)
        .with(json_layer)
        .with(stdout_layer)
        .try_init()?;

    tracing::debug!(dir = %dir.display(), "Logging initialized");

    Ok(LoggingGuard {
        _text: text_guard,
        _json: json_guard,
        dir,
    })
}
