//! Durable crawl progress.
//!
//! Two files live in the output directory:
//! - `done_ids.txt`: append-only, one finished account id per line, written as each
//!   account completes.
//! - `checkpoint.json`: versioned record holding the pending queue, the dedup set and
//!   the run log, rewritten wholesale at shutdown via temp-file-then-rename.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::models::AccountId;

pub const CHECKPOINT_VERSION: u32 = 2;
/// Version 1 records carry no dedup set and load with an empty one.
const OLDEST_READABLE_VERSION: u32 = 1;
const DONE_FILE: &str = "done_ids.txt";
const CHECKPOINT_FILE: &str = "checkpoint.json";

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unsupported checkpoint version {found} (expected {expected})")]
    Version { found: u32, expected: u32 },

    #[error("Done-record writer failed: {0}")]
    Writer(#[from] tokio::task::JoinError),
}

/// Cumulative counters across process runs. Only touched during shutdown.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub number_of_run: u64,
    /// Seconds of wall-clock crawl time.
    pub time_usage: f64,
    pub number_of_crawl_user: u64,
}

impl RunStats {
    pub fn accumulate(&mut self, elapsed: Duration, accounts_crawled: u64) {
        self.number_of_run += 1;
        self.time_usage += elapsed.as_secs_f64();
        self.number_of_crawl_user += accounts_crawled;
    }
}

impl std::fmt::Display for RunStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "number_of_run={} time_usage={:.1}s number_of_crawl_user={}",
            self.number_of_run, self.time_usage, self.number_of_crawl_user
        )
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointRecord {
    version: u32,
    pending: Vec<AccountId>,
    #[serde(default)]
    seen: Vec<AccountId>,
    run_log: RunStats,
}

/// State read back at startup.
#[derive(Debug, Clone, Default)]
pub struct LoadedCheckpoint {
    pub done: Vec<AccountId>,
    pub pending: Vec<AccountId>,
    /// The dedup set as of the last save, including ids that are neither done nor pending.
    pub seen: Vec<AccountId>,
    pub run_log: RunStats,
    /// Set when neither file held anything.
    pub first_run: bool,
}

pub struct CheckpointStore {
    dir: PathBuf,
    done: Mutex<File>,
}

impl CheckpointStore {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, CheckpointError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        truncate_torn_tail(&dir.join(DONE_FILE))?;

        let done = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(DONE_FILE))?;

        Ok(Self {
            dir,
            done: Mutex::new(done),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn load(&self) -> Result<LoadedCheckpoint, CheckpointError> {
        let done = read_done_ids(&self.dir.join(DONE_FILE))?;

        let checkpoint_path = self.dir.join(CHECKPOINT_FILE);
        let record = if checkpoint_path.exists() {
            let raw = std::fs::read_to_string(&checkpoint_path)?;
            let record: CheckpointRecord = serde_json::from_str(&raw)?;
            if !(OLDEST_READABLE_VERSION..=CHECKPOINT_VERSION).contains(&record.version) {
                return Err(CheckpointError::Version {
                    found: record.version,
                    expected: CHECKPOINT_VERSION,
                });
            }
            Some(record)
        } else {
            None
        };

        let first_run = done.is_empty() && record.is_none();
        let (pending, seen, run_log) = match record {
            Some(record) => (record.pending, record.seen, record.run_log),
            None => (Vec::new(), Vec::new(), RunStats::default()),
        };

        Ok(LoadedCheckpoint {
            done,
            pending,
            seen,
            run_log,
            first_run,
        })
    }

    /// Appends one finished id and syncs it before returning.
    pub fn record_done(&self, id: &AccountId) -> Result<(), CheckpointError> {
        let mut file = self.done.lock();
        writeln!(file, "{}", id)?;
        file.sync_data()?;
        Ok(())
    }

    /// `record_done` on the blocking pool, keeping the fsync off the async workers.
    pub async fn append_done(self: &Arc<Self>, id: &AccountId) -> Result<(), CheckpointError> {
        let store = Arc::clone(self);
        let id = id.clone();
        tokio::task::spawn_blocking(move || store.record_done(&id)).await?
    }

    /// Rewrites the pending queue, dedup set and run log atomically. The done file is
    /// untouched.
    pub fn save(
        &self,
        pending: &[AccountId],
        seen: &HashSet<AccountId>,
        run_log: &RunStats,
    ) -> Result<(), CheckpointError> {
        let mut seen: Vec<AccountId> = seen.iter().cloned().collect();
        seen.sort();
        let record = CheckpointRecord {
            version: CHECKPOINT_VERSION,
            pending: pending.to_vec(),
            seen,
            run_log: run_log.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&record)?;
        atomic_write(&self.dir.join(CHECKPOINT_FILE), &bytes)?;
        Ok(())
    }
}

/// A trailing line without its newline was torn by a crash and is skipped.
fn read_done_ids(path: &Path) -> Result<Vec<AccountId>, CheckpointError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let complete = match raw.rfind('\n') {
        Some(end) => &raw[..end],
        None => "",
    };
    if complete.len() + 1 < raw.len() {
        tracing::warn!(path = %path.display(), "Ignoring torn trailing line in done record");
    }

    Ok(complete.lines().filter_map(AccountId::parse).collect())
}

/// Cuts a partial trailing line so the next append starts on a fresh line.
fn truncate_torn_tail(path: &Path) -> Result<(), CheckpointError> {
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    if raw.is_empty() || raw.ends_with(b"\n") {
        return Ok(());
    }

    let keep = raw.iter().rposition(|b| *b == b'\n').map_or(0, |pos| pos + 1);
    tracing::warn!(
        path = %path.display(),
        dropped_bytes = raw.len() - keep,
        "Truncating torn trailing line in done record"
    );
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(keep as u64)?;
    file.sync_all()?;
    Ok(())
}

fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let temp_name = format!(
        ".{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("checkpoint")
    );
    let temp_path = path.with_file_name(temp_name);

    let result = (|| {
        let mut file = File::create(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        std::fs::rename(&temp_path, path)
    })();

    if result.is_err() && temp_path.exists() {
        let _ = std::fs::remove_file(&temp_path);
    }
    result?;

    #[cfg(unix)]
    {
        if let Some(parent) = path.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }
    }

    Ok(())
}
