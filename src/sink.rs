//! JSON-lines post storage: `posts/<account>.jsonl` per account plus one summary
//! line per finished account in `accounts.jsonl`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use crate::collaborators::{PostSink, SourceError};
use crate::models::{AccountId, AccountMeta, PostRecord};

pub const POSTS_DIR: &str = "posts";
pub const ACCOUNTS_FILE: &str = "accounts.jsonl";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub account: AccountId,
    pub display_name: String,
    pub total_post_count: u64,
    pub stored_posts: u64,
    pub finished_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct StoredId {
    id: String,
}

/// Appends are idempotent per post id, so an account re-crawled after an
/// interrupted run does not duplicate lines.
pub struct JsonlSink {
    root: PathBuf,
    written: Mutex<HashMap<AccountId, HashSet<String>>>,
    summary_lock: tokio::sync::Mutex<()>,
}

impl JsonlSink {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, SourceError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join(POSTS_DIR)).map_err(sink_error)?;
        Ok(Self {
            root,
            written: Mutex::new(HashMap::new()),
            summary_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn posts_path(&self, account: &AccountId) -> PathBuf {
        self.root.join(POSTS_DIR).join(format!("{}.jsonl", account))
    }

    pub fn accounts_path(&self) -> PathBuf {
        self.root.join(ACCOUNTS_FILE)
    }

    /// Post ids already on disk for `account`, read on first touch.
    async fn ensure_loaded(&self, account: &AccountId) -> Result<(), SourceError> {
        if self.written.lock().contains_key(account) {
            return Ok(());
        }

        let ids = match tokio::fs::read_to_string(self.posts_path(account)).await {
            Ok(raw) => raw
                .lines()
                .filter_map(|line| serde_json::from_str::<StoredId>(line).ok())
                .map(|stored| stored.id)
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashSet::new(),
            Err(e) => return Err(sink_error(e)),
        };
        self.written.lock().entry(account.clone()).or_insert(ids);
        Ok(())
    }

    async fn append_lines(path: &Path, lines: &str) -> Result<(), SourceError> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(sink_error)?;
        file.write_all(lines.as_bytes()).await.map_err(sink_error)?;
        file.sync_data().await.map_err(sink_error)?;
        Ok(())
    }

    async fn write_summary(
        &self,
        account: &AccountId,
        meta: &AccountMeta,
    ) -> Result<(), SourceError> {
        let stored_posts = self
            .written
            .lock()
            .get(account)
            .map_or(0, |ids| ids.len() as u64);
        let summary = AccountSummary {
            account: account.clone(),
            display_name: meta.display_name.clone(),
            total_post_count: meta.total_post_count,
            stored_posts,
            finished_at: Utc::now(),
        };
        let mut line = serde_json::to_string(&summary).map_err(sink_error)?;
        line.push('\n');

        let _guard = self.summary_lock.lock().await;
        Self::append_lines(&self.accounts_path(), &line).await
    }
}

fn sink_error(error: impl std::fmt::Display) -> SourceError {
    SourceError::Sink(error.to_string())
}

#[async_trait]
impl PostSink for JsonlSink {
    async fn persist_posts(
        &self,
        account: &AccountId,
        meta: &AccountMeta,
        posts: &[PostRecord],
        is_final: bool,
    ) -> Result<(), SourceError> {
        self.ensure_loaded(account).await?;

        let fresh: Vec<&PostRecord> = {
            let mut written = self.written.lock();
            let ids = written.entry(account.clone()).or_default();
            posts.iter().filter(|post| ids.insert(post.id.clone())).collect()
        };

        if !fresh.is_empty() {
            let mut lines = String::new();
            for post in &fresh {
                lines.push_str(&serde_json::to_string(post).map_err(sink_error)?);
                lines.push('\n');
            }
            Self::append_lines(&self.posts_path(account), &lines).await?;
        }

        if is_final {
            self.write_summary(account, meta).await?;
            self.written.lock().remove(account);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::post;
    use tempfile::TempDir;

    fn meta() -> AccountMeta {
        AccountMeta {
            display_name: "someone".to_string(),
            total_post_count: 3,
        }
    }

    fn read_lines(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[tokio::test]
    async fn test_incremental_and_final_flush() {
        let dir = TempDir::new().unwrap();
        let sink = JsonlSink::new(dir.path()).unwrap();
        let account = AccountId::from("U1");

        sink.persist_posts(&account, &meta(), &[post("1", "2020-01-10")], false)
            .await
            .unwrap();
        sink.persist_posts(&account, &meta(), &[post("2", "2020-01-09")], true)
            .await
            .unwrap();

        let lines = read_lines(&sink.posts_path(&account));
        assert_eq!(lines.len(), 2);
        let first: PostRecord = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(first.id, "1");

        let summaries = read_lines(&sink.accounts_path());
        assert_eq!(summaries.len(), 1);
        let summary: AccountSummary = serde_json::from_str(&summaries[0]).unwrap();
        assert_eq!(summary.account, account);
        assert_eq!(summary.stored_posts, 2);
    }

    #[tokio::test]
    async fn test_recrawl_does_not_duplicate_posts() {
        let dir = TempDir::new().unwrap();
        let account = AccountId::from("U1");
        {
            let sink = JsonlSink::new(dir.path()).unwrap();
            sink.persist_posts(&account, &meta(), &[post("1", "2020-01-10")], false)
                .await
                .unwrap();
        }

        let sink = JsonlSink::new(dir.path()).unwrap();
        sink.persist_posts(
            &account,
            &meta(),
            &[post("1", "2020-01-10"), post("2", "2020-01-09")],
            true,
        )
        .await
        .unwrap();

        assert_eq!(read_lines(&sink.posts_path(&account)).len(), 2);
    }
}
