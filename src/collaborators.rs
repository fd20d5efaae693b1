//! Contracts for the platform-specific pieces the crawl core calls into.

use async_trait::async_trait;
use std::collections::HashSet;
use thiserror::Error;

use crate::models::{AccountId, AccountMeta, PostRecord, PostsPage};

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Account not found: {0}")]
    NotFound(AccountId),

    #[error("Rate limited by platform")]
    RateLimited,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("Shared session unavailable: {0}")]
    SessionUnavailable(String),

    #[error("Sink error: {0}")]
    Sink(String),
}

/// Timeline and profile lookups for one account.
#[async_trait]
pub trait PostSource: Send + Sync {
    async fn fetch_account_meta(&self, id: &AccountId) -> Result<AccountMeta, SourceError>;

    /// Pages are numbered from 1.
    async fn fetch_posts_page(&self, id: &AccountId, page: u64) -> Result<PostsPage, SourceError>;

    /// Full version of a post truncated in the page view.
    async fn fetch_full_post(&self, post_id: &str) -> Result<Option<PostRecord>, SourceError>;
}

/// Scrapes related account ids from an account's profile page.
#[async_trait]
pub trait Discoverer: Send + Sync {
    async fn discover_related_ids(&self, id: &AccountId) -> Result<HashSet<AccountId>, SourceError>;

    /// Releases any exclusive resource such as a long-lived browser session.
    async fn close(&self) -> Result<(), SourceError> {
        Ok(())
    }
}

/// Durable destination for collected posts.
#[async_trait]
pub trait PostSink: Send + Sync {
    /// `is_final` marks the last flush for this account.
    async fn persist_posts(
        &self,
        account: &AccountId,
        meta: &AccountMeta,
        posts: &[PostRecord],
        is_final: bool,
    ) -> Result<(), SourceError>;
}
