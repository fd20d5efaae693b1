use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque account identifier. Equality is exact string match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    /// Accepts any non-empty token without whitespace.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
            return None;
        }
        Some(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for AccountId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Profile header for one account, fetched before its posts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountMeta {
    pub display_name: String,
    pub total_post_count: u64,
}

impl AccountMeta {
    /// Number of pages needed to cover every declared post.
    pub fn page_count(&self, posts_per_page: u64) -> u64 {
        if posts_per_page == 0 {
            return 0;
        }
        self.total_post_count.div_ceil(posts_per_page)
    }
}

/// Whether a post is the account's own writing or a repost of someone else's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PostKind {
    Original,
    /// `original` is `None` when the reposted content is no longer available.
    Retweet { original: Option<Box<PostRecord>> },
}

/// One structured post as produced by the post-page collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostRecord {
    pub id: String,
    pub author_id: Option<AccountId>,
    pub author_name: Option<String>,
    pub text: String,
    pub created_at: NaiveDate,
    pub source: Option<String>,
    pub location: Option<String>,
    pub likes: u64,
    pub comments: u64,
    pub reposts: u64,
    pub topics: Vec<String>,
    pub mentions: Vec<String>,
    /// Pinned posts sit outside the chronological ordering of the timeline.
    pub pinned: bool,
    /// Page view only carries a prefix of the text.
    pub truncated: bool,
    pub kind: PostKind,
}

impl PostRecord {
    pub fn is_retweet(&self) -> bool {
        matches!(self.kind, PostKind::Retweet { .. })
    }

    /// Embedded original of a retweet, if any.
    pub fn retweeted(&self) -> Option<&PostRecord> {
        match &self.kind {
            PostKind::Retweet { original } => original.as_deref(),
            PostKind::Original => None,
        }
    }

    pub fn retweeted_mut(&mut self) -> Option<&mut PostRecord> {
        match &mut self.kind {
            PostKind::Retweet { original } => original.as_deref_mut(),
            PostKind::Original => None,
        }
    }
}

/// One page of an account's timeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostsPage {
    pub posts: Vec<PostRecord>,
    /// Set when the platform has nothing beyond this page.
    pub end_of_data: bool,
}
