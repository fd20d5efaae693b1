use async_trait::async_trait;
use regex::Regex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use super::api::source_error;
use crate::collaborators::{Discoverer, SourceError};
use crate::models::AccountId;
use crate::network::HttpClient;

pub const DESKTOP_BASE: &str = "https://weibo.com";

/// Finds `/u/<10 digits>` profile links in a page.
pub struct RelatedIdExtractor {
    pattern: Regex,
}

impl RelatedIdExtractor {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(r"/u/([0-9]{10})")?,
        })
    }

    /// Every linked account id except `self_id`.
    pub fn extract(&self, html: &str, self_id: &AccountId) -> HashSet<AccountId> {
        self.pattern
            .captures_iter(html)
            .filter_map(|caps| caps.get(1))
            .map(|id| AccountId::from(id.as_str()))
            .filter(|id| id != self_id)
            .collect()
    }
}

/// Scrapes related accounts from profile pages over one logged-in session.
///
/// The session cookie lives in the client; callers go through the discovery
/// gate so only the permitted number of requests share it.
pub struct ProfilePageDiscoverer {
    http: HttpClient,
    extractor: RelatedIdExtractor,
    base_url: String,
    closed: AtomicBool,
}

impl ProfilePageDiscoverer {
    pub fn new(http: HttpClient) -> Result<Self, SourceError> {
        let extractor =
            RelatedIdExtractor::new().map_err(|e| SourceError::SessionUnavailable(e.to_string()))?;
        Ok(Self {
            http,
            extractor,
            base_url: DESKTOP_BASE.to_string(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn profile_url(&self, id: &AccountId) -> String {
        format!("{}/u/{}?is_hot=1", self.base_url, id)
    }
}

#[async_trait]
impl Discoverer for ProfilePageDiscoverer {
    async fn discover_related_ids(&self, id: &AccountId) -> Result<HashSet<AccountId>, SourceError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SourceError::SessionUnavailable("session closed".to_string()));
        }

        let page = self
            .http
            .fetch(&self.profile_url(id))
            .await
            .map_err(|e| match source_error(e, Some(id)) {
                SourceError::Network(msg) => SourceError::SessionUnavailable(msg),
                other => other,
            })?;

        let related = self.extractor.extract(&page.content, id);
        tracing::debug!(account = %id, found = related.len(), "Scraped profile page");
        Ok(related)
    }

    async fn close(&self) -> Result<(), SourceError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::info!("Discovery session closed");
        }
        Ok(())
    }
}
