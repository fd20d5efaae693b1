//! The one shared-state object handed to every worker and the supervisor.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::checkpoint::CheckpointStore;
use crate::collaborators::{Discoverer, PostSink, PostSource, SourceError};
use crate::config::CrawlerConfig;
use crate::frontier::Frontier;
use crate::metrics::SharedMetrics;
use crate::models::AccountId;
use crate::shutdown::ShutdownController;

/// Bounds the number of discovery calls in flight. With the default of one
/// permit a single stateful session is never touched by two workers at once.
pub struct DiscoveryGate {
    discoverer: Arc<dyn Discoverer>,
    permits: Semaphore,
    capacity: u32,
}

impl DiscoveryGate {
    pub fn new(discoverer: Arc<dyn Discoverer>, concurrency: usize) -> Self {
        let capacity = u32::try_from(concurrency.max(1)).unwrap_or(u32::MAX);
        Self {
            discoverer,
            permits: Semaphore::new(capacity as usize),
            capacity,
        }
    }

    pub async fn discover(&self, id: &AccountId) -> Result<HashSet<AccountId>, SourceError> {
        let _permit = self.permits.acquire().await.map_err(|_| gate_closed())?;
        self.discoverer.discover_related_ids(id).await
    }

    pub fn in_flight(&self) -> usize {
        (self.capacity as usize).saturating_sub(self.permits.available_permits())
    }

    /// Waits for in-flight discovery calls, then releases the discoverer's resources.
    /// Later `discover` calls fail with `SessionUnavailable`.
    pub async fn close(&self) -> Result<(), SourceError> {
        let all = self
            .permits
            .acquire_many(self.capacity)
            .await
            .map_err(|_| gate_closed())?;
        self.permits.close();
        drop(all);
        self.discoverer.close().await
    }
}

fn gate_closed() -> SourceError {
    SourceError::SessionUnavailable("discovery gate closed".to_string())
}

/// Everything a worker touches, constructed once per run.
pub struct CrawlContext {
    pub config: CrawlerConfig,
    pub frontier: Arc<Frontier>,
    pub checkpoint: Arc<CheckpointStore>,
    pub source: Arc<dyn PostSource>,
    pub discovery: DiscoveryGate,
    pub sink: Arc<dyn PostSink>,
    pub metrics: SharedMetrics,
    pub shutdown: Arc<ShutdownController>,
}

pub type SharedContext = Arc<CrawlContext>;
