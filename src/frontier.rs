use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::models::AccountId;
use crate::shutdown::ShutdownSignal;

/// What happens to a leased id whose worker died before settling it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CrashPolicy {
    /// The id stays in the dedup set and is never crawled again.
    #[default]
    Drop,
    /// The id goes back to the head of the queue.
    Requeue,
}

#[derive(Debug, Default)]
struct FrontierInner {
    queue: VecDeque<AccountId>,
    /// Every id ever admitted, including finished ones.
    seen: HashSet<AccountId>,
    in_flight: usize,
    exhausted: bool,
}

/// FIFO work queue of account ids guarded by the dedup set.
///
/// One lock covers both the queue and the set, so an id enters the set in the
/// same critical section that puts it on the queue.
pub struct Frontier {
    inner: Mutex<FrontierInner>,
    available: Notify,
    crash_policy: CrashPolicy,
}

/// Copy of the frontier taken for checkpointing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrontierSnapshot {
    pub pending: Vec<AccountId>,
    pub seen: HashSet<AccountId>,
}

impl Frontier {
    pub fn new(crash_policy: CrashPolicy) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(FrontierInner::default()),
            available: Notify::new(),
            crash_policy,
        })
    }

    /// Rebuilds state from a checkpoint: `done` ids are only marked seen,
    /// `pending` ids are queued in order.
    pub fn restore<D, P>(&self, done: D, pending: P) -> usize
    where
        D: IntoIterator<Item = AccountId>,
        P: IntoIterator<Item = AccountId>,
    {
        let mut inner = self.inner.lock();
        inner.seen.extend(done);

        let mut queued_ids: HashSet<AccountId> = inner.queue.iter().cloned().collect();
        let mut queued = 0;
        for id in pending {
            if queued_ids.insert(id.clone()) {
                inner.seen.insert(id.clone());
                inner.queue.push_back(id);
                queued += 1;
            }
        }
        inner.exhausted = false;
        drop(inner);

        self.available.notify_waiters();
        queued
    }

    /// Queues `id` regardless of backpressure. Only a duplicate queue entry is avoided.
    pub fn seed(&self, id: AccountId) {
        let mut inner = self.inner.lock();
        // The queue is a subset of the seen set, so a fresh id needs no queue scan.
        if inner.seen.insert(id.clone()) || !inner.queue.contains(&id) {
            inner.queue.push_back(id);
        }
        inner.exhausted = false;
        drop(inner);

        self.available.notify_one();
    }

    /// The only dedup gate: true exactly once per id over the frontier's lifetime.
    pub fn try_enqueue(&self, id: AccountId) -> bool {
        let mut inner = self.inner.lock();
        if !inner.seen.insert(id.clone()) {
            return false;
        }
        inner.queue.push_back(id);
        drop(inner);

        self.available.notify_one();
        true
    }

    /// Waits for the next id. Returns `None` when the stop flag is raised or the
    /// frontier is exhausted (empty with nothing in flight).
    pub async fn dequeue(self: &Arc<Self>, signal: &mut ShutdownSignal) -> Option<Lease> {
        loop {
            if signal.is_raised() {
                return None;
            }

            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.inner.lock();
                if let Some(id) = inner.queue.pop_front() {
                    inner.in_flight += 1;
                    return Some(Lease {
                        frontier: Arc::clone(self),
                        id,
                        settled: false,
                    });
                }
                if inner.exhausted {
                    return None;
                }
                if inner.in_flight == 0 {
                    inner.exhausted = true;
                    drop(inner);
                    self.available.notify_waiters();
                    return None;
                }
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = signal.raised() => return None,
            }
        }
    }

    pub fn size(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn dedup_len(&self) -> usize {
        self.inner.lock().seen.len()
    }

    pub fn in_flight(&self) -> usize {
        self.inner.lock().in_flight
    }

    pub fn contains(&self, id: &AccountId) -> bool {
        self.inner.lock().seen.contains(id)
    }

    pub fn is_exhausted(&self) -> bool {
        self.inner.lock().exhausted
    }

    /// Discovery runs only while the queue is shorter than `threshold`.
    pub fn accepts_discovery(&self, threshold: usize) -> bool {
        self.size() < threshold
    }

    pub fn snapshot(&self) -> FrontierSnapshot {
        let inner = self.inner.lock();
        FrontierSnapshot {
            pending: inner.queue.iter().cloned().collect(),
            seen: inner.seen.clone(),
        }
    }

    /// Empties the queue in one critical section. Ids stay in the dedup set.
    pub fn drain(&self) -> Vec<AccountId> {
        let mut inner = self.inner.lock();
        inner.queue.drain(..).collect()
    }

    pub fn stats(&self) -> FrontierStats {
        let inner = self.inner.lock();
        FrontierStats {
            queued: inner.queue.len(),
            seen: inner.seen.len(),
            in_flight: inner.in_flight,
        }
    }

    fn settle(&self, id: AccountId, requeue: bool) {
        let mut inner = self.inner.lock();
        inner.in_flight = inner.in_flight.saturating_sub(1);
        if requeue {
            inner.queue.push_front(id);
            inner.exhausted = false;
        } else if inner.in_flight == 0 && inner.queue.is_empty() {
            inner.exhausted = true;
        }
        drop(inner);

        self.available.notify_waiters();
    }
}

/// An id checked out of the frontier by one worker.
///
/// Dropping an unsettled lease (panic or abort) applies the frontier's crash policy.
pub struct Lease {
    frontier: Arc<Frontier>,
    id: AccountId,
    settled: bool,
}

impl Lease {
    pub fn id(&self) -> &AccountId {
        &self.id
    }

    /// The account is finished.
    pub fn complete(mut self) {
        self.settled = true;
        self.frontier.settle(self.id.clone(), false);
    }

    /// The crawl was cut short by shutdown; put the id back at the head.
    pub fn release_for_resume(mut self) {
        self.settled = true;
        self.frontier.settle(self.id.clone(), true);
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let requeue = self.frontier.crash_policy == CrashPolicy::Requeue;
        tracing::warn!(account = %self.id, requeue, "Lease dropped without completion");
        self.frontier.settle(self.id.clone(), requeue);
    }
}

#[derive(Debug, Clone)]
pub struct FrontierStats {
    pub queued: usize,
    pub seen: usize,
    pub in_flight: usize,
}

impl std::fmt::Display for FrontierStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Frontier: {} queued, {} seen, {} in flight",
            self.queued, self.seen, self.in_flight
        )
    }
}
