//! Cooperative shutdown: a three-state controller plus the cancellation token
//! every blocking wait in the crawl observes.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

const RUNNING: u8 = 0;
const DRAINING: u8 = 1;
const STOPPED: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Interrupt,
    Terminate,
    Suspend,
    /// Frontier empty and nothing left in flight.
    Exhausted,
}

impl std::fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ShutdownReason::Interrupt => "interrupt",
            ShutdownReason::Terminate => "terminate",
            ShutdownReason::Suspend => "suspend",
            ShutdownReason::Exhausted => "work exhausted",
        };
        f.write_str(name)
    }
}

/// Owns the stop flag. Running -> Draining -> Stopped, each step taken once.
pub struct ShutdownController {
    state: AtomicU8,
    stop_tx: watch::Sender<bool>,
    reason: Mutex<Option<ShutdownReason>>,
}

impl ShutdownController {
    pub fn new() -> Arc<Self> {
        let (stop_tx, _stop_rx) = watch::channel(false);
        Arc::new(Self {
            state: AtomicU8::new(RUNNING),
            stop_tx,
            reason: Mutex::new(None),
        })
    }

    /// Fresh token observing this controller's stop flag.
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.stop_tx.subscribe(),
        }
    }

    /// Running -> Draining. Returns false (and does nothing) if already past Running.
    pub fn request(&self, reason: ShutdownReason) -> bool {
        if self
            .state
            .compare_exchange(RUNNING, DRAINING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(%reason, "Shutdown already in progress, ignoring request");
            return false;
        }

        *self.reason.lock() = Some(reason);
        self.stop_tx.send_replace(true);
        tracing::info!(%reason, "Shutdown requested, draining workers");
        true
    }

    /// Draining -> Stopped, after workers exited and the checkpoint was written.
    pub fn mark_stopped(&self) {
        if self
            .state
            .compare_exchange(DRAINING, STOPPED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tracing::info!("Shutdown complete");
        }
    }

    pub fn state(&self) -> ShutdownState {
        match self.state.load(Ordering::Acquire) {
            RUNNING => ShutdownState::Running,
            DRAINING => ShutdownState::Draining,
            _ => ShutdownState::Stopped,
        }
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        *self.reason.lock()
    }

    /// Routes interrupt, terminate and (on unix) suspend signals into `request`.
    /// Repeated signals while draining are logged and otherwise ignored.
    pub fn install_os_handlers(self: &Arc<Self>) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let reason = next_os_signal().await;
                if !controller.request(reason) {
                    tracing::warn!(%reason, "Already shutting down; waiting for workers to finish");
                }
            }
        })
    }
}

#[cfg(unix)]
async fn next_os_signal() -> ShutdownReason {
    use tokio::signal::unix::{SignalKind, signal};

    #[cfg(target_os = "linux")]
    const SIGTSTP: i32 = 20;
    #[cfg(not(target_os = "linux"))]
    const SIGTSTP: i32 = 18;

    let mut terminate = signal(SignalKind::terminate()).ok();
    let mut suspend = signal(SignalKind::from_raw(SIGTSTP)).ok();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => ShutdownReason::Interrupt,
        Some(_) = async { terminate.as_mut()?.recv().await } => ShutdownReason::Terminate,
        Some(_) = async { suspend.as_mut()?.recv().await } => ShutdownReason::Suspend,
    }
}

#[cfg(not(unix))]
async fn next_os_signal() -> ShutdownReason {
    let _ = tokio::signal::ctrl_c().await;
    ShutdownReason::Interrupt
}

/// Cancellation token handed to workers, the supervisor and the pacer.
#[derive(Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn is_raised(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the stop flag is set, or when the controller is gone.
    pub async fn raised(&mut self) {
        let _ = self.rx.wait_for(|raised| *raised).await;
    }

    /// Sleeps `total` in slices of at most `tick`, checking the flag between slices.
    /// Returns false if interrupted.
    pub async fn sleep(&mut self, total: Duration, tick: Duration) -> bool {
        let deadline = Instant::now() + total;
        let tick = tick.max(Duration::from_millis(1));

        loop {
            if self.is_raised() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            let step = tick.min(deadline - now);
            tokio::select! {
                _ = tokio::time::sleep(step) => {}
                _ = self.raised() => return false,
            }
        }
    }
}
