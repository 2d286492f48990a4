//! Cancellation and termination signals
//!
//! Every [`RunContext`](super::RunContext) registers a [`CancelHandle`]
//! here. Cancelling a handle kills the run's live process groups and
//! removes its IPC channel files; commands the run tries to start after
//! that fail with [`ExecutionError::Cancelled`](crate::pipeline::ExecutionError::Cancelled).
//!
//! [`install`] hooks SIGINT, SIGTERM and SIGHUP: on any of them every
//! registered run is cancelled and the process exits with
//! [`EXIT_CANCELLED`].

use super::ipc::ChannelRegistry;
use super::timeout::ProcessGroups;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Process exit status after a termination signal
pub const EXIT_CANCELLED: u8 = 130;

static RUNS: Lazy<Mutex<Vec<WeakHandle>>> = Lazy::new(|| Mutex::new(Vec::new()));
static CANCELLED: AtomicBool = AtomicBool::new(false);

/// Cancels one run from any thread
#[derive(Debug, Clone)]
pub struct CancelHandle {
    groups: Arc<ProcessGroups>,
    channels: Arc<ChannelRegistry>,
}

impl CancelHandle {
    pub(crate) fn new(groups: Arc<ProcessGroups>, channels: Arc<ChannelRegistry>) -> Self {
        Self { groups, channels }
    }

    /// Kills the run's live processes and removes its channel files
    ///
    /// Returns the number of process groups killed.
    pub fn cancel(&self) -> usize {
        let killed = self.groups.kill_all();
        let removed = self.channels.cleanup();
        tracing::debug!(killed, removed, "run cancelled");
        killed
    }

    /// Returns true once [`cancel`](Self::cancel) has run
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.groups.is_closed()
    }

    fn downgrade(&self) -> WeakHandle {
        WeakHandle {
            groups: Arc::downgrade(&self.groups),
            channels: Arc::downgrade(&self.channels),
        }
    }
}

#[derive(Debug)]
struct WeakHandle {
    groups: Weak<ProcessGroups>,
    channels: Weak<ChannelRegistry>,
}

impl WeakHandle {
    fn upgrade(&self) -> Option<CancelHandle> {
        Some(CancelHandle {
            groups: self.groups.upgrade()?,
            channels: self.channels.upgrade()?,
        })
    }
}

/// Tracks `handle` so [`cancel_all`] reaches it
///
/// A run registered after [`cancel_all`] is cancelled straight away.
pub(crate) fn register(handle: &CancelHandle) {
    let mut runs = RUNS.lock();
    if CANCELLED.load(Ordering::SeqCst) {
        handle.cancel();
        return;
    }
    runs.retain(|run| run.groups.strong_count() > 0);
    runs.push(handle.downgrade());
}

/// Cancels every registered run, returning how many process groups died
pub fn cancel_all() -> usize {
    let mut runs = RUNS.lock();
    CANCELLED.store(true, Ordering::SeqCst);
    runs.drain(..)
        .filter_map(|run| run.upgrade())
        .map(|handle| handle.cancel())
        .sum()
}

/// Returns true once [`cancel_all`] has run
#[must_use]
pub fn is_cancelled() -> bool {
    CANCELLED.load(Ordering::SeqCst)
}

/// Installs the termination signal handler
///
/// # Errors
///
/// Returns an error if a handler is already installed or the signal
/// cannot be hooked.
pub fn install() -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(|| {
        let killed = cancel_all();
        tracing::warn!(killed, "termination signal received, run cancelled");
        std::process::exit(i32::from(EXIT_CANCELLED));
    })
}
