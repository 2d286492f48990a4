//! Deadlines and forced termination
//!
//! Every spawned command runs in its own process group so that a timeout
//! kills the whole tree it started, not just the shell. [`ChildGuard`]
//! kills the group on drop, so an unwinding caller never leaks a process.
//! [`ProcessGroups`] lists the groups still running so a cancelled run can
//! kill them from another thread.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::io;
use std::process::{Child, ExitStatus};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Point in time after which a command is killed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
    minutes: u64,
}

impl Deadline {
    /// Deadline `minutes` from now; `0` means unbounded
    #[must_use]
    pub fn after_minutes(minutes: u64) -> Option<Self> {
        (minutes > 0).then(|| Self::after(Duration::from_secs(minutes * 60), minutes))
    }

    /// Deadline `duration` from now, reported as `minutes`
    #[must_use]
    pub fn after(duration: Duration, minutes: u64) -> Self {
        Self {
            at: Instant::now() + duration,
            minutes,
        }
    }

    /// Configured minutes, used in error messages
    #[must_use]
    pub fn minutes(&self) -> u64 {
        self.minutes
    }

    /// Time left, zero once expired
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// Returns true once the deadline has passed
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// The sooner of two optional deadlines
    #[must_use]
    pub fn earliest(a: Option<Self>, b: Option<Self>) -> Option<Self> {
        match (a, b) {
            (Some(a), Some(b)) => Some(if b.at < a.at { b } else { a }),
            (a, b) => a.or(b),
        }
    }
}

/// Exit code for a finished process; `128 + signal` when killed by a signal
#[must_use]
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    if let Ok(pid) = libc::pid_t::try_from(pid) {
        // SAFETY: kill(2) only sends a signal; the group id is our child's pid.
        unsafe {
            libc::kill(-pid, libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

#[derive(Debug, Default)]
struct GroupSet {
    pids: HashSet<u32>,
    closed: bool,
}

/// Process groups of the children a run has not reaped yet
#[derive(Debug, Default)]
pub struct ProcessGroups {
    inner: Mutex<GroupSet>,
}

impl ProcessGroups {
    /// Creates an empty, open set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live groups
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().pids.len()
    }

    /// Returns true if no group is live
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().pids.is_empty()
    }

    /// Returns true once [`kill_all`](Self::kill_all) has run
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Live group ids
    #[must_use]
    pub fn pids(&self) -> Vec<u32> {
        self.inner.lock().pids.iter().copied().collect()
    }

    /// Kills every live group and closes the set
    ///
    /// A group inserted afterwards is killed on the spot. Returns how many
    /// groups were signalled.
    pub fn kill_all(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.closed = true;
        let pids: Vec<u32> = inner.pids.drain().collect();
        for pid in &pids {
            kill_process_group(*pid);
        }
        pids.len()
    }

    /// Returns false if the set is closed
    fn insert(&self, pid: u32) -> bool {
        let mut inner = self.inner.lock();
        if inner.closed {
            return false;
        }
        inner.pids.insert(pid);
        true
    }

    fn remove(&self, pid: u32) {
        self.inner.lock().pids.remove(&pid);
    }
}

/// Owns a spawned child until it has been reaped
#[derive(Debug)]
pub struct ChildGuard {
    child: Child,
    reaped: bool,
    groups: Option<Arc<ProcessGroups>>,
}

impl ChildGuard {
    /// Takes ownership of `child`
    #[must_use]
    pub fn new(child: Child) -> Self {
        Self {
            child,
            reaped: false,
            groups: None,
        }
    }

    /// Takes ownership of `child` and lists its group in `groups`
    ///
    /// If `groups` was already closed the child is killed immediately.
    #[must_use]
    pub fn tracked(child: Child, groups: &Arc<ProcessGroups>) -> Self {
        let mut guard = Self::new(child);
        if groups.insert(guard.id()) {
            guard.groups = Some(Arc::clone(groups));
        } else {
            tracing::debug!(pid = guard.id(), "run cancelled, killing new process");
            guard.kill();
        }
        guard
    }

    /// OS process id
    #[must_use]
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Waits for exit, giving up at `deadline`
    ///
    /// Returns `Ok(None)` if the deadline passes first.
    ///
    /// # Errors
    ///
    /// Returns the OS error from waiting.
    pub fn wait_until(&mut self, deadline: Option<Deadline>) -> io::Result<Option<ExitStatus>> {
        let Some(deadline) = deadline else {
            let status = self.child.wait()?;
            self.mark_reaped();
            return Ok(Some(status));
        };

        loop {
            if let Some(status) = self.child.try_wait()? {
                self.mark_reaped();
                return Ok(Some(status));
            }
            if deadline.is_expired() {
                return Ok(None);
            }
            thread::sleep(POLL_INTERVAL.min(deadline.remaining()));
        }
    }

    /// Force-kills the process group and waits up to `grace` for the exit
    ///
    /// Returns the exit status if the process was reaped in time.
    pub fn terminate(&mut self, grace: Duration) -> Option<ExitStatus> {
        self.kill();
        let give_up = Instant::now() + grace;
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    self.mark_reaped();
                    return Some(status);
                }
                Ok(None) if Instant::now() < give_up => thread::sleep(POLL_INTERVAL),
                Ok(None) | Err(_) => return None,
            }
        }
    }

    fn kill(&mut self) {
        kill_process_group(self.child.id());
        let _ = self.child.kill();
    }

    fn mark_reaped(&mut self) {
        self.reaped = true;
        if let Some(groups) = self.groups.take() {
            groups.remove(self.child.id());
        }
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if !self.reaped {
            tracing::warn!(pid = self.child.id(), "killing unreaped process");
            self.kill();
            let _ = self.child.wait();
            self.mark_reaped();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn test_zero_minutes_is_unbounded() {
        assert!(Deadline::after_minutes(0).is_none());
        let deadline = Deadline::after_minutes(1).unwrap();
        assert_eq!(deadline.minutes(), 1);
        assert!(!deadline.is_expired());
        assert!(deadline.remaining() > Duration::from_secs(50));
    }

    #[test]
    fn test_earliest() {
        let soon = Deadline::after(Duration::from_millis(10), 1);
        let later = Deadline::after(Duration::from_secs(60), 2);
        assert_eq!(Deadline::earliest(Some(later), Some(soon)), Some(soon));
        assert_eq!(Deadline::earliest(None, Some(later)), Some(later));
        assert_eq!(Deadline::earliest(None, None), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_wait_until_expires_and_terminate_kills() {
        let mut command = Command::new("sleep");
        command.arg("30");
        std::os::unix::process::CommandExt::process_group(&mut command, 0);
        let mut guard = ChildGuard::new(command.spawn().unwrap());

        let deadline = Deadline::after(Duration::from_millis(100), 0);
        assert!(guard.wait_until(Some(deadline)).unwrap().is_none());

        let status = guard.terminate(Duration::from_secs(5)).unwrap();
        assert_eq!(exit_code(status), 128 + libc::SIGKILL);
    }

    #[cfg(unix)]
    #[test]
    fn test_tracked_group_is_listed_until_reaped() {
        let groups = Arc::new(ProcessGroups::new());
        let mut command = Command::new("sleep");
        command.arg("30");
        std::os::unix::process::CommandExt::process_group(&mut command, 0);
        let mut guard = ChildGuard::tracked(command.spawn().unwrap(), &groups);
        assert_eq!(groups.pids(), [guard.id()]);

        assert_eq!(groups.kill_all(), 1);
        assert!(groups.is_closed());
        let status = guard.wait_until(None).unwrap().unwrap();
        assert_eq!(exit_code(status), 128 + libc::SIGKILL);
        assert!(groups.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_closed_groups_kill_new_children() {
        let groups = Arc::new(ProcessGroups::new());
        groups.kill_all();

        let mut command = Command::new("sleep");
        command.arg("30");
        std::os::unix::process::CommandExt::process_group(&mut command, 0);
        let mut guard = ChildGuard::tracked(command.spawn().unwrap(), &groups);
        assert!(groups.is_empty());
        let status = guard.wait_until(None).unwrap().unwrap();
        assert_eq!(exit_code(status), 128 + libc::SIGKILL);
    }

    #[cfg(unix)]
    #[test]
    fn test_wait_until_returns_status() {
        let mut guard = ChildGuard::new(Command::new("sh").args(["-c", "exit 3"]).spawn().unwrap());
        let status = guard.wait_until(None).unwrap().unwrap();
        assert_eq!(exit_code(status), 3);
    }
}
