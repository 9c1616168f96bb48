//! Cooperative lock monitor for the APT/dpkg package database.
//!
//! APT does not expose its lock as an acquirable primitive. This module
//! observes the processes that hold it (`apt`, `dpkg`, matched by exact
//! name), waits for them at a fixed poll interval, and escalates after a
//! timeout according to an [`EscalationPolicy`]:
//!
//! - [`EscalationPolicy::Force`] terminates the holders and clears stale
//!   lock files unconditionally (the legacy behavior).
//! - [`EscalationPolicy::Confirm`] asks the operator before terminating
//!   and before sweeping lock files, since removing a lock file while a
//!   manager is genuinely active can corrupt the package database.
//!
//! All OS access goes through the [`LockSystem`] trait so the wait loop is
//! testable without touching the process table.

use crate::types::{LockSettings, ManagerProcess};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use thiserror::Error;

/// Exact process names that hold the package database lock.
pub const MANAGER_PROCESS_NAMES: [&str; 2] = ["apt", "dpkg"];

/// Lock files that may be left behind by an interrupted manager.
pub const LOCK_FILE_PATHS: [&str; 3] = [
    "/var/lib/dpkg/lock",
    "/var/lib/dpkg/lock-frontend",
    "/var/lib/apt/lists/lock",
];

/// What to do when the wait times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationPolicy {
    /// Terminate holders and clear stale locks without asking.
    Force,
    /// Ask the operator before terminating or clearing anything.
    Confirm,
}

/// Errors from lock acquisition.
#[derive(Debug, Error)]
pub enum LockError {
    /// The holders did not exit and escalation did not clear them
    #[error("timed out after {waited}s waiting for {holders} to release the package database")]
    Timeout {
        /// Seconds spent waiting
        waited: u64,
        /// Human-readable list of holder processes
        holders: String,
    },

    /// The operator declined forced termination
    #[error("aborted by operator while the package database was locked")]
    UserAborted,

    /// Sending the termination signal failed
    #[error("failed to terminate {name} (pid {pid}): {source}")]
    Terminate {
        /// Holder process name
        name: String,
        /// Holder pid
        pid: u32,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Removing a stale lock file failed
    #[error("failed to remove stale lock file {path}: {source}")]
    ClearLock {
        /// The lock file that could not be removed
        path: PathBuf,
        /// Underlying IO error
        source: std::io::Error,
    },
}

/// OS access needed by the lock monitor.
pub trait LockSystem {
    /// List currently running package-manager processes (exact name match).
    fn active_managers(&self) -> Vec<ManagerProcess>;

    /// Force-terminate a manager process.
    fn terminate(&self, process: &ManagerProcess) -> std::io::Result<()>;

    /// Whether a lock file currently exists.
    fn lock_file_exists(&self, path: &Path) -> bool;

    /// Remove a lock file.
    fn remove_lock_file(&self, path: &Path) -> std::io::Result<()>;

    /// Sleep for the poll interval.
    fn sleep(&self, duration: Duration);
}

/// Callback trait for lock-wait progress notifications.
pub trait LockObserver {
    /// Called once per poll while holders are active.
    fn on_wait(&self, waited: Duration, holders: &[ManagerProcess]) {
        let _ = (waited, holders);
    }

    /// Called just before a holder is force-terminated.
    fn on_terminate(&self, process: &ManagerProcess) {
        let _ = process;
    }

    /// Called after a stale lock file has been removed.
    fn on_lock_cleared(&self, path: &Path) {
        let _ = path;
    }
}

/// No-op observer.
pub struct NoObserver;

impl LockObserver for NoObserver {}

/// Monitors the package database lock and gates access to it.
#[derive(Debug, Clone)]
pub struct LockMonitor {
    settings: LockSettings,
    policy: EscalationPolicy,
}

impl LockMonitor {
    /// Create a monitor with explicit timing and escalation policy.
    pub fn new(settings: LockSettings, policy: EscalationPolicy) -> Self {
        Self { settings, policy }
    }

    /// Wait until no package-manager process is active, escalating per
    /// policy on timeout, then sweep stale lock files.
    ///
    /// `confirm` is only consulted under [`EscalationPolicy::Confirm`].
    /// Returns `Ok(())` once the package database is considered free.
    pub fn acquire(
        &self,
        system: &dyn LockSystem,
        confirm: &mut dyn FnMut(&str) -> bool,
        observer: &dyn LockObserver,
    ) -> Result<(), LockError> {
        let mut waited = Duration::ZERO;

        loop {
            let holders = system.active_managers();
            if holders.is_empty() {
                break;
            }

            if waited >= self.settings.timeout {
                self.escalate(system, &holders, waited, confirm, observer)?;
                break;
            }

            observer.on_wait(waited, &holders);
            system.sleep(self.settings.poll_interval);
            waited += self.settings.poll_interval;
        }

        self.sweep_stale_locks(system, confirm, observer)
    }

    /// Force-terminate the current holders, honoring the policy.
    fn escalate(
        &self,
        system: &dyn LockSystem,
        holders: &[ManagerProcess],
        waited: Duration,
        confirm: &mut dyn FnMut(&str) -> bool,
        observer: &dyn LockObserver,
    ) -> Result<(), LockError> {
        if self.policy == EscalationPolicy::Confirm {
            let prompt = format!(
                "Package manager still running after {}s ({}). Force-terminate it?",
                waited.as_secs(),
                describe_holders(holders)
            );
            if !confirm(&prompt) {
                return Err(LockError::UserAborted);
            }
        }

        for process in holders {
            observer.on_terminate(process);
            system
                .terminate(process)
                .map_err(|source| LockError::Terminate {
                    name: process.name.clone(),
                    pid: process.pid,
                    source,
                })?;
        }

        // A holder that survives SIGKILL (e.g. stuck in uninterruptible IO)
        // means the database is still unsafe to touch.
        let survivors = system.active_managers();
        if !survivors.is_empty() {
            return Err(LockError::Timeout {
                waited: waited.as_secs(),
                holders: describe_holders(&survivors),
            });
        }

        Ok(())
    }

    /// Remove lock files left behind by an interrupted manager.
    ///
    /// Under [`EscalationPolicy::Confirm`], a declined sweep leaves the
    /// files in place and still returns `Ok`: if they are genuinely stale
    /// the next apt invocation reports the residual lock, which is safer
    /// than deleting a file a live process may own.
    fn sweep_stale_locks(
        &self,
        system: &dyn LockSystem,
        confirm: &mut dyn FnMut(&str) -> bool,
        observer: &dyn LockObserver,
    ) -> Result<(), LockError> {
        let stale: Vec<&Path> = LOCK_FILE_PATHS
            .iter()
            .map(Path::new)
            .filter(|path| system.lock_file_exists(path))
            .collect();

        if stale.is_empty() {
            return Ok(());
        }

        if self.policy == EscalationPolicy::Confirm {
            let listing = stale
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            let prompt = format!("Remove stale lock files ({listing})?");
            if !confirm(&prompt) {
                return Ok(());
            }
        }

        for path in stale {
            system
                .remove_lock_file(path)
                .map_err(|source| LockError::ClearLock {
                    path: path.to_path_buf(),
                    source,
                })?;
            observer.on_lock_cleared(path);
        }

        Ok(())
    }
}

fn describe_holders(holders: &[ManagerProcess]) -> String {
    holders
        .iter()
        .map(|p| format!("{} pid {}", p.name, p.pid))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Real [`LockSystem`] backed by `pgrep`/`kill` and the filesystem.
pub struct OsLockSystem;

impl LockSystem for OsLockSystem {
    fn active_managers(&self) -> Vec<ManagerProcess> {
        let mut managers = Vec::new();
        for name in MANAGER_PROCESS_NAMES {
            let output = Command::new("pgrep").args(["-x", name]).output();
            let Ok(output) = output else { continue };
            if !output.status.success() {
                continue;
            }
            let stdout = String::from_utf8_lossy(&output.stdout);
            for line in stdout.lines() {
                if let Ok(pid) = line.trim().parse::<u32>() {
                    managers.push(ManagerProcess::new(pid, name));
                }
            }
        }
        managers
    }

    fn terminate(&self, process: &ManagerProcess) -> std::io::Result<()> {
        let status = Command::new("kill")
            .args(["-9", &process.pid.to_string()])
            .status()?;
        if status.success() {
            Ok(())
        } else {
            Err(std::io::Error::other(format!(
                "kill -9 {} exited with {status}",
                process.pid
            )))
        }
    }

    fn lock_file_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn remove_lock_file(&self, path: &Path) -> std::io::Result<()> {
        std::fs::remove_file(path)
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    /// Simulated system: a holder that exits after `polls_until_free`
    /// polls, plus optional stale lock files.
    struct FakeSystem {
        polls_until_free: Cell<u32>,
        terminated: RefCell<Vec<u32>>,
        lock_files: RefCell<Vec<PathBuf>>,
        slept: Cell<u32>,
        kill_survives: bool,
    }

    impl FakeSystem {
        fn with_holder_for(polls: u32) -> Self {
            Self {
                polls_until_free: Cell::new(polls),
                terminated: RefCell::new(Vec::new()),
                lock_files: RefCell::new(Vec::new()),
                slept: Cell::new(0),
                kill_survives: false,
            }
        }

        fn never_ending() -> Self {
            Self::with_holder_for(u32::MAX)
        }

        fn with_stale_locks(paths: &[&str]) -> Self {
            let system = Self::with_holder_for(0);
            *system.lock_files.borrow_mut() = paths.iter().map(PathBuf::from).collect();
            system
        }
    }

    impl LockSystem for FakeSystem {
        fn active_managers(&self) -> Vec<ManagerProcess> {
            if self.polls_until_free.get() == 0 {
                Vec::new()
            } else {
                vec![ManagerProcess::new(4242, "apt")]
            }
        }

        fn terminate(&self, process: &ManagerProcess) -> std::io::Result<()> {
            self.terminated.borrow_mut().push(process.pid);
            if !self.kill_survives {
                self.polls_until_free.set(0);
            }
            Ok(())
        }

        fn lock_file_exists(&self, path: &Path) -> bool {
            self.lock_files.borrow().iter().any(|p| p == path)
        }

        fn remove_lock_file(&self, path: &Path) -> std::io::Result<()> {
            self.lock_files.borrow_mut().retain(|p| p != path);
            Ok(())
        }

        fn sleep(&self, _duration: Duration) {
            self.slept.set(self.slept.get() + 1);
            let remaining = self.polls_until_free.get();
            if remaining != u32::MAX && remaining > 0 {
                self.polls_until_free.set(remaining - 1);
            }
        }
    }

    fn monitor(policy: EscalationPolicy) -> LockMonitor {
        let settings = LockSettings {
            poll_interval: Duration::from_secs(3),
            timeout: Duration::from_secs(30),
        };
        LockMonitor::new(settings, policy)
    }

    fn never_confirm(_: &str) -> bool {
        false
    }

    fn always_confirm(_: &str) -> bool {
        true
    }

    #[test]
    fn test_holder_exits_before_timeout_no_escalation() {
        // Holder ends after 4 polls: 4 * 3s = 12s < 30s timeout.
        let system = FakeSystem::with_holder_for(4);
        let result = monitor(EscalationPolicy::Confirm).acquire(
            &system,
            &mut never_confirm,
            &NoObserver,
        );
        assert!(result.is_ok());
        assert!(system.terminated.borrow().is_empty());
        assert_eq!(system.slept.get(), 4);
    }

    #[test]
    fn test_confirmed_policy_negative_confirmation_aborts_without_kill() {
        let system = FakeSystem::never_ending();
        let result = monitor(EscalationPolicy::Confirm).acquire(
            &system,
            &mut never_confirm,
            &NoObserver,
        );
        assert!(matches!(result, Err(LockError::UserAborted)));
        assert!(system.terminated.borrow().is_empty());
    }

    #[test]
    fn test_force_policy_terminates_after_timeout() {
        let system = FakeSystem::never_ending();
        let result = monitor(EscalationPolicy::Force).acquire(
            &system,
            &mut never_confirm,
            &NoObserver,
        );
        assert!(result.is_ok());
        assert_eq!(*system.terminated.borrow(), vec![4242]);
        // 30s timeout at 3s polls = 10 sleeps before escalation
        assert_eq!(system.slept.get(), 10);
    }

    #[test]
    fn test_surviving_holder_after_kill_is_timeout() {
        let mut system = FakeSystem::never_ending();
        system.kill_survives = true;
        let result = monitor(EscalationPolicy::Force).acquire(
            &system,
            &mut always_confirm,
            &NoObserver,
        );
        assert!(matches!(result, Err(LockError::Timeout { .. })));
    }

    #[test]
    fn test_force_policy_sweeps_stale_locks_unconditionally() {
        let system = FakeSystem::with_stale_locks(&LOCK_FILE_PATHS);
        let result = monitor(EscalationPolicy::Force).acquire(
            &system,
            &mut never_confirm,
            &NoObserver,
        );
        assert!(result.is_ok());
        assert!(system.lock_files.borrow().is_empty());
    }

    #[test]
    fn test_confirmed_policy_declined_sweep_leaves_files() {
        let system = FakeSystem::with_stale_locks(&["/var/lib/dpkg/lock"]);
        let result = monitor(EscalationPolicy::Confirm).acquire(
            &system,
            &mut never_confirm,
            &NoObserver,
        );
        assert!(result.is_ok());
        assert_eq!(system.lock_files.borrow().len(), 1);
    }

    #[test]
    fn test_confirmed_policy_accepted_sweep_removes_files() {
        let system = FakeSystem::with_stale_locks(&["/var/lib/dpkg/lock", "/var/lib/apt/lists/lock"]);
        let result = monitor(EscalationPolicy::Confirm).acquire(
            &system,
            &mut always_confirm,
            &NoObserver,
        );
        assert!(result.is_ok());
        assert!(system.lock_files.borrow().is_empty());
    }

    #[test]
    fn test_observer_sees_waits() {
        struct CountingObserver(Cell<u32>);
        impl LockObserver for CountingObserver {
            fn on_wait(&self, _waited: Duration, _holders: &[ManagerProcess]) {
                self.0.set(self.0.get() + 1);
            }
        }

        let system = FakeSystem::with_holder_for(3);
        let observer = CountingObserver(Cell::new(0));
        monitor(EscalationPolicy::Force)
            .acquire(&system, &mut never_confirm, &observer)
            .unwrap();
        assert_eq!(observer.0.get(), 3);
    }
}
