//! Core types for APT operations.

use std::time::Duration;

/// An installed package as reported by `dpkg-query`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPackage {
    /// Package name
    pub name: String,
    /// Installed version string
    pub version: String,
}

/// A running package-manager process observed by the lock monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerProcess {
    /// Process id
    pub pid: u32,
    /// Exact process name (`apt` or `dpkg`)
    pub name: String,
}

impl ManagerProcess {
    /// Create a new process record.
    pub fn new(pid: u32, name: impl Into<String>) -> Self {
        Self {
            pid,
            name: name.into(),
        }
    }
}

/// Timing configuration for the lock monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockSettings {
    /// How long to wait between polls of the process table
    pub poll_interval: Duration,
    /// Total time to wait before escalating
    pub timeout: Duration,
}

impl LockSettings {
    /// Create settings with an explicit timeout and the default 3s poll.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            timeout: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_poll_interval_is_three_seconds() {
        let settings = LockSettings::default();
        assert_eq!(settings.poll_interval, Duration::from_secs(3));
    }

    #[test]
    fn test_with_timeout_keeps_poll_interval() {
        let settings = LockSettings::with_timeout(Duration::from_secs(10));
        assert_eq!(settings.timeout, Duration::from_secs(10));
        assert_eq!(settings.poll_interval, Duration::from_secs(3));
    }
}
