//! Error types for APT operations.
//!
//! Errors are categorized from apt's stderr so callers can react to the
//! specific failure (lock contention, missing release channel, network)
//! with appropriate user feedback. There is no retry machinery here:
//! package operations fail loudly and exactly once.

use thiserror::Error;

/// Categories of APT errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Network-related errors (fetch failures, DNS, mirrors unreachable)
    Network,
    /// Package not found in any configured source
    NotFound,
    /// The dpkg/apt database lock is held by another process
    LockHeld,
    /// The requested release channel is not configured on this system
    ReleaseUnavailable,
    /// Permission denied (not running as root)
    Permission,
    /// apt-get not found or not executable
    AptNotFound,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Network => "Network connectivity issue",
            Self::NotFound => "Package not found",
            Self::LockHeld => "Package database is locked",
            Self::ReleaseUnavailable => "Release channel not configured",
            Self::Permission => "Permission denied",
            Self::AptNotFound => "apt-get not installed",
            Self::Other => "Unexpected error",
        }
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Network => "Check your internet connection and the configured mirrors",
            Self::NotFound => "Verify the package name and that contrib/non-free are enabled",
            Self::LockHeld => "Wait for the other package manager process to finish",
            Self::ReleaseUnavailable => {
                "Add the backports line to /etc/apt/sources.list and run apt update"
            }
            Self::Permission => "Run the command as root",
            Self::AptNotFound => "This tool only supports Debian-based systems with apt",
            Self::Other => "Check the error details for more information",
        }
    }
}

/// Errors that can occur during APT operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Network-related error while fetching indexes or packages
    #[error("network error: {message}")]
    Network {
        /// Detailed error message from the failed fetch
        message: String,
    },

    /// Package not found in any configured source
    #[error("package not found: {name}")]
    NotFound {
        /// Name of the package that could not be located
        name: String,
    },

    /// The dpkg/apt database lock is held by another process
    #[error("package database locked: {message}")]
    LockHeld {
        /// The lock diagnostic apt printed
        message: String,
    },

    /// The requested release channel (e.g. `bookworm-backports`) is absent
    #[error("release not available: {release}")]
    ReleaseUnavailable {
        /// The release channel apt rejected
        release: String,
    },

    /// Permission denied
    #[error("permission denied: {message}")]
    Permission {
        /// Details about what permission was denied
        message: String,
    },

    /// apt-get is not installed or not found in PATH
    #[error("apt-get not found; this system does not appear to be Debian-based")]
    AptNotFound,

    /// Command execution failed
    #[error("command failed: {message}")]
    CommandFailed {
        /// Description of what command failed
        message: String,
        /// Standard error output from the failed command
        stderr: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Network { .. } => ErrorCategory::Network,
            Error::NotFound { .. } => ErrorCategory::NotFound,
            Error::LockHeld { .. } => ErrorCategory::LockHeld,
            Error::ReleaseUnavailable { .. } => ErrorCategory::ReleaseUnavailable,
            Error::Permission { .. } => ErrorCategory::Permission,
            Error::AptNotFound => ErrorCategory::AptNotFound,
            _ => ErrorCategory::Other,
        }
    }

    /// Create an error from apt-get/dpkg command output.
    ///
    /// Analyzes stderr to categorize the error appropriately. `release` is
    /// the target release channel of the failed operation, if any, so a
    /// missing-release diagnostic can name it.
    pub fn from_apt_output(stderr: &str, package_name: Option<&str>, release: Option<&str>) -> Self {
        let stderr_lower = stderr.to_lowercase();

        // Lock contention
        if stderr_lower.contains("could not get lock")
            || stderr_lower.contains("is another process using it")
            || stderr_lower.contains("unable to acquire the dpkg frontend lock")
        {
            return Error::LockHeld {
                message: stderr.trim().to_string(),
            };
        }

        // Missing release channel (backports not enabled)
        if stderr_lower.contains("the value") && stderr_lower.contains("is invalid for apt::default-release")
            || stderr_lower.contains("release") && stderr_lower.contains("does not have a release file")
        {
            return Error::ReleaseUnavailable {
                release: release.unwrap_or("unknown").to_string(),
            };
        }

        // Network errors
        if stderr_lower.contains("temporary failure resolving")
            || stderr_lower.contains("could not resolve")
            || stderr_lower.contains("connection failed")
            || stderr_lower.contains("connection timed out")
            || stderr_lower.contains("failed to fetch")
            || stderr_lower.contains("unable to fetch some archives")
        {
            return Error::Network {
                message: stderr.trim().to_string(),
            };
        }

        // Not found errors
        if stderr_lower.contains("unable to locate package")
            || stderr_lower.contains("has no installation candidate")
            || stderr_lower.contains("couldn't find any package")
        {
            return Error::NotFound {
                name: package_name.unwrap_or("unknown").to_string(),
            };
        }

        // Permission errors
        if stderr_lower.contains("permission denied")
            || stderr_lower.contains("are you root")
            || stderr_lower.contains("operation not permitted")
        {
            return Error::Permission {
                message: stderr.trim().to_string(),
            };
        }

        // Default to command failed
        Error::CommandFailed {
            message: format!(
                "apt command failed{}",
                package_name
                    .map(|n| format!(" for {n}"))
                    .unwrap_or_default()
            ),
            stderr: stderr.trim().to_string(),
        }
    }
}

/// Result type for APT operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_apt_output_lock_held() {
        let err = Error::from_apt_output(
            "E: Could not get lock /var/lib/dpkg/lock-frontend. It is held by process 1234 (apt)",
            None,
            None,
        );
        assert_eq!(err.category(), ErrorCategory::LockHeld);
    }

    #[test]
    fn test_from_apt_output_release_unavailable() {
        let err = Error::from_apt_output(
            "E: The value 'bookworm-backports' is invalid for APT::Default-Release as such a release is not available in the sources",
            Some("nvidia-driver"),
            Some("bookworm-backports"),
        );
        assert_eq!(err.category(), ErrorCategory::ReleaseUnavailable);
        match err {
            Error::ReleaseUnavailable { release } => assert_eq!(release, "bookworm-backports"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_from_apt_output_network() {
        let err = Error::from_apt_output(
            "W: Failed to fetch http://deb.debian.org/debian/dists/bookworm/InRelease  Temporary failure resolving 'deb.debian.org'",
            None,
            None,
        );
        assert_eq!(err.category(), ErrorCategory::Network);
    }

    #[test]
    fn test_from_apt_output_not_found() {
        let err = Error::from_apt_output(
            "E: Unable to locate package nvidia-driver",
            Some("nvidia-driver"),
            None,
        );
        assert_eq!(err.category(), ErrorCategory::NotFound);
    }

    #[test]
    fn test_from_apt_output_permission() {
        let err = Error::from_apt_output(
            "E: Could not open lock file /var/lib/dpkg/lock-frontend - open (13: Permission denied), are you root?",
            None,
            None,
        );
        // "Could not open lock file" is a permissions problem, not contention
        assert_eq!(err.category(), ErrorCategory::Permission);
    }

    #[test]
    fn test_from_apt_output_generic() {
        let err = Error::from_apt_output("E: Sub-process /usr/bin/dpkg returned an error code (1)", None, None);
        assert_eq!(err.category(), ErrorCategory::Other);
    }

    #[test]
    fn test_category_advice_names_backports_remediation() {
        assert!(
            ErrorCategory::ReleaseUnavailable
                .advice()
                .contains("backports")
        );
    }
}
