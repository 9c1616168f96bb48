//! Backend abstraction for APT operations.
//!
//! The [`Backend`] trait defines the interface for interacting with the
//! system package manager, allowing for different implementations (real
//! apt-get/dpkg CLI, mock for testing).

pub mod apt;

use crate::error::Result;
use crate::types::InstalledPackage;

/// Backend trait for APT operations.
///
/// This trait abstracts the underlying package manager, enabling:
/// - Real CLI execution via `apt-get` and `dpkg-query`
/// - Mock implementations for testing the reconciliation flow
pub trait Backend: Send + Sync {
    /// Check if the package manager is available.
    fn is_available(&self) -> bool;

    /// Refresh the package index (`apt-get update`).
    fn update_index(&self) -> Result<()>;

    /// Install packages, optionally from a specific target release
    /// (e.g. `bookworm-backports`).
    fn install(&self, packages: &[&str], release: Option<&str>) -> Result<()>;

    /// Purge packages, removing their configuration.
    fn purge(&self, packages: &[&str]) -> Result<()>;

    /// Remove packages that were installed as dependencies and are no
    /// longer needed.
    fn autoremove(&self) -> Result<()>;

    /// Check if a package is installed.
    fn is_installed(&self, package: &str) -> Result<bool>;

    /// Get the installed version of a package, if any.
    fn installed_version(&self, package: &str) -> Result<Option<String>>;

    /// List installed packages whose name starts with `prefix`.
    fn list_installed(&self, prefix: &str) -> Result<Vec<InstalledPackage>>;
}

/// Get the default backend (real apt-get CLI).
pub fn default_backend() -> Result<apt::AptBackend> {
    apt::AptBackend::new()
}
