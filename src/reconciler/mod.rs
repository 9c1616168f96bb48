//! Driver-state reconciliation.
//!
//! One [`DriverTarget`] is selected per invocation and driven through a
//! fixed state machine. Package operations go through the
//! [`aptkit::backend::Backend`] trait and configuration files through
//! `confkit` artifacts; every other side effect (boot image, downloads,
//! the vendor installer) goes through the [`Hooks`] trait so the whole
//! machine is testable against mocks and a temp-dir artifact root.
//!
//! There is no rollback: a failure leaves every mutation already applied
//! in place (packages stay purged, written artifacts stay written). This
//! mirrors how the tool is operated in practice, under human
//! supervision, where compensating half-finished driver surgery
//! automatically would do more harm than stopping.

pub mod hooks;

use aptkit::backend::Backend;
use aptkit::lock::LockError;
use confkit::{Artifact, RemoveOutcome, WriteOutcome};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::artifacts::{self, ArtifactSet};
use crate::download::ResolvedVersion;
use crate::probe::{self, ProbeError, SystemSnapshot};

pub use hooks::SystemHooks;

/// Installed-package prefixes considered vendor packages for purging.
pub const VENDOR_PACKAGE_PREFIXES: [&str; 3] = ["nvidia-", "libnvidia-", "cuda"];

/// Metapackage (plus GPU firmware) installed from the Debian repository.
pub const STABLE_DRIVER_PACKAGES: [&str; 2] = ["nvidia-driver", "firmware-misc-nonfree"];

/// The driver metapackage checked during verification.
pub const DRIVER_METAPACKAGE: &str = "nvidia-driver";

/// The open-source Xorg driver package.
pub const OPEN_SOURCE_DRIVER_PACKAGE: &str = "xserver-xorg-video-nouveau";

/// CUDA toolkit metapackage from NVIDIA's repository.
pub const CUDA_TOOLKIT_PACKAGE: &str = "cuda-toolkit";

/// The system state a run converges to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverTarget {
    /// Vendor driver from the distribution's stable repository
    StableRepo,
    /// Vendor driver from the backports channel
    Backports,
    /// Open-source nouveau driver
    OpenSource,
    /// No vendor driver; distribution defaults restored
    Removed,
    /// Vendor `.run` installer, optionally pinned to a version
    RunInstaller {
        /// Explicit version; `None` resolves the latest
        version: Option<String>,
    },
    /// CUDA toolkit from NVIDIA's apt repository
    CudaToolkit,
}

impl DriverTarget {
    /// Human-readable target description.
    pub fn describe(&self) -> String {
        match self {
            Self::StableRepo => "NVIDIA driver (stable repository)".into(),
            Self::Backports => "NVIDIA driver (backports)".into(),
            Self::OpenSource => "open-source nouveau driver".into(),
            Self::Removed => "NVIDIA driver removed".into(),
            Self::RunInstaller { version: Some(v) } => format!("NVIDIA .run installer {v}"),
            Self::RunInstaller { version: None } => "NVIDIA .run installer (latest)".into(),
            Self::CudaToolkit => "CUDA toolkit".into(),
        }
    }

    /// Whether this target installs packages and therefore requires the
    /// contrib/non-free repository components up front.
    fn requires_repo_components(&self) -> bool {
        !matches!(self, Self::Removed)
    }
}

/// States of the reconciliation machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Validating preconditions from the snapshot
    Probing,
    /// Waiting for exclusive package-manager access
    LockWait,
    /// Removing existing vendor packages
    Purging,
    /// Installing the build toolchain and kernel headers
    InstallingDeps,
    /// Installing the driver (or toolkit) itself
    InstallingDriver,
    /// Writing/removing configuration artifacts
    ConfiguringArtifacts,
    /// Checking the installed result
    Verifying,
    /// Terminal: converged
    Done,
    /// Terminal: aborted with an error
    Failed,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Probing => "probing",
            Self::LockWait => "lock-wait",
            Self::Purging => "purging",
            Self::InstallingDeps => "installing-deps",
            Self::InstallingDriver => "installing-driver",
            Self::ConfiguringArtifacts => "configuring-artifacts",
            Self::Verifying => "verifying",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Errors that abort a reconciliation run.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A pre-flight probe condition failed
    #[error(transparent)]
    Probe(#[from] ProbeError),

    /// Exclusive package-manager access could not be gained
    #[error("could not gain exclusive package-manager access: {0}")]
    Lock(#[from] LockError),

    /// The backports channel is not enabled on this system
    #[error(
        "the {release} channel is not enabled; add it to your APT sources and run 'apt update' first"
    )]
    BackportsUnavailable {
        /// The missing release channel
        release: String,
    },

    /// The underlying package manager failed; not masked, not retried
    #[error("package operation failed: {0}")]
    Package(#[from] aptkit::Error),

    /// A configuration artifact could not be written or removed
    #[error("configuration artifact error: {0}")]
    Artifact(#[from] confkit::Error),

    /// A vendor download failed
    #[error("download failed: {0}")]
    Download(String),

    /// The vendor installer exited with an error
    #[error("vendor installer failed: {0}")]
    Installer(String),

    /// Rebuilding the boot image failed
    #[error("boot image regeneration failed: {0}")]
    BootImage(String),

    /// The installed result does not match the target
    #[error("verification failed: {message}")]
    Verify {
        /// What was expected but absent
        message: String,
    },
}

/// Side effects that are neither package operations nor artifact writes.
pub trait Hooks {
    /// Gate the run behind the package database lock (once per run).
    fn acquire_lock(&mut self) -> Result<(), LockError>;

    /// Rebuild the initramfs so module blacklist changes take effect.
    fn regenerate_boot_image(&mut self) -> anyhow::Result<()>;

    /// Resolve the runfile version: the requested one verbatim, or the
    /// latest from the vendor endpoint with fallback.
    fn resolve_runfile_version(&mut self, requested: Option<&str>) -> ResolvedVersion;

    /// Download the runfile, returning its local path.
    fn fetch_runfile(&mut self, version: &str) -> anyhow::Result<PathBuf>;

    /// Execute the downloaded installer.
    fn run_installer(&mut self, runfile: &Path) -> anyhow::Result<()>;

    /// Import NVIDIA's repository signing key.
    fn install_cuda_keyring(&mut self) -> anyhow::Result<()>;

    /// Best-effort removal of leftover module trees and DKMS state.
    /// Returns notes about what was cleaned.
    fn cleanup_driver_remnants(&mut self) -> Vec<String>;

    /// Driver version the kernel currently reports, if any.
    fn active_driver_version(&mut self) -> Option<String>;
}

/// What a completed run did.
#[derive(Debug, Default)]
pub struct Report {
    /// Every state entered, in order
    pub states: Vec<State>,
    /// Human-readable mutations applied
    pub changes: Vec<String>,
    /// Non-fatal conditions recorded along the way
    pub advisories: Vec<String>,
}

/// The planned artifact end-state for a target: `Some(content)` to
/// write, `None` to remove. Shared by the pre-apply preview, the
/// configure step, and the tests, so the three cannot drift apart.
pub fn artifact_plan(
    target: &DriverTarget,
    set: &ArtifactSet,
    snapshot: &SystemSnapshot,
) -> Vec<(Artifact, Option<String>)> {
    match target {
        DriverTarget::StableRepo | DriverTarget::Backports | DriverTarget::RunInstaller { .. } => {
            vec![
                (
                    set.nouveau_blacklist(),
                    Some(artifacts::NOUVEAU_BLACKLIST_CONTENT.to_string()),
                ),
                (
                    set.xorg_driver_snippet(),
                    Some(artifacts::xorg_device_stanza("nvidia")),
                ),
            ]
        }
        DriverTarget::OpenSource => vec![
            (set.nouveau_blacklist(), None),
            (
                set.xorg_driver_snippet(),
                Some(artifacts::xorg_device_stanza("nouveau")),
            ),
        ],
        // The blacklist is deliberately not part of the Removed plan:
        // removal does not re-add or delete it.
        DriverTarget::Removed => vec![
            (set.xorg_driver_snippet(), None),
            (set.cuda_repo_list(), None),
            (set.cuda_profile(), None),
        ],
        DriverTarget::CudaToolkit => vec![
            (
                set.cuda_repo_list(),
                Some(artifacts::cuda_repo_line(snapshot.arch, &snapshot.distro)),
            ),
            (
                set.cuda_profile(),
                Some(artifacts::CUDA_PROFILE_CONTENT.to_string()),
            ),
        ],
    }
}

/// Drives one target through the state machine.
pub struct Reconciler<'a, B: Backend> {
    backend: &'a B,
    artifacts: &'a ArtifactSet,
    snapshot: &'a SystemSnapshot,
    hooks: &'a mut dyn Hooks,
    report: Report,
}

impl<'a, B: Backend> Reconciler<'a, B> {
    /// Assemble a reconciler over an immutable snapshot.
    pub fn new(
        backend: &'a B,
        artifacts: &'a ArtifactSet,
        snapshot: &'a SystemSnapshot,
        hooks: &'a mut dyn Hooks,
    ) -> Self {
        Self {
            backend,
            artifacts,
            snapshot,
            hooks,
            report: Report::default(),
        }
    }

    /// Run to completion. On error the machine enters `Failed` and the
    /// error is returned; mutations already applied are not compensated.
    pub fn run(mut self, target: &DriverTarget) -> Result<Report, ReconcileError> {
        log::info!("reconciling towards: {}", target.describe());
        match self.drive(target) {
            Ok(()) => {
                self.enter(State::Done);
                Ok(self.report)
            }
            Err(e) => {
                let reached = self.report.states.last().copied();
                self.enter(State::Failed);
                if let Some(state) = reached {
                    log::error!("failed during {state}: {e}");
                }
                Err(e)
            }
        }
    }

    fn drive(&mut self, target: &DriverTarget) -> Result<(), ReconcileError> {
        self.enter(State::Probing);
        self.check_preconditions(target)?;

        self.enter(State::LockWait);
        self.hooks.acquire_lock()?;

        match target {
            DriverTarget::StableRepo => {
                self.enter(State::Purging);
                self.purge_vendor_packages(false)?;
                self.enter(State::InstallingDeps);
                self.install_build_deps()?;
                self.enter(State::InstallingDriver);
                self.install_repo_driver(None)?;
                self.enter(State::ConfiguringArtifacts);
                self.configure(target)?;
                self.enter(State::Verifying);
                self.verify_repo_driver()?;
            }
            DriverTarget::Backports => {
                let release = format!("{}-backports", self.snapshot.distro.codename);
                self.enter(State::Purging);
                self.purge_vendor_packages(false)?;
                self.enter(State::InstallingDeps);
                self.install_build_deps()?;
                self.enter(State::InstallingDriver);
                self.install_repo_driver(Some(release))?;
                self.enter(State::ConfiguringArtifacts);
                self.configure(target)?;
                self.enter(State::Verifying);
                self.verify_repo_driver()?;
            }
            DriverTarget::OpenSource => {
                self.enter(State::Purging);
                self.purge_vendor_packages(false)?;
                self.enter(State::InstallingDriver);
                self.backend.install(&[OPEN_SOURCE_DRIVER_PACKAGE], None)?;
                self.report
                    .changes
                    .push(format!("installed {OPEN_SOURCE_DRIVER_PACKAGE}"));
                self.enter(State::ConfiguringArtifacts);
                self.configure(target)?;
            }
            DriverTarget::Removed => {
                self.enter(State::Purging);
                self.purge_vendor_packages(true)?;
                let notes = self.hooks.cleanup_driver_remnants();
                self.report.changes.extend(notes);
                self.enter(State::ConfiguringArtifacts);
                self.configure(target)?;
            }
            DriverTarget::RunInstaller { version } => {
                let requested = version.clone();
                self.enter(State::Purging);
                self.purge_vendor_packages(false)?;
                self.enter(State::InstallingDeps);
                self.install_build_deps()?;
                self.enter(State::InstallingDriver);
                self.run_vendor_installer(requested.as_deref())?;
                self.enter(State::ConfiguringArtifacts);
                self.configure(target)?;
                self.enter(State::Verifying);
                self.verify_active_driver();
            }
            DriverTarget::CudaToolkit => {
                self.enter(State::InstallingDeps);
                self.prepare_cuda_repo()?;
                self.enter(State::InstallingDriver);
                self.backend.install(&[CUDA_TOOLKIT_PACKAGE], None)?;
                self.report
                    .changes
                    .push(format!("installed {CUDA_TOOLKIT_PACKAGE}"));
                self.enter(State::ConfiguringArtifacts);
                self.configure(target)?;
            }
        }

        Ok(())
    }

    /// Pre-flight checks against the snapshot; nothing is mutated before
    /// these pass.
    fn check_preconditions(&self, target: &DriverTarget) -> Result<(), ReconcileError> {
        if !self.snapshot.gpus.iter().any(|gpu| gpu.vendor_match) {
            return Err(ProbeError::NoGpu.into());
        }
        if target.requires_repo_components() {
            probe::check_repo_components(&self.artifacts.apt_dir())?;
        }
        Ok(())
    }

    /// Purge every installed vendor package, tolerating an empty set.
    fn purge_vendor_packages(&mut self, autoremove: bool) -> Result<(), ReconcileError> {
        let mut packages = Vec::new();
        for prefix in VENDOR_PACKAGE_PREFIXES {
            packages.extend(self.backend.list_installed(prefix)?);
        }
        packages.sort_by(|a, b| a.name.cmp(&b.name));
        packages.dedup_by(|a, b| a.name == b.name);

        if packages.is_empty() {
            log::info!("no vendor packages installed; nothing to purge");
        } else {
            let names: Vec<&str> = packages.iter().map(|p| p.name.as_str()).collect();
            log::info!("purging: {}", names.join(" "));
            self.backend.purge(&names)?;
            self.report
                .changes
                .push(format!("purged {} vendor package(s)", names.len()));
        }

        if autoremove {
            self.backend.autoremove()?;
            self.report
                .changes
                .push("removed no-longer-needed dependencies".into());
        }

        Ok(())
    }

    fn install_build_deps(&mut self) -> Result<(), ReconcileError> {
        let headers = format!("linux-headers-{}", self.snapshot.kernel_version);
        self.backend
            .install(&["build-essential", &headers, "dkms"], None)?;
        self.report
            .changes
            .push(format!("installed build toolchain, {headers}, dkms"));
        Ok(())
    }

    fn install_repo_driver(&mut self, release: Option<String>) -> Result<(), ReconcileError> {
        let result = self
            .backend
            .install(&STABLE_DRIVER_PACKAGES, release.as_deref());

        if let Err(e) = result {
            // Backports not being enabled is an expected, actionable
            // condition; surface it with its remediation hint.
            if let (aptkit::ErrorCategory::ReleaseUnavailable, Some(release)) =
                (e.category(), release)
            {
                return Err(ReconcileError::BackportsUnavailable { release });
            }
            return Err(e.into());
        }

        self.report.changes.push(match release {
            Some(release) => format!("installed {DRIVER_METAPACKAGE} from {release}"),
            None => format!("installed {DRIVER_METAPACKAGE}"),
        });
        Ok(())
    }

    fn run_vendor_installer(&mut self, requested: Option<&str>) -> Result<(), ReconcileError> {
        let resolved = self.hooks.resolve_runfile_version(requested);
        if resolved.fallback {
            self.report.advisories.push(format!(
                "latest-version lookup failed; using fallback version {}",
                resolved.version
            ));
        }

        let runfile = self
            .hooks
            .fetch_runfile(&resolved.version)
            .map_err(|e| ReconcileError::Download(format!("{e:#}")))?;
        self.hooks
            .run_installer(&runfile)
            .map_err(|e| ReconcileError::Installer(format!("{e:#}")))?;

        self.report
            .changes
            .push(format!("ran vendor installer {}", resolved.version));
        Ok(())
    }

    /// Import the signing key, write the repo definition, refresh the
    /// index. The repo artifact must exist before `update_index`, which
    /// is why it is written here rather than in the configure step (the
    /// configure step's identical write is then a no-op).
    fn prepare_cuda_repo(&mut self) -> Result<(), ReconcileError> {
        self.hooks
            .install_cuda_keyring()
            .map_err(|e| ReconcileError::Download(format!("{e:#}")))?;
        self.report.changes.push("imported CUDA signing key".into());

        let set = self.artifacts;
        let repo_list = set.cuda_repo_list();
        let line = artifacts::cuda_repo_line(self.snapshot.arch, &self.snapshot.distro);
        self.apply_write(&repo_list, &line)?;

        self.backend.update_index()?;
        Ok(())
    }

    /// Converge the artifact set for this target, then rebuild the boot
    /// image exactly once, after all blacklist decisions are final.
    fn configure(&mut self, target: &DriverTarget) -> Result<(), ReconcileError> {
        for (artifact, desired) in artifact_plan(target, self.artifacts, self.snapshot) {
            match desired {
                Some(content) => self.apply_write(&artifact, &content)?,
                None => self.apply_remove(&artifact)?,
            }
        }

        self.hooks
            .regenerate_boot_image()
            .map_err(|e| ReconcileError::BootImage(format!("{e:#}")))?;
        self.report.changes.push("regenerated boot image".into());
        Ok(())
    }

    fn verify_repo_driver(&mut self) -> Result<(), ReconcileError> {
        match self.backend.installed_version(DRIVER_METAPACKAGE)? {
            Some(version) => {
                self.report
                    .changes
                    .push(format!("{DRIVER_METAPACKAGE} {version} installed"));
            }
            None => {
                return Err(ReconcileError::Verify {
                    message: format!("{DRIVER_METAPACKAGE} is not installed after the install step"),
                });
            }
        }
        self.verify_active_driver();
        Ok(())
    }

    /// Whether the kernel already runs the new driver is informational:
    /// a reboot is usually needed first.
    fn verify_active_driver(&mut self) {
        match self.hooks.active_driver_version() {
            Some(version) => {
                self.report
                    .changes
                    .push(format!("driver {version} active"));
            }
            None => {
                self.report
                    .advisories
                    .push("driver not active yet; reboot to load the new kernel module".into());
            }
        }
    }

    fn apply_write(&mut self, artifact: &Artifact, desired: &str) -> Result<(), ReconcileError> {
        match artifact.write(desired)? {
            WriteOutcome::Written { backup } => {
                let mut note = format!("wrote {}", artifact.name());
                if let Some(backup) = backup {
                    note.push_str(&format!(" (previous version at {})", backup.display()));
                }
                log::info!("{note}");
                self.report.changes.push(note);
            }
            WriteOutcome::Unchanged => {
                log::debug!("{} already in desired state", artifact.name());
            }
        }
        Ok(())
    }

    fn apply_remove(&mut self, artifact: &Artifact) -> Result<(), ReconcileError> {
        match artifact.remove()? {
            RemoveOutcome::Removed => {
                let note = format!("removed {}", artifact.name());
                log::info!("{note}");
                self.report.changes.push(note);
            }
            RemoveOutcome::AlreadyAbsent => {
                log::debug!("{} already absent", artifact.name());
            }
        }
        Ok(())
    }

    fn enter(&mut self, state: State) {
        log::info!("state: {state}");
        self.report.states.push(state);
    }
}
