//! Production side effects: the real lock monitor, initramfs
//! regeneration, vendor downloads, and installer execution.

use anyhow::{Context, Result, bail};
use aptkit::lock::{EscalationPolicy, LockError, LockMonitor, LockObserver, OsLockSystem};
use aptkit::types::{LockSettings, ManagerProcess};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::Hooks;
use crate::artifacts::{self, ArtifactSet};
use crate::config::NvupConfig;
use crate::download::{Downloader, FALLBACK_RUNFILE_VERSION, ResolvedVersion};
use crate::probe::SystemSnapshot;
use crate::runner;
use crate::ui;

/// Real [`Hooks`] implementation for a privileged run.
pub struct SystemHooks<'a> {
    snapshot: &'a SystemSnapshot,
    artifacts: &'a ArtifactSet,
    downloader: Downloader,
    lock_settings: LockSettings,
    escalation: EscalationPolicy,
    fallback_version: String,
    download_dir: PathBuf,
}

impl<'a> SystemHooks<'a> {
    /// Build hooks from config and the probed snapshot. `assume_yes`
    /// selects the silent (force) lock escalation policy.
    pub fn new(
        config: &NvupConfig,
        snapshot: &'a SystemSnapshot,
        artifacts: &'a ArtifactSet,
        assume_yes: bool,
    ) -> Self {
        Self {
            snapshot,
            artifacts,
            downloader: Downloader::new(),
            lock_settings: config.lock.settings(),
            escalation: if assume_yes {
                EscalationPolicy::Force
            } else {
                EscalationPolicy::Confirm
            },
            fallback_version: config
                .runfile
                .fallback_version
                .clone()
                .unwrap_or_else(|| FALLBACK_RUNFILE_VERSION.to_string()),
            download_dir: std::env::temp_dir(),
        }
    }
}

/// Surfaces lock-wait progress on the terminal.
struct WaitReporter;

impl LockObserver for WaitReporter {
    fn on_wait(&self, waited: Duration, holders: &[ManagerProcess]) {
        let names: Vec<&str> = holders.iter().map(|p| p.name.as_str()).collect();
        ui::info(&format!(
            "waiting for {} to finish ({}s elapsed)",
            names.join(", "),
            waited.as_secs()
        ));
    }

    fn on_terminate(&self, process: &ManagerProcess) {
        ui::warn(&format!(
            "force-terminating {} (pid {})",
            process.name, process.pid
        ));
    }

    fn on_lock_cleared(&self, path: &Path) {
        ui::warn(&format!("removed stale lock file {}", path.display()));
    }
}

impl Hooks for SystemHooks<'_> {
    fn acquire_lock(&mut self) -> std::result::Result<(), LockError> {
        let monitor = LockMonitor::new(self.lock_settings, self.escalation);
        // A prompt with no attached terminal fails the interaction and
        // therefore counts as a refusal, never as a silent go-ahead.
        let mut confirm = |prompt: &str| {
            dialoguer::Confirm::new()
                .with_prompt(prompt.to_string())
                .default(false)
                .interact()
                .unwrap_or(false)
        };
        monitor.acquire(&OsLockSystem, &mut confirm, &WaitReporter)
    }

    fn regenerate_boot_image(&mut self) -> Result<()> {
        ui::info("Regenerating initramfs");
        let status = runner::run("update-initramfs", &["-u"])?;
        if !status.success() {
            bail!("update-initramfs exited with {status}");
        }
        Ok(())
    }

    fn resolve_runfile_version(&mut self, requested: Option<&str>) -> ResolvedVersion {
        match requested {
            Some(version) => ResolvedVersion {
                version: version.to_string(),
                fallback: false,
            },
            None => self.downloader.resolve_or_fallback(&self.fallback_version),
        }
    }

    fn fetch_runfile(&mut self, version: &str) -> Result<PathBuf> {
        self.downloader
            .fetch_runfile(version, self.snapshot.arch, &self.download_dir)
    }

    fn run_installer(&mut self, runfile: &Path) -> Result<()> {
        ui::info(&format!("Running {}", runfile.display()));
        let path = runfile.to_str().context("runfile path is not valid UTF-8")?;
        // --no-cc-version-check: Debian kernels are regularly built with
        // a newer compiler than the system default.
        let status = runner::run(path, &["--dkms", "--no-cc-version-check", "--silent"])?;
        if !status.success() {
            bail!("installer exited with {status}");
        }
        Ok(())
    }

    fn install_cuda_keyring(&mut self) -> Result<()> {
        let url = artifacts::cuda_keyring_url(self.snapshot.arch, &self.snapshot.distro);
        self.downloader
            .fetch_keyring(&url, &self.artifacts.keyring_path())
    }

    fn cleanup_driver_remnants(&mut self) -> Vec<String> {
        let mut notes = Vec::new();
        for dir in self.artifacts.driver_remnant_dirs() {
            if !dir.exists() {
                continue;
            }
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => notes.push(format!("removed leftover {}", dir.display())),
                Err(e) => log::warn!("could not remove {}: {e}", dir.display()),
            }
        }
        notes
    }

    fn active_driver_version(&mut self) -> Option<String> {
        runner::run_capture(
            "nvidia-smi",
            &["--query-gpu=driver_version", "--format=csv,noheader"],
        )
        .ok()
        .and_then(|out| out.lines().next().map(|l| l.trim().to_string()))
        .filter(|v| !v.is_empty())
    }
}
