//! Vendor downloads: latest-version lookup, runfile, and signing key.
//!
//! The latest-version lookup is best-effort. When it fails, the
//! documented fallback version is used instead. That fallback is a
//! deliberately brittle compatibility escape hatch: the string ages, and
//! a stale version may not build against a new kernel. The run records
//! an advisory whenever the fallback is taken.

use anyhow::{Context, Result, anyhow};
use indicatif::{ProgressBar, ProgressStyle};
use regex::Regex;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::probe::Arch;
use crate::ui;

/// Published by NVIDIA; first token of the first line is the latest
/// driver version.
pub const VERSION_ENDPOINT: &str = "https://download.nvidia.com/XFree86/Linux-x86_64/latest.txt";

/// Used when the live lookup fails.
pub const FALLBACK_RUNFILE_VERSION: &str = "550.144.03";

/// Base URL for driver runfiles.
pub const RUNFILE_BASE: &str = "https://download.nvidia.com/XFree86";

const MAX_RUNFILE_SIZE: u64 = 800 * 1024 * 1024;
const MAX_KEYRING_SIZE: u64 = 1024 * 1024;
const MAX_LISTING_SIZE: u64 = 64 * 1024;

/// A resolved runfile version and how it was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVersion {
    /// The version string to download
    pub version: String,
    /// True when the live lookup failed and the fallback literal was used
    pub fallback: bool,
}

/// HTTP client for NVIDIA's download endpoints.
pub struct Downloader {
    agent: ureq::Agent,
    version_endpoint: String,
}

impl Downloader {
    /// Create a downloader against the production endpoints.
    pub fn new() -> Self {
        Self {
            agent: ureq::Agent::new_with_defaults(),
            version_endpoint: VERSION_ENDPOINT.to_string(),
        }
    }

    /// Create a downloader with a custom version endpoint (for testing).
    pub fn with_version_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            agent: ureq::Agent::new_with_defaults(),
            version_endpoint: endpoint.into(),
        }
    }

    /// Query the live latest-version endpoint.
    pub fn resolve_latest(&self) -> Result<String> {
        let body = self
            .agent
            .get(&self.version_endpoint)
            .header("User-Agent", "nvup")
            .call()
            .with_context(|| format!("request to {} failed", self.version_endpoint))?
            .body_mut()
            .with_config()
            .limit(MAX_LISTING_SIZE)
            .read_to_string()
            .context("failed to read version listing")?;

        parse_latest_listing(&body)
            .ok_or_else(|| anyhow!("version listing had an unexpected format: {body:?}"))
    }

    /// Resolve the latest version, falling back to `fallback` on any
    /// lookup failure. Never errors.
    pub fn resolve_or_fallback(&self, fallback: &str) -> ResolvedVersion {
        match self.resolve_latest() {
            Ok(version) => ResolvedVersion {
                version,
                fallback: false,
            },
            Err(e) => {
                log::warn!("latest-version lookup failed: {e:#}");
                ResolvedVersion {
                    version: fallback.to_string(),
                    fallback: true,
                }
            }
        }
    }

    /// Download URL for a driver runfile.
    pub fn runfile_url(version: &str, arch: Arch) -> String {
        let arch = arch.runfile_name();
        format!("{RUNFILE_BASE}/Linux-{arch}/{version}/NVIDIA-Linux-{arch}-{version}.run")
    }

    /// Download the runfile into `dest_dir`, showing a progress bar.
    /// The file is made executable.
    pub fn fetch_runfile(&self, version: &str, arch: Arch, dest_dir: &Path) -> Result<PathBuf> {
        let url = Self::runfile_url(version, arch);
        let dest = dest_dir.join(format!(
            "NVIDIA-Linux-{}-{version}.run",
            arch.runfile_name()
        ));

        ui::info(&format!("Downloading {url}"));

        let mut response = self
            .agent
            .get(&url)
            .header("User-Agent", "nvup")
            .call()
            .with_context(|| format!("download of {url} failed"))?;

        let total: Option<u64> = response
            .headers()
            .get("Content-Length")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());

        let bar = match total {
            Some(len) => {
                let bar = ProgressBar::new(len);
                bar.set_style(
                    ProgressStyle::with_template(
                        "  {bar:40.cyan/blue} {bytes}/{total_bytes} ({eta})",
                    )
                    .map_err(|e| anyhow!("progress template: {e}"))?
                    .progress_chars("=>-"),
                );
                bar
            }
            None => ProgressBar::new_spinner(),
        };

        let mut reader = response
            .body_mut()
            .with_config()
            .limit(MAX_RUNFILE_SIZE)
            .reader();

        std::fs::create_dir_all(dest_dir)
            .with_context(|| format!("could not create {}", dest_dir.display()))?;
        let mut file = std::fs::File::create(&dest)
            .with_context(|| format!("could not create {}", dest.display()))?;

        let mut buffer = [0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buffer).context("download interrupted")?;
            if n == 0 {
                break;
            }
            file.write_all(&buffer[..n])
                .with_context(|| format!("write to {} failed", dest.display()))?;
            bar.inc(n as u64);
        }
        bar.finish_and_clear();

        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&dest, std::fs::Permissions::from_mode(0o755))
            .with_context(|| format!("could not mark {} executable", dest.display()))?;

        let size = std::fs::metadata(&dest).map(|m| m.len()).unwrap_or(0);
        ui::success(&format!(
            "Downloaded {} ({})",
            dest.display(),
            ui::format_size(size)
        ));

        Ok(dest)
    }

    /// Fetch the repository signing key to `dest`.
    pub fn fetch_keyring(&self, url: &str, dest: &Path) -> Result<()> {
        let bytes = self
            .agent
            .get(url)
            .header("User-Agent", "nvup")
            .call()
            .with_context(|| format!("download of {url} failed"))?
            .body_mut()
            .with_config()
            .limit(MAX_KEYRING_SIZE)
            .read_to_vec()
            .context("failed to read keyring body")?;

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("could not create {}", parent.display()))?;
        }
        std::fs::write(dest, bytes).with_context(|| format!("write to {} failed", dest.display()))
    }
}

impl Default for Downloader {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract the version from the latest.txt listing. The format is
/// `"<version> <version>/NVIDIA-Linux-x86_64-<version>.run"` on one line.
pub fn parse_latest_listing(body: &str) -> Option<String> {
    let first_line = body.lines().find(|l| !l.trim().is_empty())?;
    let token = first_line.split_whitespace().next()?;

    let version_re = Regex::new(r"^\d+\.\d+(\.\d+)?$").ok()?;
    if version_re.is_match(token) {
        Some(token.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_latest_listing() {
        let body = "570.86.16 570.86.16/NVIDIA-Linux-x86_64-570.86.16.run\n";
        assert_eq!(parse_latest_listing(body), Some("570.86.16".to_string()));
    }

    #[test]
    fn test_parse_latest_listing_two_part_version() {
        assert_eq!(
            parse_latest_listing("396.24 396.24/...\n"),
            Some("396.24".to_string())
        );
    }

    #[test]
    fn test_parse_latest_listing_rejects_html() {
        let body = "<html><body>404 Not Found</body></html>";
        assert_eq!(parse_latest_listing(body), None);
    }

    #[test]
    fn test_parse_latest_listing_empty() {
        assert_eq!(parse_latest_listing(""), None);
        assert_eq!(parse_latest_listing("\n\n"), None);
    }

    #[test]
    fn test_runfile_url() {
        assert_eq!(
            Downloader::runfile_url("550.144.03", Arch::Amd64),
            "https://download.nvidia.com/XFree86/Linux-x86_64/550.144.03/NVIDIA-Linux-x86_64-550.144.03.run"
        );
        assert_eq!(
            Downloader::runfile_url("550.144.03", Arch::Arm64),
            "https://download.nvidia.com/XFree86/Linux-aarch64/550.144.03/NVIDIA-Linux-aarch64-550.144.03.run"
        );
    }

    #[test]
    fn test_resolve_or_fallback_on_unreachable_endpoint() {
        // Port 1 on loopback refuses immediately; no external traffic.
        let downloader = Downloader::with_version_endpoint("http://127.0.0.1:1/latest.txt");
        let resolved = downloader.resolve_or_fallback(FALLBACK_RUNFILE_VERSION);
        assert!(resolved.fallback);
        assert_eq!(resolved.version, FALLBACK_RUNFILE_VERSION);
    }

    #[test]
    fn test_fallback_version_is_version_shaped() {
        assert!(parse_latest_listing(FALLBACK_RUNFILE_VERSION).is_some());
    }
}
