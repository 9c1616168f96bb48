//! Read-only system facts gathered once at startup.
//!
//! Each sub-probe tolerates the absence of its underlying command or
//! file: no `nvidia-smi` means "no driver version", not a crash. Only
//! two conditions are fatal here: no NVIDIA GPU on the PCI bus, and an
//! architecture outside the supported set. The repository-component
//! check is a separate pre-flight gate used by installation targets
//! only.

use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

use crate::runner;

/// Vendor string matched (case-insensitively) against PCI descriptions.
pub const VENDOR: &str = "nvidia";

/// Repository components that must be enabled before any package from
/// the non-free tree can be installed.
pub const REQUIRED_COMPONENTS: [&str; 2] = ["contrib", "non-free"];

/// Fatal probe failures.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// No display-class PCI device matched the vendor
    #[error("no NVIDIA GPU detected on the PCI bus")]
    NoGpu,

    /// dpkg reported an architecture outside the supported set
    #[error("unsupported architecture '{0}' (supported: amd64, arm64)")]
    UnsupportedArch(String),

    /// /etc/os-release did not yield a codename and major version
    #[error("could not determine the distribution release from /etc/os-release")]
    UnknownDistro,

    /// Required repository components are not enabled
    #[error("required repository component(s) missing from APT sources: {}", missing.join(", "))]
    MissingRepoComponents {
        /// Which of the required markers were not found
        missing: Vec<String>,
    },
}

/// A display-class PCI device.
#[derive(Debug, Clone, Serialize)]
pub struct GpuFact {
    /// Whether the description matched the target vendor
    pub vendor_match: bool,
    /// The raw PCI description line
    pub description: String,
}

/// Supported dpkg architectures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    /// x86_64
    Amd64,
    /// aarch64
    Arm64,
}

impl Arch {
    /// Parse `dpkg --print-architecture` output.
    pub fn from_dpkg(name: &str) -> Option<Self> {
        match name.trim() {
            "amd64" => Some(Self::Amd64),
            "arm64" => Some(Self::Arm64),
            _ => None,
        }
    }

    /// Architecture token used in NVIDIA runfile names.
    pub fn runfile_name(self) -> &'static str {
        match self {
            Self::Amd64 => "x86_64",
            Self::Arm64 => "aarch64",
        }
    }

    /// Architecture path segment in NVIDIA's CUDA apt repository.
    pub fn cuda_repo_name(self) -> &'static str {
        match self {
            Self::Amd64 => "x86_64",
            Self::Arm64 => "sbsa",
        }
    }

    /// dpkg architecture name.
    pub fn dpkg_name(self) -> &'static str {
        match self {
            Self::Amd64 => "amd64",
            Self::Arm64 => "arm64",
        }
    }
}

/// Secure Boot state as reported by mokutil.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SecureBoot {
    /// Secure Boot is enabled; unsigned modules may fail to load
    Enabled,
    /// Secure Boot is disabled
    Disabled,
    /// mokutil absent or inconclusive
    Unknown,
}

/// Distribution identity from /etc/os-release.
#[derive(Debug, Clone, Serialize)]
pub struct DistroFact {
    /// Release codename (e.g. `bookworm`)
    pub codename: String,
    /// Major version number (e.g. 12)
    pub major: u32,
}

/// Immutable snapshot of the system, taken once per run and passed by
/// value into the reconciler.
#[derive(Debug, Clone, Serialize)]
pub struct SystemSnapshot {
    /// All display-class PCI devices found
    pub gpus: Vec<GpuFact>,
    /// Running kernel release (`uname -r`)
    pub kernel_version: String,
    /// Desktop session type (`x11`, `wayland`, or `unknown`)
    pub session_type: String,
    /// Secure Boot state
    pub secure_boot: SecureBoot,
    /// Distribution identity
    pub distro: DistroFact,
    /// dpkg architecture
    pub arch: Arch,
    /// Currently loaded NVIDIA driver version, if any
    pub driver_version: Option<String>,
}

impl SystemSnapshot {
    /// Non-fatal conditions worth surfacing to the operator. None of
    /// these alter the reconciliation outcome.
    pub fn advisories(&self) -> Vec<String> {
        let mut notes = Vec::new();
        if self.secure_boot == SecureBoot::Enabled {
            notes.push(
                "Secure Boot is enabled; unsigned kernel modules may fail to load until enrolled"
                    .to_string(),
            );
        }
        if self.session_type == "wayland" {
            notes.push("running under Wayland; some driver features only apply to Xorg".to_string());
        }
        if self.driver_version.is_none() {
            notes.push("no NVIDIA driver is currently active".to_string());
        }
        notes
    }
}

/// Take the full snapshot. Fatal only on missing GPU, unknown distro, or
/// unsupported architecture.
pub fn probe() -> Result<SystemSnapshot, ProbeError> {
    let gpus = probe_gpus()?;

    let kernel_version = runner::run_capture("uname", &["-r"]).unwrap_or_else(|_| "unknown".into());

    let session_type = std::env::var("XDG_SESSION_TYPE")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".into());

    let secure_boot = probe_secure_boot();

    let os_release =
        std::fs::read_to_string("/etc/os-release").map_err(|_| ProbeError::UnknownDistro)?;
    let distro = parse_os_release(&os_release).ok_or(ProbeError::UnknownDistro)?;

    let arch_raw = runner::run_capture("dpkg", &["--print-architecture"])
        .map_err(|_| ProbeError::UnsupportedArch("unknown".into()))?;
    let arch = Arch::from_dpkg(&arch_raw).ok_or(ProbeError::UnsupportedArch(arch_raw))?;

    let driver_version = probe_driver_version();

    Ok(SystemSnapshot {
        gpus,
        kernel_version,
        session_type,
        secure_boot,
        distro,
        arch,
        driver_version,
    })
}

/// Scan the PCI bus for display-class devices. Zero vendor matches is
/// fatal: every downstream action targets that vendor's driver.
fn probe_gpus() -> Result<Vec<GpuFact>, ProbeError> {
    let listing = runner::run_capture("lspci", &[]).map_err(|_| ProbeError::NoGpu)?;
    let gpus = parse_gpu_listing(&listing);
    if gpus.iter().any(|gpu| gpu.vendor_match) {
        Ok(gpus)
    } else {
        Err(ProbeError::NoGpu)
    }
}

fn probe_secure_boot() -> SecureBoot {
    let Ok(output) = runner::run_capture("mokutil", &["--sb-state"]) else {
        return SecureBoot::Unknown;
    };
    let lower = output.to_lowercase();
    if lower.contains("secureboot enabled") {
        SecureBoot::Enabled
    } else if lower.contains("secureboot disabled") {
        SecureBoot::Disabled
    } else {
        SecureBoot::Unknown
    }
}

fn probe_driver_version() -> Option<String> {
    let output = runner::run_capture(
        "nvidia-smi",
        &["--query-gpu=driver_version", "--format=csv,noheader"],
    )
    .ok()?;
    let version = output.lines().next()?.trim();
    if version.is_empty() {
        None
    } else {
        Some(version.to_string())
    }
}

/// Extract display-class entries from `lspci` output.
fn parse_gpu_listing(listing: &str) -> Vec<GpuFact> {
    listing
        .lines()
        .filter(|line| is_display_class(line))
        .map(|line| GpuFact {
            vendor_match: line.to_lowercase().contains(VENDOR),
            description: line.trim().to_string(),
        })
        .collect()
}

fn is_display_class(line: &str) -> bool {
    line.contains("VGA compatible controller")
        || line.contains("3D controller")
        || line.contains("Display controller")
}

/// Parse VERSION_CODENAME and VERSION_ID out of /etc/os-release content.
fn parse_os_release(content: &str) -> Option<DistroFact> {
    let mut codename = None;
    let mut major = None;

    for line in content.lines() {
        if let Some(value) = line.strip_prefix("VERSION_CODENAME=") {
            codename = Some(value.trim().trim_matches('"').to_string());
        } else if let Some(value) = line.strip_prefix("VERSION_ID=") {
            let value = value.trim().trim_matches('"');
            major = value.split('.').next().and_then(|v| v.parse::<u32>().ok());
        }
    }

    Some(DistroFact {
        codename: codename.filter(|c| !c.is_empty())?,
        major: major?,
    })
}

// ============================================================================
// Repository component check
// ============================================================================

/// Verify that every required repository component is enabled somewhere
/// in the APT sources under `apt_dir` (normally `/etc/apt`). The two
/// markers may appear in any order and in different files. Installation
/// targets call this before mutating anything; removal does not.
pub fn check_repo_components(apt_dir: &Path) -> Result<(), ProbeError> {
    let mut found: Vec<&str> = Vec::new();

    for path in source_files(apt_dir) {
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        for component in components_in_source(&content) {
            for required in REQUIRED_COMPONENTS {
                if component == required && !found.contains(&required) {
                    found.push(required);
                }
            }
        }
    }

    let missing: Vec<String> = REQUIRED_COMPONENTS
        .iter()
        .filter(|&&r| !found.contains(&r))
        .map(|&r| r.to_string())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ProbeError::MissingRepoComponents { missing })
    }
}

/// All APT source files: the classic `sources.list` plus everything in
/// `sources.list.d` with a `.list` or `.sources` extension.
fn source_files(apt_dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let classic = apt_dir.join("sources.list");
    if classic.exists() {
        files.push(classic);
    }

    let dropin_dir = apt_dir.join("sources.list.d");
    if dropin_dir.is_dir() {
        for entry in WalkDir::new(&dropin_dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            let ext = path.extension().and_then(|e| e.to_str());
            if matches!(ext, Some("list") | Some("sources")) {
                files.push(path.to_path_buf());
            }
        }
    }

    files
}

/// Component tokens from one source file, covering both the one-line
/// `deb ...` format and the deb822 `Components:` field.
fn components_in_source(content: &str) -> Vec<String> {
    let mut components = Vec::new();

    for line in content.lines() {
        let line = line.trim();
        if line.starts_with('#') {
            continue;
        }

        if line.starts_with("deb ") || line.starts_with("deb-src ") {
            // deb [options] uri suite component...
            let stripped = match (line.find('['), line.find(']')) {
                (Some(start), Some(end)) if end > start => {
                    format!("{}{}", &line[..start], &line[end + 1..])
                }
                _ => line.to_string(),
            };
            components.extend(stripped.split_whitespace().skip(3).map(str::to_string));
        } else if let Some(value) = line.strip_prefix("Components:") {
            components.extend(value.split_whitespace().map(str::to_string));
        }
    }

    components
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const LSPCI_WITH_NVIDIA: &str = "\
00:02.0 VGA compatible controller: Intel Corporation Raptor Lake-S UHD Graphics (rev 04)
01:00.0 VGA compatible controller: NVIDIA Corporation AD104 [GeForce RTX 4070] (rev a1)
01:00.1 Audio device: NVIDIA Corporation AD104 High Definition Audio Controller (rev a1)";

    #[test]
    fn test_parse_gpu_listing_matches_vendor() {
        let gpus = parse_gpu_listing(LSPCI_WITH_NVIDIA);
        assert_eq!(gpus.len(), 2);
        assert!(!gpus[0].vendor_match);
        assert!(gpus[1].vendor_match);
        assert!(gpus[1].description.contains("RTX 4070"));
    }

    #[test]
    fn test_parse_gpu_listing_ignores_audio_function() {
        let gpus = parse_gpu_listing(LSPCI_WITH_NVIDIA);
        assert!(gpus.iter().all(|g| !g.description.contains("Audio")));
    }

    #[test]
    fn test_parse_gpu_listing_3d_controller() {
        let gpus =
            parse_gpu_listing("01:00.0 3D controller: NVIDIA Corporation GA107M [GeForce RTX 3050]");
        assert_eq!(gpus.len(), 1);
        assert!(gpus[0].vendor_match);
    }

    #[test]
    fn test_parse_os_release_debian() {
        let content = "PRETTY_NAME=\"Debian GNU/Linux 12 (bookworm)\"\n\
                       VERSION_ID=\"12\"\n\
                       VERSION_CODENAME=bookworm\n";
        let distro = parse_os_release(content).unwrap();
        assert_eq!(distro.codename, "bookworm");
        assert_eq!(distro.major, 12);
    }

    #[test]
    fn test_parse_os_release_ubuntu_dotted_version() {
        let content = "VERSION_ID=\"24.04\"\nVERSION_CODENAME=noble\n";
        let distro = parse_os_release(content).unwrap();
        assert_eq!(distro.codename, "noble");
        assert_eq!(distro.major, 24);
    }

    #[test]
    fn test_parse_os_release_missing_codename() {
        assert!(parse_os_release("VERSION_ID=\"12\"\n").is_none());
    }

    #[test]
    fn test_arch_from_dpkg() {
        assert_eq!(Arch::from_dpkg("amd64"), Some(Arch::Amd64));
        assert_eq!(Arch::from_dpkg("arm64\n"), Some(Arch::Arm64));
        assert_eq!(Arch::from_dpkg("i386"), None);
    }

    #[test]
    fn test_arch_names() {
        assert_eq!(Arch::Amd64.runfile_name(), "x86_64");
        assert_eq!(Arch::Arm64.runfile_name(), "aarch64");
        assert_eq!(Arch::Arm64.cuda_repo_name(), "sbsa");
    }

    fn apt_dir_with(main_list: &str, dropins: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("sources.list"), main_list).unwrap();
        let dropin_dir = dir.path().join("sources.list.d");
        fs::create_dir_all(&dropin_dir).unwrap();
        for (name, content) in dropins {
            fs::write(dropin_dir.join(name), content).unwrap();
        }
        dir
    }

    #[test]
    fn test_repo_components_both_present() {
        let dir = apt_dir_with(
            "deb http://deb.debian.org/debian bookworm main contrib non-free non-free-firmware\n",
            &[],
        );
        assert!(check_repo_components(dir.path()).is_ok());
    }

    #[test]
    fn test_repo_components_order_independent() {
        let dir = apt_dir_with(
            "deb http://deb.debian.org/debian bookworm non-free main contrib\n",
            &[],
        );
        assert!(check_repo_components(dir.path()).is_ok());
    }

    #[test]
    fn test_repo_components_split_across_files() {
        let dir = apt_dir_with(
            "deb http://deb.debian.org/debian bookworm main contrib\n",
            &[(
                "extra.list",
                "deb http://deb.debian.org/debian bookworm main non-free\n",
            )],
        );
        assert!(check_repo_components(dir.path()).is_ok());
    }

    #[test]
    fn test_repo_components_missing_non_free() {
        let dir = apt_dir_with(
            "deb http://deb.debian.org/debian bookworm main contrib\n",
            &[],
        );
        let err = check_repo_components(dir.path()).unwrap_err();
        match err {
            ProbeError::MissingRepoComponents { missing } => {
                assert_eq!(missing, vec!["non-free".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_repo_components_missing_both() {
        let dir = apt_dir_with("deb http://deb.debian.org/debian bookworm main\n", &[]);
        let err = check_repo_components(dir.path()).unwrap_err();
        match err {
            ProbeError::MissingRepoComponents { missing } => assert_eq!(missing.len(), 2),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_repo_components_commented_lines_ignored() {
        let dir = apt_dir_with(
            "# deb http://deb.debian.org/debian bookworm main contrib non-free\n\
             deb http://deb.debian.org/debian bookworm main\n",
            &[],
        );
        assert!(check_repo_components(dir.path()).is_err());
    }

    #[test]
    fn test_repo_components_deb822_format() {
        let dir = apt_dir_with(
            "",
            &[(
                "debian.sources",
                "Types: deb\nURIs: http://deb.debian.org/debian\n\
                 Suites: bookworm\nComponents: main contrib non-free\n",
            )],
        );
        assert!(check_repo_components(dir.path()).is_ok());
    }

    #[test]
    fn test_repo_components_bracketed_options_are_skipped() {
        let dir = apt_dir_with(
            "deb [signed-by=/usr/share/keyrings/k.gpg arch=amd64] http://deb.debian.org/debian bookworm contrib non-free\n",
            &[],
        );
        assert!(check_repo_components(dir.path()).is_ok());
    }

    #[test]
    fn test_repo_components_non_free_firmware_does_not_satisfy_non_free() {
        let dir = apt_dir_with(
            "deb http://deb.debian.org/debian bookworm main contrib non-free-firmware\n",
            &[],
        );
        assert!(check_repo_components(dir.path()).is_err());
    }

    #[test]
    fn test_advisories_secure_boot_and_wayland() {
        let snapshot = SystemSnapshot {
            gpus: vec![GpuFact {
                vendor_match: true,
                description: "NVIDIA".into(),
            }],
            kernel_version: "6.1.0-18-amd64".into(),
            session_type: "wayland".into(),
            secure_boot: SecureBoot::Enabled,
            distro: DistroFact {
                codename: "bookworm".into(),
                major: 12,
            },
            arch: Arch::Amd64,
            driver_version: Some("550.144.03".into()),
        };
        let notes = snapshot.advisories();
        assert_eq!(notes.len(), 2);
        assert!(notes[0].contains("Secure Boot"));
        assert!(notes[1].contains("Wayland"));
    }
}
