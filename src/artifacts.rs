//! The configuration artifacts nvup owns, with their fixed paths.
//!
//! `ArtifactSet` carries a root prefix (`/` in production) so the whole
//! reconciliation flow can run against a temporary directory in tests.

use confkit::{Artifact, Idempotence};
use std::path::{Path, PathBuf};

use crate::probe::{Arch, DistroFact};

/// Blocks the in-tree nouveau module so it cannot load alongside the
/// vendor driver.
pub const NOUVEAU_BLACKLIST_CONTENT: &str = "blacklist nouveau\noptions nouveau modeset=0\n";

/// Written once; operators may edit it afterwards.
pub const CUDA_PROFILE_CONTENT: &str = "export PATH=/usr/local/cuda/bin${PATH:+:${PATH}}\n\
export LD_LIBRARY_PATH=/usr/local/cuda/lib64${LD_LIBRARY_PATH:+:${LD_LIBRARY_PATH}}\n";

/// Keyring location referenced by the repo definition.
pub const KEYRING_REL_PATH: &str = "usr/share/keyrings/nvidia-cuda-archive-keyring.gpg";

/// Base URL of NVIDIA's CUDA apt repositories.
pub const CUDA_REPO_BASE: &str = "https://developer.download.nvidia.com/compute/cuda/repos";

/// Minimal Xorg device stanza selecting a driver backend.
pub fn xorg_device_stanza(driver: &str) -> String {
    format!(
        "Section \"Device\"\n    Identifier \"GPU0\"\n    Driver \"{driver}\"\nEndSection\n"
    )
}

/// The single repository line for NVIDIA's CUDA packages, parameterized
/// by architecture and distribution.
pub fn cuda_repo_line(arch: Arch, distro: &DistroFact) -> String {
    format!(
        "deb [signed-by=/{KEYRING_REL_PATH} arch={}] {CUDA_REPO_BASE}/debian{}/{}/ /\n",
        arch.dpkg_name(),
        distro.major,
        arch.cuda_repo_name(),
    )
}

/// Download URL for the repository signing key.
pub fn cuda_keyring_url(arch: Arch, distro: &DistroFact) -> String {
    format!(
        "{CUDA_REPO_BASE}/debian{}/{}/cuda-archive-keyring.gpg",
        distro.major,
        arch.cuda_repo_name(),
    )
}

/// The fixed artifact paths, relative to a configurable root.
#[derive(Debug, Clone)]
pub struct ArtifactSet {
    root: PathBuf,
}

impl ArtifactSet {
    /// Production set rooted at `/`.
    pub fn new() -> Self {
        Self::at_root("/")
    }

    /// Set rooted elsewhere (tests).
    pub fn at_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn rooted(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    /// Kernel-module blacklist for nouveau.
    pub fn nouveau_blacklist(&self) -> Artifact {
        Artifact::new(
            "nouveau-blacklist",
            self.rooted("etc/modprobe.d/blacklist-nouveau.conf"),
            0o644,
            Idempotence::ByContent,
        )
    }

    /// Xorg driver-selection snippet.
    pub fn xorg_driver_snippet(&self) -> Artifact {
        Artifact::new(
            "xorg-driver-snippet",
            self.rooted("etc/X11/xorg.conf.d/10-gpu-driver.conf"),
            0o644,
            Idempotence::ByContent,
        )
    }

    /// CUDA environment profile snippet; presence-idempotent because the
    /// operator may customize it after the first write.
    pub fn cuda_profile(&self) -> Artifact {
        Artifact::new(
            "cuda-profile",
            self.rooted("etc/profile.d/cuda.sh"),
            0o644,
            Idempotence::ByPresence,
        )
    }

    /// APT repository definition for NVIDIA's CUDA packages.
    pub fn cuda_repo_list(&self) -> Artifact {
        Artifact::new(
            "cuda-repo-list",
            self.rooted("etc/apt/sources.list.d/nvidia-cuda.list"),
            0o644,
            Idempotence::ByContent,
        )
    }

    /// Where the imported signing key lives.
    pub fn keyring_path(&self) -> PathBuf {
        self.rooted(KEYRING_REL_PATH)
    }

    /// The APT configuration directory (for the repo component check).
    pub fn apt_dir(&self) -> PathBuf {
        self.rooted("etc/apt")
    }

    /// Best-effort cleanup locations for `Removed`: leftover module
    /// trees and DKMS state the package purge does not own.
    pub fn driver_remnant_dirs(&self) -> Vec<PathBuf> {
        vec![
            self.rooted("usr/lib/nvidia"),
            self.rooted("var/lib/dkms/nvidia"),
        ]
    }

    /// Root prefix (exposed for hooks that build paths of their own).
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Default for ArtifactSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bookworm() -> DistroFact {
        DistroFact {
            codename: "bookworm".into(),
            major: 12,
        }
    }

    #[test]
    fn test_blacklist_is_exactly_two_lines() {
        assert_eq!(NOUVEAU_BLACKLIST_CONTENT.lines().count(), 2);
        let mut lines = NOUVEAU_BLACKLIST_CONTENT.lines();
        assert_eq!(lines.next(), Some("blacklist nouveau"));
        assert_eq!(lines.next(), Some("options nouveau modeset=0"));
    }

    #[test]
    fn test_xorg_stanza_names_driver() {
        let stanza = xorg_device_stanza("nvidia");
        assert!(stanza.starts_with("Section \"Device\""));
        assert!(stanza.contains("Driver \"nvidia\""));
        assert!(stanza.trim_end().ends_with("EndSection"));
    }

    #[test]
    fn test_cuda_repo_line_amd64() {
        let line = cuda_repo_line(Arch::Amd64, &bookworm());
        assert_eq!(
            line,
            "deb [signed-by=/usr/share/keyrings/nvidia-cuda-archive-keyring.gpg arch=amd64] \
             https://developer.download.nvidia.com/compute/cuda/repos/debian12/x86_64/ /\n"
        );
    }

    #[test]
    fn test_cuda_repo_line_arm64_uses_sbsa() {
        let line = cuda_repo_line(Arch::Arm64, &bookworm());
        assert!(line.contains("arch=arm64"));
        assert!(line.contains("/debian12/sbsa/"));
    }

    #[test]
    fn test_rooted_paths() {
        let set = ArtifactSet::at_root("/tmp/x");
        assert_eq!(
            set.nouveau_blacklist().path(),
            Path::new("/tmp/x/etc/modprobe.d/blacklist-nouveau.conf")
        );
        assert_eq!(
            set.xorg_driver_snippet().path(),
            Path::new("/tmp/x/etc/X11/xorg.conf.d/10-gpu-driver.conf")
        );
        assert_eq!(
            set.cuda_repo_list().path(),
            Path::new("/tmp/x/etc/apt/sources.list.d/nvidia-cuda.list")
        );
        assert_eq!(set.apt_dir(), Path::new("/tmp/x/etc/apt"));
    }

    #[test]
    fn test_production_paths_are_absolute() {
        let set = ArtifactSet::new();
        assert_eq!(
            set.cuda_profile().path(),
            Path::new("/etc/profile.d/cuda.sh")
        );
        assert_eq!(
            set.keyring_path(),
            Path::new("/usr/share/keyrings/nvidia-cuda-archive-keyring.gpg")
        );
    }
}
