//! Real APT CLI backend using `apt-get` and `dpkg-query` commands.

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::types::InstalledPackage;
use std::process::Command;

/// Backend that executes real `apt-get`/`dpkg-query` commands.
pub struct AptBackend {
    /// Path to the apt-get executable
    apt_get_path: String,
}

impl AptBackend {
    /// Create a new AptBackend.
    ///
    /// Returns an error if apt-get is not installed.
    pub fn new() -> Result<Self> {
        let apt_get_path = find_apt_get()?;
        Ok(Self { apt_get_path })
    }

    /// Run an apt-get command non-interactively and return output.
    fn run_apt(&self, args: &[&str]) -> Result<std::process::Output> {
        let output = Command::new(&self.apt_get_path)
            .env("DEBIAN_FRONTEND", "noninteractive")
            .args(args)
            .output()
            .map_err(|e| Error::CommandFailed {
                message: format!("failed to execute apt-get: {}", e),
                stderr: String::new(),
            })?;
        Ok(output)
    }

    /// Run an apt-get command and check for success.
    fn run_apt_checked(
        &self,
        args: &[&str],
        package_name: Option<&str>,
        release: Option<&str>,
    ) -> Result<String> {
        let output = self.run_apt(args)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::from_apt_output(&stderr, package_name, release));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Run dpkg-query and return raw output (unchecked: dpkg-query exits
    /// non-zero when no package matches, which is not an error here).
    fn run_dpkg_query(&self, args: &[&str]) -> Result<std::process::Output> {
        Command::new("dpkg-query")
            .args(args)
            .output()
            .map_err(|e| Error::CommandFailed {
                message: format!("failed to execute dpkg-query: {}", e),
                stderr: String::new(),
            })
    }
}

impl Backend for AptBackend {
    fn is_available(&self) -> bool {
        self.run_apt(&["--version"]).is_ok()
    }

    fn update_index(&self) -> Result<()> {
        self.run_apt_checked(&["update"], None, None)?;
        Ok(())
    }

    fn install(&self, packages: &[&str], release: Option<&str>) -> Result<()> {
        let mut args = vec!["install", "-y"];
        if let Some(release) = release {
            args.push("-t");
            args.push(release);
        }
        args.extend_from_slice(packages);

        self.run_apt_checked(&args, packages.first().copied(), release)?;
        Ok(())
    }

    fn purge(&self, packages: &[&str]) -> Result<()> {
        if packages.is_empty() {
            return Ok(());
        }
        let mut args = vec!["purge", "-y"];
        args.extend_from_slice(packages);

        self.run_apt_checked(&args, packages.first().copied(), None)?;
        Ok(())
    }

    fn autoremove(&self) -> Result<()> {
        self.run_apt_checked(&["autoremove", "-y", "--purge"], None, None)?;
        Ok(())
    }

    fn is_installed(&self, package: &str) -> Result<bool> {
        let output = self.run_dpkg_query(&["-W", "-f=${Status}", package])?;
        if !output.status.success() {
            return Ok(false);
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.contains("install ok installed"))
    }

    fn installed_version(&self, package: &str) -> Result<Option<String>> {
        let output = self.run_dpkg_query(&["-W", "-f=${Status}\t${Version}", package])?;
        if !output.status.success() {
            return Ok(None);
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_status_version(&stdout))
    }

    fn list_installed(&self, prefix: &str) -> Result<Vec<InstalledPackage>> {
        let pattern = format!("{prefix}*");
        let output = self.run_dpkg_query(&[
            "-W",
            "-f=${Package}\t${Version}\t${Status}\n",
            &pattern,
        ])?;

        // dpkg-query exits non-zero when the pattern matches nothing;
        // an empty result is a valid answer for "what is installed".
        if !output.status.success() {
            return Ok(Vec::new());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_dpkg_listing(&stdout))
    }
}

/// Find the apt-get executable path.
fn find_apt_get() -> Result<String> {
    let paths = ["/usr/bin/apt-get", "/bin/apt-get"];

    for path in &paths {
        if std::path::Path::new(path).exists() {
            return Ok(path.to_string());
        }
    }

    // Try which
    let output = Command::new("which")
        .arg("apt-get")
        .output()
        .map_err(|_| Error::AptNotFound)?;

    if output.status.success() {
        let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !path.is_empty() {
            return Ok(path);
        }
    }

    Err(Error::AptNotFound)
}

/// Parse a `${Status}\t${Version}` line into a version for an installed
/// package, or `None` for removed/config-files states.
fn parse_status_version(raw: &str) -> Option<String> {
    let (status, version) = raw.split_once('\t')?;
    if status.contains("install ok installed") && !version.trim().is_empty() {
        Some(version.trim().to_string())
    } else {
        None
    }
}

/// Parse `dpkg-query -W` listing output into installed packages.
///
/// Lines are `package\tversion\tstatus`; packages in a removed or
/// config-files state are skipped.
fn parse_dpkg_listing(output: &str) -> Vec<InstalledPackage> {
    let mut installed = Vec::new();

    for line in output.lines() {
        let mut fields = line.split('\t');
        let (Some(name), Some(version), Some(status)) =
            (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };

        if !status.contains("install ok installed") {
            continue;
        }

        installed.push(InstalledPackage {
            name: name.trim().to_string(),
            version: version.trim().to_string(),
        });
    }

    installed
}
