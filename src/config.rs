//! Optional operator configuration at `/etc/nvup/config.toml`.
//!
//! A missing file yields defaults; a malformed file is an error (a typo
//! silently falling back to defaults would mask the operator's intent).

use anyhow::{Context, Result};
use aptkit::LockSettings;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Fixed config location.
pub const CONFIG_PATH: &str = "/etc/nvup/config.toml";

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NvupConfig {
    /// Lock monitor timing and escalation
    #[serde(default)]
    pub lock: LockConfig,
    /// Runfile installer settings
    #[serde(default)]
    pub runfile: RunfileConfig,
}

/// Lock monitor section.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LockConfig {
    /// Seconds to wait for another package manager before escalating
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Seconds between polls of the process table
    #[serde(default = "default_poll_secs")]
    pub poll_secs: u64,
}

/// Runfile installer section.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunfileConfig {
    /// Override for the version used when the live lookup fails
    pub fallback_version: Option<String>,
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_poll_secs() -> u64 {
    3
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            poll_secs: default_poll_secs(),
        }
    }
}

impl LockConfig {
    /// Convert to aptkit lock settings.
    pub fn settings(&self) -> LockSettings {
        LockSettings {
            poll_interval: Duration::from_secs(self.poll_secs),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

impl NvupConfig {
    /// Load from the fixed path; a missing file yields defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_PATH))
    }

    /// Load from an explicit path (used by tests).
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(e).with_context(|| format!("Could not read {}", path.display()));
            }
        };
        toml::from_str(&content).with_context(|| format!("Invalid config at {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NvupConfig::default();
        assert_eq!(config.lock.timeout_secs, 60);
        assert_eq!(config.lock.poll_secs, 3);
        assert!(config.runfile.fallback_version.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let config: NvupConfig = toml::from_str(
            r#"
            [lock]
            timeout_secs = 120
            poll_secs = 5

            [runfile]
            fallback_version = "535.216.01"
            "#,
        )
        .unwrap();
        assert_eq!(config.lock.timeout_secs, 120);
        assert_eq!(
            config.lock.settings().poll_interval,
            Duration::from_secs(5)
        );
        assert_eq!(
            config.runfile.fallback_version.as_deref(),
            Some("535.216.01")
        );
    }

    #[test]
    fn test_partial_section_fills_defaults() {
        let config: NvupConfig = toml::from_str("[lock]\ntimeout_secs = 10\n").unwrap();
        assert_eq!(config.lock.timeout_secs, 10);
        assert_eq!(config.lock.poll_secs, 3);
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let result: std::result::Result<NvupConfig, _> = toml::from_str("[lock]\ntypo_secs = 1\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_missing_path_yields_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = NvupConfig::load_from(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.lock.timeout_secs, 60);
    }
}
