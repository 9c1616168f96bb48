//! The artifact type and its write/remove operations.

use crate::error::{Error, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// How an artifact decides whether a write is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Idempotence {
    /// Rewrite when the on-disk content differs from the desired content.
    ByContent,
    /// Write once; an existing file is never touched again.
    ByPresence,
}

/// Result of a write operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The artifact was created or replaced.
    Written {
        /// Backup path of the previous version, if one existed.
        backup: Option<PathBuf>,
    },
    /// The artifact already had the desired state; nothing was touched.
    Unchanged,
}

/// Result of a remove operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// The artifact existed and was deleted.
    Removed,
    /// The artifact was not present; nothing to do.
    AlreadyAbsent,
}

/// A named configuration file with fixed permissions and an idempotence
/// mode.
#[derive(Debug, Clone)]
pub struct Artifact {
    name: String,
    path: PathBuf,
    mode: u32,
    idempotence: Idempotence,
}

impl Artifact {
    /// Create an artifact description. Nothing is touched on disk.
    pub fn new(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        mode: u32,
        idempotence: Idempotence,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            mode,
            idempotence,
        }
    }

    /// Short identifier for display and logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The on-disk location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the current content, `None` if the file does not exist.
    pub fn current(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(Error::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Whether a write with `desired` would change anything on disk.
    pub fn needs_write(&self, desired: &str) -> Result<bool> {
        let current = self.current()?;
        Ok(match self.idempotence {
            Idempotence::ByPresence => current.is_none(),
            Idempotence::ByContent => current.as_deref() != Some(desired),
        })
    }

    /// Materialize the artifact with `desired` content.
    ///
    /// Returns [`WriteOutcome::Unchanged`] without any side effect when
    /// the idempotence mode says the file is already in the desired
    /// state. Otherwise the previous version (if any) is copied to a
    /// unique timestamped backup path, and the new content is written
    /// atomically (temp file + rename) with the artifact's mode bits.
    pub fn write(&self, desired: &str) -> Result<WriteOutcome> {
        let current = self.current()?;

        match self.idempotence {
            Idempotence::ByPresence if current.is_some() => return Ok(WriteOutcome::Unchanged),
            Idempotence::ByContent if current.as_deref() == Some(desired) => {
                return Ok(WriteOutcome::Unchanged);
            }
            _ => {}
        }

        let backup = if current.is_some() {
            let backup_path = self.unique_backup_path();
            fs::copy(&self.path, &backup_path).map_err(|source| Error::Backup {
                path: self.path.clone(),
                backup: backup_path.clone(),
                source,
            })?;
            Some(backup_path)
        } else {
            None
        };

        self.write_atomic(desired)?;

        Ok(WriteOutcome::Written { backup })
    }

    /// Delete the artifact. An absent file is a success, not an error.
    pub fn remove(&self) -> Result<RemoveOutcome> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(RemoveOutcome::Removed),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RemoveOutcome::AlreadyAbsent),
            Err(source) => Err(Error::Remove {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Write content to a sibling temp file, fix the mode bits, then
    /// rename over the target.
    fn write_atomic(&self, content: &str) -> Result<()> {
        let io_err = |source| Error::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let tmp = self.path.with_extension("confkit-new");
        fs::write(&tmp, content).map_err(io_err)?;
        fs::set_permissions(&tmp, fs::Permissions::from_mode(self.mode)).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)
    }

    /// Next free `<path>.backup.<timestamp>` name. Timestamps have second
    /// resolution; a numeric suffix keeps two backups within the same
    /// second from colliding.
    fn unique_backup_path(&self) -> PathBuf {
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        let base = format!("{}.backup.{stamp}", self.path.display());

        let candidate = PathBuf::from(&base);
        if !candidate.exists() {
            return candidate;
        }

        let mut counter = 1u32;
        loop {
            let candidate = PathBuf::from(format!("{base}-{counter}"));
            if !candidate.exists() {
                return candidate;
            }
            counter += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn content_artifact(dir: &TempDir) -> Artifact {
        Artifact::new(
            "test-conf",
            dir.path().join("sub").join("test.conf"),
            0o644,
            Idempotence::ByContent,
        )
    }

    fn backups_in(dir: &TempDir) -> Vec<PathBuf> {
        let sub = dir.path().join("sub");
        let mut backups: Vec<PathBuf> = fs::read_dir(sub)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .filter(|p| p.to_string_lossy().contains(".backup."))
                    .collect()
            })
            .unwrap_or_default();
        backups.sort();
        backups
    }

    #[test]
    fn test_first_write_creates_without_backup() {
        let dir = TempDir::new().unwrap();
        let artifact = content_artifact(&dir);

        let outcome = artifact.write("blacklist nouveau\n").unwrap();
        assert_eq!(outcome, WriteOutcome::Written { backup: None });
        assert_eq!(
            fs::read_to_string(artifact.path()).unwrap(),
            "blacklist nouveau\n"
        );
    }

    #[test]
    fn test_identical_write_is_unchanged_and_backs_up_nothing() {
        let dir = TempDir::new().unwrap();
        let artifact = content_artifact(&dir);

        artifact.write("same\n").unwrap();
        let outcome = artifact.write("same\n").unwrap();

        assert_eq!(outcome, WriteOutcome::Unchanged);
        assert!(backups_in(&dir).is_empty());
    }

    #[test]
    fn test_changed_write_backs_up_previous_content() {
        let dir = TempDir::new().unwrap();
        let artifact = content_artifact(&dir);

        artifact.write("old\n").unwrap();
        let outcome = artifact.write("new\n").unwrap();

        let WriteOutcome::Written {
            backup: Some(backup),
        } = outcome
        else {
            panic!("expected a backup, got {outcome:?}");
        };
        assert_eq!(fs::read_to_string(&backup).unwrap(), "old\n");
        assert_eq!(fs::read_to_string(artifact.path()).unwrap(), "new\n");
    }

    #[test]
    fn test_backups_within_one_second_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let artifact = content_artifact(&dir);

        artifact.write("one\n").unwrap();
        artifact.write("two\n").unwrap();
        artifact.write("three\n").unwrap();

        // Two overwrites in quick succession must leave two distinct backups.
        assert_eq!(backups_in(&dir).len(), 2);
    }

    #[test]
    fn test_presence_artifact_never_overwrites() {
        let dir = TempDir::new().unwrap();
        let artifact = Artifact::new(
            "profile",
            dir.path().join("sub").join("cuda.sh"),
            0o644,
            Idempotence::ByPresence,
        );

        artifact.write("export PATH=a\n").unwrap();
        let outcome = artifact.write("export PATH=b\n").unwrap();

        assert_eq!(outcome, WriteOutcome::Unchanged);
        assert_eq!(
            fs::read_to_string(artifact.path()).unwrap(),
            "export PATH=a\n"
        );
    }

    #[test]
    fn test_mode_bits_applied() {
        let dir = TempDir::new().unwrap();
        let artifact = content_artifact(&dir);
        artifact.write("x\n").unwrap();

        let mode = fs::metadata(artifact.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    #[test]
    fn test_remove_existing() {
        let dir = TempDir::new().unwrap();
        let artifact = content_artifact(&dir);
        artifact.write("x\n").unwrap();

        assert_eq!(artifact.remove().unwrap(), RemoveOutcome::Removed);
        assert!(!artifact.path().exists());
    }

    #[test]
    fn test_remove_absent_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let artifact = content_artifact(&dir);

        assert_eq!(artifact.remove().unwrap(), RemoveOutcome::AlreadyAbsent);
    }

    #[test]
    fn test_needs_write() {
        let dir = TempDir::new().unwrap();
        let artifact = content_artifact(&dir);

        assert!(artifact.needs_write("x\n").unwrap());
        artifact.write("x\n").unwrap();
        assert!(!artifact.needs_write("x\n").unwrap());
        assert!(artifact.needs_write("y\n").unwrap());
    }
}
