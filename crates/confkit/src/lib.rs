//! # confkit
//!
//! Idempotent materialization and removal of small configuration files,
//! with backup-before-overwrite semantics.
//!
//! An [`Artifact`] names a file on disk together with its permission bits
//! and an [`Idempotence`] mode:
//!
//! - [`Idempotence::ByContent`]: the file is rewritten only when the
//!   desired content differs from what is on disk; the previous version is
//!   backed up first under a timestamped suffix.
//! - [`Idempotence::ByPresence`]: the file is written once and never
//!   touched again while it exists (for files the user may edit).
//!
//! ## Example
//!
//! ```no_run
//! use confkit::{Artifact, Idempotence, WriteOutcome};
//!
//! let blacklist = Artifact::new(
//!     "nouveau-blacklist",
//!     "/etc/modprobe.d/blacklist-nouveau.conf",
//!     0o644,
//!     Idempotence::ByContent,
//! );
//!
//! match blacklist.write("blacklist nouveau\n").expect("write failed") {
//!     WriteOutcome::Written { backup: Some(b) } => {
//!         println!("updated, previous version at {}", b.display());
//!     }
//!     WriteOutcome::Written { backup: None } => println!("created"),
//!     WriteOutcome::Unchanged => println!("already up to date"),
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod artifact;
mod error;

pub use artifact::{Artifact, Idempotence, RemoveOutcome, WriteOutcome};
pub use error::{Error, Result};
