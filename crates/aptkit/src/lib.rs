//! # aptkit
//!
//! Pure Rust library for driving APT/dpkg package operations.
//!
//! This crate provides functionality for:
//! - Installing and purging packages through `apt-get`
//! - Querying installed state through `dpkg-query`
//! - Targeting alternate release channels (backports)
//! - Waiting on, and if necessary escalating against, the package
//!   database lock held by another `apt`/`dpkg` process
//!
//! ## Example
//!
//! ```no_run
//! use aptkit::backend::{Backend, default_backend};
//!
//! let backend = default_backend().expect("apt not available");
//!
//! // Query installed vendor packages
//! let installed = backend.list_installed("nvidia-").expect("query failed");
//! for pkg in &installed {
//!     println!("{} {}", pkg.name, pkg.version);
//! }
//!
//! // Install from the default channel
//! backend.install(&["nvidia-driver"], None).expect("install failed");
//! ```
//!
//! ## Lock handling
//!
//! APT does not expose its database lock as an acquirable primitive, so
//! [`lock::LockMonitor`] observes the processes that hold it and waits,
//! escalating only after a timeout and according to an explicit
//! [`lock::EscalationPolicy`]. Package operations deliberately carry no
//! retry layer: an apt failure surfaces unmasked to the caller.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod error;
pub mod lock;
pub mod types;

pub use error::{Error, ErrorCategory, Result};
pub use lock::{EscalationPolicy, LockError, LockMonitor, LockObserver, LockSystem};
pub use types::{InstalledPackage, LockSettings, ManagerProcess};
