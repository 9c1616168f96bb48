//! Root-privilege precondition.
//!
//! Every mutating action drives apt and writes under /etc, so the whole
//! run requires an effective uid of 0 up front; there is no scoped
//! privilege escalation.

use anyhow::{Result, bail};

/// Effective uid of the current process.
pub fn effective_uid() -> u32 {
    // SAFETY: geteuid has no preconditions and cannot fail
    unsafe { libc::geteuid() }
}

/// Fail unless running as root.
pub fn require_root(action: &str) -> Result<()> {
    if effective_uid() != 0 {
        bail!("{action} requires root privileges; re-run with sudo");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_root_matches_euid() {
        let result = require_root("test");
        assert_eq!(result.is_ok(), effective_uid() == 0);
    }
}
