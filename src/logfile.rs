//! Process-wide transcript at a fixed path.
//!
//! Every run appends its user-visible output and log records to
//! `/var/log/nvup.log`, so a full transcript is available regardless of
//! outcome. Opening the file can fail (unprivileged status runs, tests);
//! the transcript then silently stays off and output goes to the
//! terminal only.

use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::{Mutex, OnceLock};

/// Fixed transcript location.
pub const LOG_PATH: &str = "/var/log/nvup.log";

static TRANSCRIPT: OnceLock<Option<Mutex<File>>> = OnceLock::new();

/// Open the transcript for appending. Call once, early in main.
pub fn open() {
    let _ = TRANSCRIPT.get_or_init(|| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(LOG_PATH)
            .ok()
            .map(Mutex::new)
    });
}

/// Whether the transcript file is being written this run.
pub fn is_active() -> bool {
    matches!(TRANSCRIPT.get(), Some(Some(_)))
}

/// Append one line to the transcript. No-op when the file is unavailable.
pub fn append(line: &str) {
    let Some(Some(file)) = TRANSCRIPT.get() else {
        return;
    };
    let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
    let mut file = match file.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    let _ = writeln!(file, "{stamp} {line}");
}
