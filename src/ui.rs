#![allow(dead_code)]

use colored::Colorize;

use crate::logfile;

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
    logfile::append(&format!("[info] {msg}"));
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
    logfile::append(&format!("[ok] {msg}"));
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
    logfile::append(&format!("[warn] {msg}"));
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
    logfile::append(&format!("[error] {msg}"));
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
    logfile::append(&format!("  {msg}"));
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.len()).dimmed());
    logfile::append(&format!("== {title} =="));
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
    logfile::append(&format!("-- {title}"));
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
    logfile::append(&format!("  {key}: {value}"));
}

/// Print a step indicator
pub fn step(num: usize, total: usize, msg: &str) {
    println!("{} {}", format!("[{}/{}]", num, total).blue().bold(), msg);
    logfile::append(&format!("[{num}/{total}] {msg}"));
}

// ============================================================================
// Size Formatting
// ============================================================================

const KB: u64 = 1024;
const MB: u64 = KB * 1024;
const GB: u64 = MB * 1024;

/// Format bytes as human-readable size
pub fn format_size(bytes: u64) -> String {
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Print the nvup banner
pub fn banner() {
    println!(
        "{}",
        r#"
  ███╗   ██╗██╗   ██╗██╗   ██╗██████╗
  ████╗  ██║██║   ██║██║   ██║██╔══██╗
  ██╔██╗ ██║██║   ██║██║   ██║██████╔╝
  ██║╚██╗██║╚██╗ ██╔╝██║   ██║██╔═══╝
  ██║ ╚████║ ╚████╔╝ ╚██████╔╝██║
  ╚═╝  ╚═══╝  ╚═══╝   ╚═════╝ ╚═╝
"#
        .green()
    );
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size_bytes() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
    }

    #[test]
    fn test_format_size_kb() {
        assert_eq!(format_size(1024), "1.0 KB");
        assert_eq!(format_size(1536), "1.5 KB");
    }

    #[test]
    fn test_format_size_mb() {
        assert_eq!(format_size(1024 * 1024 * 100), "100.0 MB");
    }

    #[test]
    fn test_format_size_gb() {
        assert_eq!(
            format_size(1024 * 1024 * 1024 * 2 + 1024 * 1024 * 512),
            "2.5 GB"
        );
    }
}
