//! Append-only audit trail.
//!
//! Every transition, backup and failure is recorded as one line:
//!
//! ```text
//! 2026-10-19 14:03:11 | SET_DNS | Provider: Google, IPs: [8.8.8.8, 8.8.4.4]
//! ```
//!
//! The file is never truncated or rewritten here; rotation belongs to the
//! host's log rotation.

use std::fmt::Display;
use std::io::Write;
use std::path::{Path, PathBuf};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Handle to the audit log file.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    /// Creates a handle. Nothing is touched on disk until the first append.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the log file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `<timestamp> | <action> | <details>`.
    ///
    /// Failures are swallowed: an unwritable audit log must never turn a
    /// successful transition into a failed one.
    pub fn record(&self, action: &str, details: impl Display) {
        let timestamp = chrono::Local::now().format(TIMESTAMP_FORMAT);
        let line = format!("{timestamp} | {action} | {details}\n");
        if let Err(e) = self.append(&line) {
            tracing::debug!(
                path = %self.path.display(),
                action = action,
                error = %e,
                "Failed to append audit entry"
            );
        }
    }

    fn append(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())
    }
}
