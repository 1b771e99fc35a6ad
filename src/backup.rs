//! Timestamped backups of managed config files.
//!
//! A backup of `/etc/resolv.conf` taken at 14:03:11 on 2026-10-19 lives next
//! to it as `/etc/resolv.conf.backup_20261019_140311`. Backups are only ever
//! created, looked up, and aged out; they are never modified.

use crate::audit::AuditLog;
use crate::error::{ResolverError, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Infix between the original file name and the timestamp.
pub const BACKUP_INFIX: &str = ".backup_";

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

const SECS_PER_DAY: u64 = 86_400;

/// A backup file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRecord {
    /// Location of the backup.
    pub path: PathBuf,
    /// Modification time, used to order backups.
    pub modified: SystemTime,
}

/// Creates, finds and expires backups of a fixed set of tracked files.
#[derive(Debug, Clone)]
pub struct BackupManager {
    tracked: Vec<PathBuf>,
    audit: AuditLog,
}

impl BackupManager {
    /// Creates a manager for `tracked` files. Cleanup only touches backups
    /// of these files.
    #[must_use]
    pub fn new(tracked: impl IntoIterator<Item = PathBuf>, audit: AuditLog) -> Self {
        Self {
            tracked: tracked.into_iter().collect(),
            audit,
        }
    }

    /// Copies `path` to `path.backup_<YYYYMMDD_HHMMSS>`.
    ///
    /// Returns `Ok(None)` without touching anything if `path` does not
    /// exist. An existing backup is never overwritten: a second snapshot in
    /// the same second gets a numeric suffix.
    ///
    /// # Errors
    ///
    /// Returns [`ResolverError::Io`] if the copy fails.
    pub fn snapshot(&self, path: &Path) -> Result<Option<PathBuf>> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "Nothing to back up");
            return Ok(None);
        }

        let stamp = chrono::Local::now().format(TIMESTAMP_FORMAT).to_string();
        let backup = unused_backup_path(path, &stamp);

        // `fs::copy` carries the permission bits over; the backup's mtime is
        // its creation time so retention counts from when it was taken.
        std::fs::copy(path, &backup).map_err(|e| ResolverError::io("copy", &backup, e))?;

        tracing::info!(
            path = %path.display(),
            backup = %backup.display(),
            "Created backup"
        );
        self.audit
            .record("BACKUP", format_args!("Created backup: {}", backup.display()));
        Ok(Some(backup))
    }

    /// Returns the most recently modified backup of `path`, if any.
    ///
    /// Only regular files named `<basename(path)>.backup_*` in `path`'s
    /// directory are considered. An unreadable directory yields `None`.
    #[must_use]
    pub fn find_latest(path: &Path) -> Option<BackupRecord> {
        let prefix = backup_prefix(path)?;
        let dir = parent_dir(path);

        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(dir = %dir.display(), error = %e, "Cannot list backup directory");
                return None;
            }
        };

        entries
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().starts_with(&prefix))
            .filter_map(|entry| {
                let meta = entry.metadata().ok()?;
                if !meta.is_file() {
                    return None;
                }
                Some(BackupRecord {
                    path: entry.path(),
                    modified: meta.modified().ok()?,
                })
            })
            .max_by_key(|record| record.modified)
    }

    /// Copies the latest backup of `path` back over it.
    ///
    /// Returns the backup that was restored, or `Ok(None)` when there is
    /// none.
    ///
    /// # Errors
    ///
    /// Returns [`ResolverError::Io`] if the copy fails.
    pub fn restore_latest(&self, path: &Path) -> Result<Option<BackupRecord>> {
        let Some(latest) = Self::find_latest(path) else {
            return Ok(None);
        };
        std::fs::copy(&latest.path, path).map_err(|e| ResolverError::io("copy", path, e))?;
        tracing::info!(
            path = %path.display(),
            backup = %latest.path.display(),
            "Restored from backup"
        );
        self.audit.record(
            "RESTORE",
            format_args!("Restored {} from {}", path.display(), latest.path.display()),
        );
        Ok(Some(latest))
    }

    /// Removes backups of the tracked files older than `max_age_days`.
    ///
    /// Scans the directory of every tracked file. A directory that cannot be
    /// listed (the service is not installed) ends the sweep of that
    /// directory only; a backup that cannot be removed is skipped.
    /// Returns the number of files removed.
    pub fn cleanup(&self, max_age_days: u64) -> usize {
        let max_age = Duration::from_secs(max_age_days.saturating_mul(SECS_PER_DAY));
        let now = SystemTime::now();

        let prefixes: Vec<String> = self.tracked.iter().filter_map(|p| backup_prefix(p)).collect();
        let mut dirs: Vec<&Path> = self.tracked.iter().map(|p| parent_dir(p)).collect();
        dirs.sort();
        dirs.dedup();

        let mut removed = 0;
        for dir in dirs {
            let entries = match std::fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::debug!(dir = %dir.display(), error = %e, "Skipping unlistable backup directory");
                    continue;
                }
            };

            for entry in entries.filter_map(std::result::Result::ok) {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if !prefixes.iter().any(|p| name.starts_with(p.as_str())) {
                    continue;
                }
                let Ok(meta) = entry.metadata() else { continue };
                if !meta.is_file() {
                    continue;
                }
                let age = meta
                    .modified()
                    .ok()
                    .and_then(|m| now.duration_since(m).ok())
                    .unwrap_or_default();
                if age <= max_age {
                    continue;
                }

                let path = entry.path();
                match std::fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to remove stale backup"
                    ),
                }
            }
        }

        if removed > 0 {
            tracing::info!(removed, max_age_days, "Removed stale backups");
            self.audit.record(
                "CLEANUP",
                format_args!("Removed {removed} backup file(s) older than {max_age_days} day(s)"),
            );
        }
        removed
    }
}

/// `<basename>.backup_`, or `None` for a path without a file name.
fn backup_prefix(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_string_lossy();
    Some(format!("{name}{BACKUP_INFIX}"))
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

fn unused_backup_path(path: &Path, stamp: &str) -> PathBuf {
    let mut base = OsString::from(path.as_os_str());
    base.push(BACKUP_INFIX);
    base.push(stamp);

    let candidate = PathBuf::from(&base);
    if !candidate.exists() {
        return candidate;
    }
    (1u32..)
        .map(|n| {
            let mut name = base.clone();
            name.push(format!("_{n}"));
            PathBuf::from(name)
        })
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}
