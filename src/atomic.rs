//! All-or-nothing config file writes.

use crate::audit::AuditLog;
use crate::error::{ResolverError, Result};
use std::ffi::OsString;
use std::fs::Permissions;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

const NEW_FILE_MODE: u32 = 0o644;

/// Writes `content` to `path` so that readers see either the old file or the
/// complete new one, never a prefix.
///
/// The data goes to `<path>.tmp` in the same directory, is flushed and
/// `fsync`ed, then renamed over `path`. If anything fails before the rename
/// the temporary file is removed and `path` keeps its previous content.
/// Failures are also appended to `audit` as `ERROR` entries.
///
/// # Errors
///
/// Returns [`ResolverError::Io`] naming the step that failed.
pub fn write_atomic(path: &Path, content: &str, audit: &AuditLog) -> Result<()> {
    let tmp = temp_path(path);
    match write_and_rename(&tmp, path, content) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), bytes = content.len(), "Wrote file atomically");
            Ok(())
        }
        Err(e) => {
            if tmp.exists() {
                let _ = std::fs::remove_file(&tmp);
            }
            tracing::warn!(path = %path.display(), error = %e, "Atomic write failed");
            audit.record("ERROR", format_args!("Atomic write failed for {}: {e}", path.display()));
            Err(e)
        }
    }
}

/// Sibling temporary path used by [`write_atomic`].
#[must_use]
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

fn write_and_rename(tmp: &Path, path: &Path, content: &str) -> Result<()> {
    let mut file = std::fs::File::create(tmp).map_err(|e| ResolverError::io("create", tmp, e))?;
    file.set_permissions(target_permissions(path))
        .map_err(|e| ResolverError::io("chmod", tmp, e))?;
    file.write_all(content.as_bytes())
        .map_err(|e| ResolverError::io("write", tmp, e))?;
    file.sync_all().map_err(|e| ResolverError::io("sync", tmp, e))?;
    drop(file);

    std::fs::rename(tmp, path).map_err(|e| ResolverError::io("rename", path, e))?;

    // Persist the directory entry too. Not every filesystem allows opening a
    // directory for sync, so this one is advisory.
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        if let Ok(handle) = std::fs::File::open(dir) {
            let _ = handle.sync_all();
        }
    }
    Ok(())
}

/// Mode for the replacement: the target's current mode, or `0644` for a new
/// file. Resolver configs must stay world-readable whatever the umask.
fn target_permissions(path: &Path) -> Permissions {
    std::fs::metadata(path).map_or_else(
        |_| Permissions::from_mode(NEW_FILE_MODE),
        |meta| meta.permissions(),
    )
}
