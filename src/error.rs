//! Error types.

use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Result alias for resolver operations.
pub type Result<T> = std::result::Result<T, ResolverError>;

/// Errors that abort a mode transition.
///
/// Tolerated failures (unlock, stale backup removal, silent restore) never
/// show up here; they are reported as [`Warning`](crate::Warning)s instead.
#[derive(Debug, Error)]
pub enum ResolverError {
    /// None of the supplied nameserver strings parsed as an IP address.
    #[error("no valid nameserver address in {0}")]
    Validation(String),

    /// A filesystem step of the transition failed.
    #[error("{op} failed for {}: {source}", path.display())]
    Io {
        /// The step that failed (`"write"`, `"rename"`, `"copy"`, ...).
        op: &'static str,
        /// The file being operated on.
        path: PathBuf,
        /// Underlying cause.
        #[source]
        source: std::io::Error,
    },

    /// A dependent OS service could not be restarted.
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// The requested provider is not in the compiled-in table.
    #[error("unknown {kind} provider: {name}")]
    UnknownProvider {
        /// Which table was searched (`"preset"`, `"DoT"`, `"DoH"`).
        kind: &'static str,
        /// The key that was not found.
        name: String,
    },

    /// The configuration file could not be parsed.
    #[error("invalid config: {0}")]
    Config(String),
}

impl ResolverError {
    pub(crate) fn io(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    /// Returns `true` if the underlying I/O error is `PermissionDenied`.
    #[must_use]
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == std::io::ErrorKind::PermissionDenied)
    }
}

/// Failures of the stop/settle/start protocol.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// `stop` exited unsuccessfully or timed out. Tolerated by
    /// [`ServiceSequencer::restart`](crate::ServiceSequencer::restart).
    #[error("failed to stop {service}")]
    StopFailed {
        /// Service unit name.
        service: String,
    },

    /// `start` ran to completion but reported failure.
    #[error("failed to start {service} ({status})")]
    StartFailed {
        /// Service unit name.
        service: String,
        /// Exit status as reported by the service manager.
        status: String,
    },

    /// `start` did not finish within its timeout.
    #[error("timed out after {timeout:?} starting {service}")]
    StartTimedOut {
        /// Service unit name.
        service: String,
        /// The bound that was exceeded.
        timeout: Duration,
    },

    /// `enable` or `disable` failed or timed out. Never fatal for a
    /// transition.
    #[error("failed to {verb} {service} ({reason})")]
    UnitFileFailed {
        /// Service unit name.
        service: String,
        /// `"enable"` or `"disable"`.
        verb: &'static str,
        /// Exit status, or the timeout that was exceeded.
        reason: String,
    },

    /// The service manager binary could not be launched at all.
    #[error("could not run {program}: {source}")]
    Spawn {
        /// The program that failed to spawn.
        program: String,
        /// Underlying cause.
        #[source]
        source: std::io::Error,
    },
}
