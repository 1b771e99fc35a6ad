//! # linux-resolver
//!
//! Switch a Linux host's DNS resolution between four mutually exclusive
//! modes without ever leaving `/etc/resolv.conf` half-written:
//!
//! | Mode       | `/etc/resolv.conf`      | Dependent config                  |
//! |------------|-------------------------|-----------------------------------|
//! | Standard   | `nameserver <ip>` lines | none                              |
//! | DoT        | `nameserver 127.0.0.53` | `systemd-resolved` with TLS       |
//! | DoH        | `nameserver 127.0.2.1`  | `dnscrypt-proxy` with a DoH stamp |
//! | Default    | deleted                 | `resolved.conf` reset to stock    |
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use linux_resolver::{Config, Engine, Mode};
//!
//! let engine = Engine::new(Config::default());
//! engine.cleanup_backups();
//!
//! // Plain nameservers; invalid entries are dropped with a warning.
//! engine.apply(&Mode::standard("Custom", ["9.9.9.9", "149.112.112.112"]))?;
//!
//! // Encrypted upstream through the stub resolver.
//! engine.apply(&Mode::dot("Cloudflare"))?;
//!
//! // Back to DHCP.
//! engine.restore_default()?;
//! ```
//!
//! ## Safety net
//!
//! - Every file is written to a sibling temp file, `fsync`ed, then renamed
//!   into place.
//! - Every managed file is copied to `<file>.backup_<YYYYMMDD_HHMMSS>` before
//!   it is overwritten. [`Engine::cleanup_backups`] ages them out.
//! - The resolver file carries the immutable flag between transitions so
//!   DHCP clients cannot overwrite it.
//! - Every action is appended to an audit log.
//!
//! ## Permissions
//!
//! Writing under `/etc`, toggling the immutable flag and restarting services
//! all require root. The caller is responsible for privilege elevation.

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod atomic;
pub mod audit;
pub mod backup;
pub mod config;
pub mod engine;
pub mod error;
pub mod files;
pub mod guard;
pub mod mode;
pub mod provider;
pub mod report;
pub mod service;
pub mod util;
pub mod verify;

pub use atomic::write_atomic;
pub use audit::AuditLog;
pub use backup::{BackupManager, BackupRecord};
pub use config::Config;
pub use engine::{Engine, Status};
pub use error::{ResolverError, Result, ServiceError};
pub use guard::{FileAttributes, IoctlAttributes, LockOutcome};
pub use mode::{ActiveMode, Mode, ModeKind};
pub use report::{Outcome, TransitionReport, Warning};
pub use service::{ServiceControl, ServiceSequencer, Systemctl};
pub use verify::{
    Connectivity, ConnectivityReport, GetentLookup, NameLookup, Verification, VerificationProbe,
};
