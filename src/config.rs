//! Engine configuration.

use crate::error::{ResolverError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Paths, service names and timing bounds used by the engine.
///
/// Constructed once at startup and handed to [`Engine`](crate::Engine).
/// Every field has a default matching a stock Debian/Kali host, so a TOML
/// file only needs the keys it wants to change.
///
/// # Example
///
/// ```
/// use linux_resolver::Config;
/// use std::time::Duration;
///
/// let config = Config::rooted_at("/tmp/etc")
///     .with_settle(Duration::ZERO)
///     .with_backup_max_age_days(3);
///
/// assert_eq!(config.resolv_conf, std::path::Path::new("/tmp/etc/resolv.conf"));
/// assert_eq!(config.backup_max_age_days, 3);
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// The resolver nameserver file (`/etc/resolv.conf`).
    pub resolv_conf: PathBuf,

    /// The stub resolver's config (`/etc/systemd/resolved.conf`).
    pub resolved_conf: PathBuf,

    /// The forwarding proxy's config used in DoH mode.
    pub proxy_conf: PathBuf,

    /// Append-only audit log.
    pub audit_log: PathBuf,

    /// Unit name of the stub resolver.
    pub resolved_service: String,

    /// Unit name of the DoH forwarding proxy.
    pub proxy_service: String,

    /// Unit name of the network manager that regenerates the resolver file.
    pub network_service: String,

    /// Backups older than this many days are removed by cleanup.
    pub backup_max_age_days: u64,

    /// Bound on `systemctl stop`.
    #[serde(deserialize_with = "secs")]
    pub stop_timeout: Duration,

    /// Bound on `systemctl start`.
    #[serde(deserialize_with = "secs")]
    pub start_timeout: Duration,

    /// Pause between stop and start so the old process releases its port.
    #[serde(deserialize_with = "secs")]
    pub settle: Duration,

    /// Pause before reading the resolver file back for verification.
    #[serde(deserialize_with = "secs")]
    pub verify_delay: Duration,

    /// Bound on each connectivity lookup.
    #[serde(deserialize_with = "secs")]
    pub probe_timeout: Duration,

    /// Domains resolved by the connectivity probe.
    pub probe_domains: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            resolv_conf: PathBuf::from("/etc/resolv.conf"),
            resolved_conf: PathBuf::from("/etc/systemd/resolved.conf"),
            proxy_conf: PathBuf::from("/etc/dnscrypt-proxy/dnscrypt-proxy.toml"),
            audit_log: PathBuf::from("/var/log/kalidns/dns.log"),
            resolved_service: "systemd-resolved".to_string(),
            proxy_service: "dnscrypt-proxy".to_string(),
            network_service: "NetworkManager".to_string(),
            backup_max_age_days: 7,
            stop_timeout: Duration::from_secs(10),
            start_timeout: Duration::from_secs(15),
            settle: Duration::from_secs(1),
            verify_delay: Duration::from_secs(1),
            probe_timeout: Duration::from_secs(5),
            probe_domains: ["google.com", "cloudflare.com", "github.com"]
                .map(String::from)
                .to_vec(),
        }
    }
}

impl Config {
    /// Places every managed file directly inside `dir`, keeping the
    /// default file names. Useful for tests and chroots.
    #[must_use]
    pub fn rooted_at(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            resolv_conf: dir.join("resolv.conf"),
            resolved_conf: dir.join("resolved.conf"),
            proxy_conf: dir.join("dnscrypt-proxy.toml"),
            audit_log: dir.join("dns.log"),
            ..Self::default()
        }
    }

    /// Parses a TOML document. Missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ResolverError::Config`] on malformed TOML, unknown keys or
    /// negative durations.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| ResolverError::Config(e.to_string()))
    }

    /// Reads and parses a TOML config file.
    ///
    /// # Errors
    ///
    /// Returns [`ResolverError::Io`] if the file cannot be read, or
    /// [`ResolverError::Config`] if it does not parse.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text =
            std::fs::read_to_string(path).map_err(|e| ResolverError::io("read", path, e))?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), "Loaded resolver config");
        Ok(config)
    }

    /// Overrides the backup retention.
    #[must_use]
    pub const fn with_backup_max_age_days(mut self, days: u64) -> Self {
        self.backup_max_age_days = days;
        self
    }

    /// Overrides the stop/start settle interval.
    #[must_use]
    pub const fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Overrides the delay before verification reads the file back.
    #[must_use]
    pub const fn with_verify_delay(mut self, delay: Duration) -> Self {
        self.verify_delay = delay;
        self
    }

    /// Overrides the connectivity probe domains.
    #[must_use]
    pub fn with_probe_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.probe_domains = domains.into_iter().map(Into::into).collect();
        self
    }
}

fn secs<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
}
