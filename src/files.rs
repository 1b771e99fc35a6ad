//! Rendering and reading of the three managed config files.
//!
//! Each file is always generated whole from typed values; nothing here edits
//! an existing file in place.

use crate::provider::{DohProvider, DotProvider};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;

/// Header prefix of every resolver file this crate writes.
pub const GENERATED_BY: &str = "# Generated by linux-resolver";

/// Loopback address of the systemd-resolved stub listener.
pub const STUB_RESOLVER: &str = "127.0.0.53";

// ---------------------------------------------------------------------------
// Nameserver validation
// ---------------------------------------------------------------------------

/// Returns the trimmed input if it is an IPv4 or IPv6 address.
///
/// ```
/// use linux_resolver::files::validate_ip;
///
/// assert_eq!(validate_ip("  1.1.1.1 ").as_deref(), Some("1.1.1.1"));
/// assert_eq!(validate_ip("999.999.999.999"), None);
/// ```
#[must_use]
pub fn validate_ip(s: &str) -> Option<String> {
    let trimmed = s.trim();
    trimmed.parse::<IpAddr>().ok().map(|_| trimmed.to_string())
}

/// Splits `inputs` into valid addresses (in input order) and rejected
/// strings.
#[must_use]
pub fn partition_nameservers<S: AsRef<str>>(inputs: &[S]) -> (Vec<String>, Vec<String>) {
    let mut valid = Vec::new();
    let mut invalid = Vec::new();
    for input in inputs {
        match validate_ip(input.as_ref()) {
            Some(ip) => valid.push(ip),
            None => invalid.push(input.as_ref().to_string()),
        }
    }
    (valid, invalid)
}

// ---------------------------------------------------------------------------
// /etc/resolv.conf
// ---------------------------------------------------------------------------

/// Flattens `label` onto one line by replacing control characters with
/// spaces, so it cannot add lines to a file or a log entry.
///
/// ```
/// use linux_resolver::files::single_line;
///
/// assert_eq!(single_line("Custom\nnameserver 6.6.6.6"), "Custom nameserver 6.6.6.6");
/// ```
#[must_use]
pub fn single_line(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect()
}

/// Resolver file for plain nameservers. The label is passed through
/// [`single_line`].
///
/// ```text
/// # Generated by linux-resolver - Google
/// nameserver 8.8.8.8
/// nameserver 8.8.4.4
/// ```
#[must_use]
pub fn render_standard(label: &str, nameservers: &[String]) -> String {
    let mut out = format!("{GENERATED_BY} - {}\n", single_line(label));
    for ns in nameservers {
        out.push_str("nameserver ");
        out.push_str(ns);
        out.push('\n');
    }
    out
}

/// Resolver file pointing at the local DoT stub resolver.
#[must_use]
pub fn render_dot(provider: &DotProvider) -> String {
    format!(
        "{GENERATED_BY} - DoT ({name})\nnameserver {STUB_RESOLVER}\noptions edns0 trust-ad\n",
        name = provider.name
    )
}

/// Resolver file pointing at the local DoH forwarding proxy.
#[must_use]
pub fn render_doh(provider: &DohProvider) -> String {
    format!(
        "{GENERATED_BY} - DoH ({name})\nnameserver {ip}\noptions edns0\n",
        name = provider.name,
        ip = provider.listen_ip()
    )
}

/// Result of reading the nameservers of a resolver file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameserverRead {
    /// The file does not exist (DHCP will create it).
    Missing,
    /// The file exists but has no `nameserver` line.
    Empty,
    /// Nameservers in file order.
    Servers(Vec<String>),
    /// The file exists but could not be read.
    Unreadable(String),
}

impl NameserverRead {
    /// The nameservers, or an empty slice.
    #[must_use]
    pub fn servers(&self) -> &[String] {
        match self {
            Self::Servers(s) => s,
            _ => &[],
        }
    }
}

/// Reads `nameserver` lines from `path`.
#[must_use]
pub fn read_nameservers(path: &Path) -> NameserverRead {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let servers = parse_nameservers(&content);
            if servers.is_empty() {
                NameserverRead::Empty
            } else {
                NameserverRead::Servers(servers)
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => NameserverRead::Missing,
        Err(e) => NameserverRead::Unreadable(e.to_string()),
    }
}

/// Second field of every line starting with `nameserver`.
#[must_use]
pub fn parse_nameservers(content: &str) -> Vec<String> {
    content
        .lines()
        .filter(|line| line.starts_with("nameserver"))
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(str::to_string)
        .collect()
}

// ---------------------------------------------------------------------------
// /etc/systemd/resolved.conf
// ---------------------------------------------------------------------------

/// `[Resolve]` section of the stub resolver's config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    /// `DNS=` entries.
    pub dns: String,
    /// `FallbackDNS=` entries.
    pub fallback: String,
    /// `Domains=`; `~.` routes every lookup through `DNS=`.
    pub domains: String,
    /// `DNSOverTLS=`.
    pub dns_over_tls: bool,
    /// `DNSSEC=` policy.
    pub dnssec: String,
}

impl ResolvedConfig {
    /// Encrypted-only configuration for `provider`.
    #[must_use]
    pub fn for_dot(provider: &DotProvider) -> Self {
        Self {
            dns: provider.dns_line(),
            fallback: provider.fallback.join(" "),
            domains: "~.".to_string(),
            dns_over_tls: true,
            dnssec: "allow-downgrade".to_string(),
        }
    }

    /// Renders the full file.
    #[must_use]
    pub fn render(&self) -> String {
        format!(
            "[Resolve]\nDNS={}\nFallbackDNS={}\nDomains={}\nDNSOverTLS={}\nDNSSEC={}\n",
            self.dns,
            self.fallback,
            self.domains,
            if self.dns_over_tls { "yes" } else { "no" },
            self.dnssec,
        )
    }
}

/// Stock config with every DNS customization commented out.
pub const RESOLVED_BASELINE: &str = "# systemd-resolved.conf (reset by linux-resolver)\n\
[Resolve]\n\
#DNS=\n\
#FallbackDNS=\n\
#Domains=\n\
#DNSOverTLS=no\n\
#DNSSEC=no\n";

/// Value of the first uncommented `key=` line.
#[must_use]
pub fn resolved_value<'a>(content: &'a str, key: &str) -> Option<&'a str> {
    content.lines().find_map(|line| {
        let line = line.trim();
        if line.starts_with('#') || line.starts_with(';') {
            return None;
        }
        let (k, v) = line.split_once('=')?;
        (k.trim() == key).then(|| v.trim())
    })
}

/// `true` if `DNSOverTLS=yes` is active.
#[must_use]
pub fn dns_over_tls_enabled(content: &str) -> bool {
    resolved_value(content, "DNSOverTLS").is_some_and(|v| v.eq_ignore_ascii_case("yes"))
}

// ---------------------------------------------------------------------------
// Forwarding proxy (dnscrypt-proxy) config
// ---------------------------------------------------------------------------

/// DoH forwarding proxy config, serialized as TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Local `ip:port` sockets the proxy answers on.
    pub listen_addresses: Vec<String>,
    /// Upstreams to use, by `[static.<name>]` key.
    pub server_names: Vec<String>,
    /// Maximum concurrent client queries.
    pub max_clients: u32,
    /// Use upstreams reachable over IPv4.
    pub ipv4_servers: bool,
    /// Use upstreams reachable over IPv6.
    pub ipv6_servers: bool,
    /// Use DNS-over-HTTPS upstreams.
    pub doh_servers: bool,
    /// Use DNSCrypt upstreams.
    pub dnscrypt_servers: bool,
    /// Only use upstreams that validate DNSSEC.
    pub require_dnssec: bool,
    /// Only use upstreams that keep no query logs.
    pub require_nolog: bool,
    /// Only use upstreams that do not filter answers.
    pub require_nofilter: bool,
    /// Cache answers in the proxy.
    pub cache: bool,
    /// Number of cached entries.
    pub cache_size: u32,
    /// Lower bound on cached TTLs, in seconds.
    pub cache_min_ttl: u32,
    /// Upper bound on cached TTLs, in seconds.
    pub cache_max_ttl: u32,
    /// One `[static.<server_name>]` table per upstream; exactly one is
    /// written.
    #[serde(rename = "static", default)]
    pub statics: BTreeMap<String, StaticServer>,
}

/// `[static.<name>]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticServer {
    /// `sdns://` stamp describing the upstream.
    pub stamp: String,
}

impl ProxyConfig {
    /// Config forwarding everything to `provider` over HTTPS.
    #[must_use]
    pub fn for_doh(provider: &DohProvider) -> Self {
        let mut statics = BTreeMap::new();
        statics.insert(
            provider.server_name.to_string(),
            StaticServer {
                stamp: provider.stamp(),
            },
        );
        Self {
            listen_addresses: vec![provider.listen.to_string()],
            server_names: vec![provider.server_name.to_string()],
            max_clients: 250,
            ipv4_servers: true,
            ipv6_servers: false,
            doh_servers: true,
            dnscrypt_servers: false,
            require_dnssec: false,
            require_nolog: false,
            require_nofilter: false,
            cache: true,
            cache_size: 4096,
            cache_min_ttl: 2400,
            cache_max_ttl: 86_400,
            statics,
        }
    }

    /// Renders the TOML document.
    ///
    /// # Errors
    ///
    /// Returns the serializer's message; only reachable with non-UTF-8 keys.
    pub fn render(&self) -> Result<String, String> {
        toml::to_string(self).map_err(|e| e.to_string())
    }

    /// Parses a config written by [`render`](Self::render).
    #[must_use]
    pub fn parse(content: &str) -> Option<Self> {
        toml::from_str(content).ok()
    }
}
