//! Compiled-in upstream resolver tables.

use crate::error::{ResolverError, Result};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

/// A plain (port 53) nameserver preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preset {
    /// Menu key (`"1"`..`"5"`).
    pub key: &'static str,
    /// Display name.
    pub name: &'static str,
    /// IPv4 nameservers, primary first.
    pub ipv4: &'static [&'static str],
    /// IPv6 nameservers, primary first.
    pub ipv6: &'static [&'static str],
}

impl Preset {
    /// IPv4 addresses followed by IPv6 addresses.
    #[must_use]
    pub fn nameservers(&self) -> Vec<String> {
        self.ipv4
            .iter()
            .chain(self.ipv6)
            .map(|s| (*s).to_string())
            .collect()
    }
}

/// Upstream for DNS-over-TLS through the local stub resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DotProvider {
    /// Display name, also the lookup key.
    pub name: &'static str,
    /// Upstream addresses.
    pub servers: &'static [&'static str],
    /// TLS server name checked against the upstream certificate.
    pub tls_name: &'static str,
    /// Used when every upstream is unreachable.
    pub fallback: &'static [&'static str],
}

impl DotProvider {
    /// `DNS=` value: `addr#tls_name` entries separated by spaces.
    #[must_use]
    pub fn dns_line(&self) -> String {
        self.servers
            .iter()
            .map(|ip| format!("{ip}#{}", self.tls_name))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Upstream for DNS-over-HTTPS through the local forwarding proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DohProvider {
    /// Display name, also the lookup key.
    pub name: &'static str,
    /// Name of the `[static.<server_name>]` entry in the proxy config.
    pub server_name: &'static str,
    /// Bootstrap IP address of the DoH endpoint.
    pub address: &'static str,
    /// TLS host name of the DoH endpoint.
    pub hostname: &'static str,
    /// URL path of the DoH endpoint.
    pub path: &'static str,
    /// Stamp property bits ([`PROP_DNSSEC`], [`PROP_NO_LOG`], [`PROP_NO_FILTER`]).
    pub props: u64,
    /// Where the proxy listens. The resolver file points here.
    pub listen: &'static str,
}

/// Stamp property: the server validates DNSSEC.
pub const PROP_DNSSEC: u64 = 1;
/// Stamp property: the server keeps no query logs.
pub const PROP_NO_LOG: u64 = 1 << 1;
/// Stamp property: the server does not filter answers.
pub const PROP_NO_FILTER: u64 = 1 << 2;

const STAMP_PROTO_DOH: u8 = 0x02;

impl DohProvider {
    /// Encodes the `sdns://` server stamp for this endpoint.
    ///
    /// Layout: protocol byte, little-endian props, then length-prefixed
    /// address, an empty certificate-hash set, host name and path, all
    /// base64url-encoded without padding.
    #[must_use]
    pub fn stamp(&self) -> String {
        let mut bin = vec![STAMP_PROTO_DOH];
        bin.extend_from_slice(&self.props.to_le_bytes());
        push_lp(&mut bin, self.address);
        bin.push(0);
        push_lp(&mut bin, self.hostname);
        push_lp(&mut bin, self.path);
        format!("sdns://{}", URL_SAFE_NO_PAD.encode(bin))
    }

    /// The IP half of [`listen`](Self::listen).
    #[must_use]
    pub fn listen_ip(&self) -> &'static str {
        self.listen
            .rsplit_once(':')
            .map_or(self.listen, |(ip, _)| ip)
            .trim_start_matches('[')
            .trim_end_matches(']')
    }
}

fn push_lp(buf: &mut Vec<u8>, s: &str) {
    let bytes = &s.as_bytes()[..s.len().min(usize::from(u8::MAX))];
    buf.push(u8::try_from(bytes.len()).unwrap_or(u8::MAX));
    buf.extend_from_slice(bytes);
}

/// Listen address shared by every DoH provider.
pub const DOH_LISTEN: &str = "127.0.2.1:53";

/// Plain nameserver presets.
pub const PRESETS: &[Preset] = &[
    Preset {
        key: "1",
        name: "Google",
        ipv4: &["8.8.8.8", "8.8.4.4"],
        ipv6: &["2001:4860:4860::8888", "2001:4860:4860::8844"],
    },
    Preset {
        key: "2",
        name: "Cloudflare",
        ipv4: &["1.1.1.1", "1.0.0.1"],
        ipv6: &["2606:4700:4700::1111", "2606:4700:4700::1001"],
    },
    Preset {
        key: "3",
        name: "Quad9",
        ipv4: &["9.9.9.9", "149.112.112.112"],
        ipv6: &["2620:fe::fe", "2620:fe::9"],
    },
    Preset {
        key: "4",
        name: "AdGuard",
        ipv4: &["94.140.14.14", "94.140.15.15"],
        ipv6: &["2a10:50c0::ad1:ff", "2a10:50c0::ad2:ff"],
    },
    Preset {
        key: "5",
        name: "CleanBrowsing",
        ipv4: &["185.228.168.9", "185.228.169.9"],
        ipv6: &["2a0d:2a00:1::2", "2a0d:2a00:2::2"],
    },
];

/// DNS-over-TLS upstreams.
pub const DOT_PROVIDERS: &[DotProvider] = &[
    DotProvider {
        name: "Cloudflare",
        servers: &["1.1.1.1", "1.0.0.1", "2606:4700:4700::1111", "2606:4700:4700::1001"],
        tls_name: "cloudflare-dns.com",
        fallback: &["8.8.8.8"],
    },
    DotProvider {
        name: "Google",
        servers: &["8.8.8.8", "8.8.4.4", "2001:4860:4860::8888", "2001:4860:4860::8844"],
        tls_name: "dns.google",
        fallback: &["1.1.1.1"],
    },
    DotProvider {
        name: "Quad9",
        servers: &["9.9.9.9", "149.112.112.112", "2620:fe::fe", "2620:fe::9"],
        tls_name: "dns.quad9.net",
        fallback: &["1.1.1.1"],
    },
    DotProvider {
        name: "CleanBrowsing",
        servers: &["185.228.168.168", "185.228.169.168"],
        tls_name: "family-filter-dns.cleanbrowsing.org",
        fallback: &["185.228.169.168"],
    },
];

/// DNS-over-HTTPS upstreams.
pub const DOH_PROVIDERS: &[DohProvider] = &[
    DohProvider {
        name: "Cloudflare",
        server_name: "cloudflare",
        address: "1.0.0.1",
        hostname: "dns.cloudflare.com",
        path: "/dns-query",
        props: PROP_DNSSEC | PROP_NO_LOG | PROP_NO_FILTER,
        listen: DOH_LISTEN,
    },
    DohProvider {
        name: "Google",
        server_name: "google",
        address: "8.8.8.8",
        hostname: "dns.google",
        path: "/dns-query",
        props: PROP_DNSSEC,
        listen: DOH_LISTEN,
    },
    DohProvider {
        name: "Quad9",
        server_name: "quad9-doh",
        address: "9.9.9.9",
        hostname: "dns.quad9.net",
        path: "/dns-query",
        props: PROP_DNSSEC | PROP_NO_LOG,
        listen: DOH_LISTEN,
    },
    DohProvider {
        name: "CleanBrowsing",
        server_name: "cleanbrowsing-family",
        address: "185.228.168.168",
        hostname: "doh.cleanbrowsing.org",
        path: "/doh/family-filter/",
        props: PROP_DNSSEC,
        listen: DOH_LISTEN,
    },
];

/// Looks up a preset by key (`"2"`) or case-insensitive name (`"cloudflare"`).
///
/// # Errors
///
/// Returns [`ResolverError::UnknownProvider`] if nothing matches.
pub fn preset(key: &str) -> Result<&'static Preset> {
    PRESETS
        .iter()
        .find(|p| p.key == key || p.name.eq_ignore_ascii_case(key))
        .ok_or_else(|| unknown("preset", key))
}

/// Looks up a DoT provider by case-insensitive name.
///
/// # Errors
///
/// Returns [`ResolverError::UnknownProvider`] if nothing matches.
pub fn dot_provider(name: &str) -> Result<&'static DotProvider> {
    DOT_PROVIDERS
        .iter()
        .find(|p| p.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| unknown("DoT", name))
}

/// Looks up a DoH provider by case-insensitive name or proxy server name.
///
/// # Errors
///
/// Returns [`ResolverError::UnknownProvider`] if nothing matches.
pub fn doh_provider(name: &str) -> Result<&'static DohProvider> {
    DOH_PROVIDERS
        .iter()
        .find(|p| p.name.eq_ignore_ascii_case(name) || p.server_name == name)
        .ok_or_else(|| unknown("DoH", name))
}

fn unknown(kind: &'static str, name: &str) -> ResolverError {
    ResolverError::UnknownProvider {
        kind,
        name: name.to_string(),
    }
}
