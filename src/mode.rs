//! Resolution modes and inference of the active one from disk.

use crate::config::Config;
use crate::error::Result;
use crate::files::{self, NameserverRead, ProxyConfig};
use crate::provider::{self, DOH_PROVIDERS, DOT_PROVIDERS};
use crate::service::ServiceControl;
use std::fmt;

/// A requested target mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Plain nameservers written straight into the resolver file.
    Standard {
        /// Shown in the file header and the audit log.
        label: String,
        /// Unvalidated addresses, in priority order.
        nameservers: Vec<String>,
    },
    /// DNS-over-TLS through the local stub resolver.
    Dot {
        /// Key into [`DOT_PROVIDERS`].
        provider: String,
    },
    /// DNS-over-HTTPS through the local forwarding proxy.
    Doh {
        /// Key into [`DOH_PROVIDERS`].
        provider: String,
    },
    /// Hand the resolver file back to DHCP / the network manager.
    Default,
}

impl Mode {
    /// Standard mode with custom nameservers.
    #[must_use]
    pub fn standard<I, S>(label: impl Into<String>, nameservers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Standard {
            label: label.into(),
            nameservers: nameservers.into_iter().map(Into::into).collect(),
        }
    }

    /// Standard mode from a preset key or name.
    ///
    /// # Errors
    ///
    /// Returns [`ResolverError::UnknownProvider`](crate::ResolverError::UnknownProvider)
    /// for an unknown preset.
    pub fn preset(key: &str) -> Result<Self> {
        let preset = provider::preset(key)?;
        Ok(Self::standard(preset.name, preset.nameservers()))
    }

    /// DoT mode for `provider`.
    #[must_use]
    pub fn dot(provider: impl Into<String>) -> Self {
        Self::Dot {
            provider: provider.into(),
        }
    }

    /// DoH mode for `provider`.
    #[must_use]
    pub fn doh(provider: impl Into<String>) -> Self {
        Self::Doh {
            provider: provider.into(),
        }
    }

    /// The kind of mode, without parameters.
    #[must_use]
    pub const fn kind(&self) -> ModeKind {
        match self {
            Self::Standard { .. } => ModeKind::Standard,
            Self::Dot { .. } => ModeKind::Dot,
            Self::Doh { .. } => ModeKind::Doh,
            Self::Default => ModeKind::Default,
        }
    }

    /// Human-readable target: label, provider, or `"DHCP"`.
    #[must_use]
    pub fn target(&self) -> &str {
        match self {
            Self::Standard { label, .. } => label,
            Self::Dot { provider } | Self::Doh { provider } => provider,
            Self::Default => "DHCP",
        }
    }
}

/// Mode without parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeKind {
    /// Plain nameservers.
    Standard,
    /// DNS-over-TLS.
    Dot,
    /// DNS-over-HTTPS.
    Doh,
    /// DHCP-managed.
    Default,
}

impl fmt::Display for ModeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Standard => "Standard",
            Self::Dot => "DoT",
            Self::Doh => "DoH",
            Self::Default => "Default",
        })
    }
}

/// The mode the host is in, as far as the files on disk tell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActiveMode {
    /// Plain nameservers from the resolver file.
    Standard(Vec<String>),
    /// DoT is enabled; the provider if `DNS=` matches a known one.
    Dot(Option<&'static str>),
    /// The DoH proxy is configured and running; the provider if known.
    Doh(Option<&'static str>),
    /// No resolver file.
    Default,
    /// A resolver file without nameservers, or an unreadable one.
    Unknown,
}

impl ActiveMode {
    /// The kind, or `None` for [`ActiveMode::Unknown`].
    #[must_use]
    pub const fn kind(&self) -> Option<ModeKind> {
        match self {
            Self::Standard(_) => Some(ModeKind::Standard),
            Self::Dot(_) => Some(ModeKind::Dot),
            Self::Doh(_) => Some(ModeKind::Doh),
            Self::Default => Some(ModeKind::Default),
            Self::Unknown => None,
        }
    }
}

/// Infers the active mode. Reads only; never changes anything.
///
/// Precedence, first match wins:
///
/// 1. the proxy config parses and the proxy service is active: DoH
/// 2. the stub resolver config has `DNSOverTLS=yes`: DoT
/// 3. the resolver file lists nameservers: Standard
/// 4. the resolver file is absent: Default
///
/// Anything else is [`ActiveMode::Unknown`].
pub fn infer(config: &Config, services: &dyn ServiceControl) -> ActiveMode {
    if let Some(proxy) = std::fs::read_to_string(&config.proxy_conf)
        .ok()
        .and_then(|c| ProxyConfig::parse(&c))
    {
        if services.is_active(&config.proxy_service) {
            let name = proxy.server_names.first().and_then(|server| {
                DOH_PROVIDERS
                    .iter()
                    .find(|p| p.server_name == server.as_str())
                    .map(|p| p.name)
            });
            return ActiveMode::Doh(name);
        }
    }

    if let Ok(resolved) = std::fs::read_to_string(&config.resolved_conf) {
        if files::dns_over_tls_enabled(&resolved) {
            return ActiveMode::Dot(dot_provider_of(&resolved));
        }
    }

    match files::read_nameservers(&config.resolv_conf) {
        NameserverRead::Servers(servers) => ActiveMode::Standard(servers),
        NameserverRead::Missing => ActiveMode::Default,
        NameserverRead::Empty | NameserverRead::Unreadable(_) => ActiveMode::Unknown,
    }
}

fn dot_provider_of(resolved: &str) -> Option<&'static str> {
    let first = files::resolved_value(resolved, "DNS")?
        .split_whitespace()
        .next()?;
    let ip = first.split_once('#').map_or(first, |(ip, _)| ip);
    DOT_PROVIDERS
        .iter()
        .find(|p| p.servers.first() == Some(&ip))
        .map(|p| p.name)
}
