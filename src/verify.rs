//! Post-transition checks.

use crate::audit::AuditLog;
use crate::files::read_nameservers;
use crate::util::{pause, run_with_timeout};
use std::path::PathBuf;
use std::time::Duration;

/// Outcome of reading the resolver file back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// Every expected nameserver is present.
    Matched,
    /// At least one expected nameserver is missing.
    Mismatched {
        /// What the transition wrote.
        expected: Vec<String>,
        /// What the file holds now.
        observed: Vec<String>,
    },
}

impl Verification {
    /// Returns `true` for [`Verification::Matched`].
    #[must_use]
    pub const fn is_matched(&self) -> bool {
        matches!(self, Self::Matched)
    }
}

/// Health class of OS-level name resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    /// Every probe domain resolved.
    Excellent,
    /// Some probe domains resolved.
    Unstable,
    /// No probe domain resolved.
    Disconnected,
}

impl Connectivity {
    /// Classifies `resolved` successes out of `total` lookups.
    #[must_use]
    pub const fn classify(resolved: usize, total: usize) -> Self {
        if resolved == 0 {
            Self::Disconnected
        } else if resolved >= total {
            Self::Excellent
        } else {
            Self::Unstable
        }
    }

    /// Upper-case label used in the audit log.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Excellent => "EXCELLENT",
            Self::Unstable => "UNSTABLE",
            Self::Disconnected => "DISCONNECTED",
        }
    }
}

/// Connectivity probe result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivityReport {
    /// Overall class.
    pub status: Connectivity,
    /// Domains that resolved.
    pub resolved: Vec<String>,
    /// Domains that did not resolve or timed out.
    pub failed: Vec<String>,
}

/// OS name resolution, as used by the connectivity probe.
pub trait NameLookup {
    /// Returns `true` if `domain` resolves within `timeout`.
    fn resolve(&self, domain: &str, timeout: Duration) -> bool;
}

/// [`NameLookup`] through `getent hosts`, which goes through NSS and
/// therefore the resolver file, unlike `dig`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GetentLookup;

impl NameLookup for GetentLookup {
    fn resolve(&self, domain: &str, timeout: Duration) -> bool {
        match run_with_timeout("getent", &["hosts", domain], timeout) {
            Ok(done) => done.success(),
            Err(e) => {
                tracing::debug!(domain, error = %e, "getent unavailable");
                false
            }
        }
    }
}

/// Reads back what a transition wrote and probes resolution health.
#[derive(Debug, Clone)]
pub struct VerificationProbe {
    resolv_conf: PathBuf,
    delay: Duration,
    audit: AuditLog,
}

impl VerificationProbe {
    /// Creates a probe for `resolv_conf` waiting `delay` before each read.
    #[must_use]
    pub fn new(resolv_conf: impl Into<PathBuf>, delay: Duration, audit: AuditLog) -> Self {
        Self {
            resolv_conf: resolv_conf.into(),
            delay,
            audit,
        }
    }

    /// Checks that every address in `expected` is a nameserver in the
    /// resolver file. Extra nameservers are tolerated.
    ///
    /// A mismatch is logged with both lists and returned, never raised.
    pub fn verify<S: AsRef<str>>(&self, expected: &[S]) -> Verification {
        pause(self.delay);

        let observed = read_nameservers(&self.resolv_conf).servers().to_vec();
        if expected
            .iter()
            .all(|ip| observed.iter().any(|o| o == ip.as_ref()))
        {
            tracing::info!(nameservers = ?observed, "Verified resolver configuration");
            return Verification::Matched;
        }

        let expected: Vec<String> = expected.iter().map(|s| s.as_ref().to_string()).collect();
        tracing::warn!(?expected, ?observed, "Resolver configuration mismatch");
        self.audit.record(
            "VERIFY_FAIL",
            format_args!("Expected {expected:?}, got {observed:?}"),
        );
        Verification::Mismatched { expected, observed }
    }

    /// Resolves each of `domains` and classifies the outcome. Diagnostic
    /// only.
    pub fn connectivity<S: AsRef<str>>(
        &self,
        lookup: &dyn NameLookup,
        domains: &[S],
        timeout: Duration,
    ) -> ConnectivityReport {
        let (resolved, failed): (Vec<String>, Vec<String>) = domains
            .iter()
            .map(|d| d.as_ref().to_string())
            .partition(|d| lookup.resolve(d, timeout));

        let status = Connectivity::classify(resolved.len(), domains.len());
        tracing::info!(
            status = status.as_str(),
            resolved = resolved.len(),
            total = domains.len(),
            "Connectivity probe finished"
        );
        self.audit.record(
            "TEST_CONNECTIVITY",
            format_args!("Status: {} ({}/{})", status.as_str(), resolved.len(), domains.len()),
        );
        ConnectivityReport {
            status,
            resolved,
            failed,
        }
    }
}
