//! Structured transition results.

use crate::mode::ModeKind;
use crate::verify::{ConnectivityReport, Verification};
use std::fmt::{self, Display};
use std::path::PathBuf;

/// A non-fatal condition observed during a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// An input nameserver was not an IP address and was dropped.
    InvalidAddress(String),
    /// The filesystem has no immutable attribute; the file stays writable.
    UnsupportedAttribute(PathBuf),
    /// The resolver file read back differs from what was written.
    VerificationMismatch {
        /// What the transition wrote.
        expected: Vec<String>,
        /// What the file holds now.
        observed: Vec<String>,
    },
    /// A best-effort step failed and was skipped.
    BestEffort {
        /// The step that failed.
        op: &'static str,
        /// Why.
        error: String,
    },
}

impl Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidAddress(s) => write!(f, "ignored invalid address {s:?}"),
            Self::UnsupportedAttribute(p) => {
                write!(f, "immutable attribute not supported on {}", p.display())
            }
            Self::VerificationMismatch { expected, observed } => {
                write!(f, "expected nameservers {expected:?}, found {observed:?}")
            }
            Self::BestEffort { op, error } => write!(f, "{op} skipped: {error}"),
        }
    }
}

/// Overall classification of a finished transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Everything went as planned.
    Success,
    /// The target mode is in place but some warnings were raised.
    SuccessWithWarnings,
}

/// What a successful transition did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionReport {
    /// The mode that was applied.
    pub mode: ModeKind,
    /// Label, provider or `"DHCP"`.
    pub target: String,
    /// Nameservers written to the resolver file (empty for Default).
    pub nameservers: Vec<String>,
    /// Read-back result, when the mode leaves a resolver file behind.
    pub verification: Option<Verification>,
    /// Resolution health, probed after a matching verification.
    pub connectivity: Option<ConnectivityReport>,
    /// Non-fatal conditions, in the order they occurred.
    pub warnings: Vec<Warning>,
}

impl TransitionReport {
    pub(crate) fn new(mode: ModeKind, target: impl Into<String>) -> Self {
        Self {
            mode,
            target: target.into(),
            nameservers: Vec::new(),
            verification: None,
            connectivity: None,
            warnings: Vec::new(),
        }
    }

    /// Success, with or without warnings.
    #[must_use]
    pub fn outcome(&self) -> Outcome {
        if self.warnings.is_empty() {
            Outcome::Success
        } else {
            Outcome::SuccessWithWarnings
        }
    }

    /// Records a tolerated failure of `op` and carries on.
    ///
    /// Returns the success value, or `None` after logging the error and
    /// pushing a [`Warning::BestEffort`].
    pub fn best_effort<T, E: Display>(
        &mut self,
        op: &'static str,
        result: std::result::Result<T, E>,
    ) -> Option<T> {
        match result {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(op, error = %e, "Best-effort step failed");
                self.warnings.push(Warning::BestEffort {
                    op,
                    error: e.to_string(),
                });
                None
            }
        }
    }

    pub(crate) fn warn(&mut self, warning: Warning) {
        self.warnings.push(warning);
    }
}
