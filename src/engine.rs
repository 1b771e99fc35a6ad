//! Mode transitions.
//!
//! Every transition follows the same skeleton and stops at the first fatal
//! step:
//!
//! 1. validate inputs (nothing has been touched if this fails)
//! 2. undo the previous encrypted mode, best-effort
//! 3. clear the immutable flag on the resolver file
//! 4. back up the resolver file
//! 5. atomically write (or, for Default, delete) the resolver file
//! 6. back up and write the dependent service config, then restart it
//! 7. set the immutable flag again
//! 8. read the file back and probe resolution
//! 9. append the outcome to the audit log
//!
//! There is no stored "current mode": each transition builds its target
//! state from scratch, so applying the same mode twice yields the same
//! files. Files written before a failed restart are left in place; rolling
//! back is the caller's decision.

use crate::atomic::write_atomic;
use crate::audit::AuditLog;
use crate::backup::BackupManager;
use crate::config::Config;
use crate::error::{ResolverError, Result};
use crate::files::{
    self, NameserverRead, ProxyConfig, RESOLVED_BASELINE, ResolvedConfig, STUB_RESOLVER,
};
use crate::guard::{FileAttributes, IoctlAttributes, LockOutcome};
use crate::mode::{self, ActiveMode, Mode, ModeKind};
use crate::provider::{doh_provider, dot_provider};
use crate::report::{TransitionReport, Warning};
use crate::service::{ServiceControl, ServiceSequencer, Systemctl};
use crate::verify::{ConnectivityReport, GetentLookup, NameLookup, Verification, VerificationProbe};
use std::path::Path;

/// Snapshot of what is active right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    /// Inferred mode.
    pub mode: ActiveMode,
    /// Nameservers in the resolver file.
    pub nameservers: NameserverRead,
    /// Whether the stub resolver config has `DNSOverTLS=yes`.
    pub dns_over_tls: bool,
}

/// Applies resolution modes to the host.
///
/// # Example
///
/// ```rust,ignore
/// use linux_resolver::{Config, Engine, Mode};
///
/// let engine = Engine::new(Config::default());
/// engine.cleanup_backups();
///
/// let report = engine.apply(&Mode::preset("cloudflare")?)?;
/// for warning in &report.warnings {
///     eprintln!("warning: {warning}");
/// }
/// ```
pub struct Engine {
    config: Config,
    audit: AuditLog,
    backups: BackupManager,
    sequencer: ServiceSequencer,
    probe: VerificationProbe,
    services: Box<dyn ServiceControl>,
    attributes: Box<dyn FileAttributes>,
    lookup: Box<dyn NameLookup>,
}

impl Engine {
    /// Creates an engine driving the real host: `systemctl`, the
    /// immutable-flag ioctl, and `getent`.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let audit = AuditLog::new(config.audit_log.clone());
        let backups = BackupManager::new(
            [
                config.resolv_conf.clone(),
                config.resolved_conf.clone(),
                config.proxy_conf.clone(),
            ],
            audit.clone(),
        );
        let probe = VerificationProbe::new(config.resolv_conf.clone(), config.verify_delay, audit.clone());
        Self {
            sequencer: ServiceSequencer::from_config(&config),
            config,
            audit,
            backups,
            probe,
            services: Box::new(Systemctl),
            attributes: Box::new(IoctlAttributes),
            lookup: Box::new(GetentLookup),
        }
    }

    /// Replaces the service manager.
    #[must_use]
    pub fn with_services(mut self, services: impl ServiceControl + 'static) -> Self {
        self.services = Box::new(services);
        self
    }

    /// Replaces the immutable-flag toggle.
    #[must_use]
    pub fn with_attributes(mut self, attributes: impl FileAttributes + 'static) -> Self {
        self.attributes = Box::new(attributes);
        self
    }

    /// Replaces the name lookup used by the connectivity probe.
    #[must_use]
    pub fn with_lookup(mut self, lookup: impl NameLookup + 'static) -> Self {
        self.lookup = Box::new(lookup);
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Infers the active mode from the files on disk.
    #[must_use]
    pub fn current_mode(&self) -> ActiveMode {
        mode::infer(&self.config, self.services.as_ref())
    }

    /// Reports the active mode, nameservers and DoT flag.
    #[must_use]
    pub fn status(&self) -> Status {
        let dns_over_tls = std::fs::read_to_string(&self.config.resolved_conf)
            .is_ok_and(|c| files::dns_over_tls_enabled(&c));
        Status {
            mode: self.current_mode(),
            nameservers: files::read_nameservers(&self.config.resolv_conf),
            dns_over_tls,
        }
    }

    /// Switches the host to `mode`.
    ///
    /// # Errors
    ///
    /// - [`ResolverError::Validation`] if no nameserver is a valid address
    /// - [`ResolverError::UnknownProvider`] for an unknown DoT/DoH provider
    /// - [`ResolverError::Io`] if a backup, write or delete fails
    /// - [`ResolverError::Service`] if the dependent service does not start
    pub fn apply(&self, mode: &Mode) -> Result<TransitionReport> {
        let result = match mode {
            Mode::Standard { label, nameservers } => self.apply_standard(label, nameservers),
            Mode::Dot { provider } => self.apply_dot(provider),
            Mode::Doh { provider } => self.apply_doh(provider),
            Mode::Default => return self.restore_default(),
        };
        self.finish(mode.kind(), mode.target(), result)
    }

    /// Hands the resolver file back to the network manager.
    ///
    /// Resets the stub resolver config to [`RESOLVED_BASELINE`], deletes the
    /// resolver file and restarts the network manager so it regenerates it.
    /// Never prompts; confirmation belongs to the caller.
    ///
    /// # Errors
    ///
    /// Returns [`ResolverError::Io`] if a backup, write or delete fails, or
    /// [`ResolverError::Service`] if the network manager does not start.
    pub fn restore_default(&self) -> Result<TransitionReport> {
        let result = self.apply_default();
        self.finish(ModeKind::Default, "DHCP", result)
    }

    /// Removes backups older than the configured retention.
    pub fn cleanup_backups(&self) -> usize {
        self.backups.cleanup(self.config.backup_max_age_days)
    }

    /// Resolves the configured probe domains.
    pub fn test_connectivity(&self) -> ConnectivityReport {
        self.probe.connectivity(
            self.lookup.as_ref(),
            &self.config.probe_domains,
            self.config.probe_timeout,
        )
    }

    /// Flushes local resolver caches. Returns how many flushes succeeded.
    pub fn flush_dns_cache(&self) -> usize {
        let flushed = self.services.flush_caches();
        tracing::debug!(flushed, "Flushed DNS caches");
        self.audit
            .record("FLUSH", format_args!("DNS cache flushed ({flushed} command(s) succeeded)"));
        flushed
    }

    // -----------------------------------------------------------------------
    // Per-mode procedures
    // -----------------------------------------------------------------------

    fn apply_standard(&self, label: &str, inputs: &[String]) -> Result<TransitionReport> {
        let label = files::single_line(label);
        let label = label.as_str();
        let mut report = TransitionReport::new(ModeKind::Standard, label);

        let (valid, invalid) = files::partition_nameservers(inputs);
        for bad in invalid {
            tracing::warn!(input = %bad, "Ignoring invalid nameserver address");
            report.warn(Warning::InvalidAddress(bad));
        }
        if valid.is_empty() {
            return Err(ResolverError::Validation(format!("{inputs:?}")));
        }

        tracing::info!(label, nameservers = ?valid, "Applying standard nameservers");
        self.audit
            .record("SET_DNS", format_args!("Provider: {label}, IPs: {valid:?}"));

        self.leave_previous(ModeKind::Standard, &mut report);
        self.replace_resolv_conf(&files::render_standard(label, &valid), &mut report)?;
        self.lock_resolv_conf(&mut report);
        self.verify(valid, &mut report);
        Ok(report)
    }

    fn apply_dot(&self, name: &str) -> Result<TransitionReport> {
        let provider = dot_provider(name)?;
        require_parent(&self.config.resolved_conf)?;
        let mut report = TransitionReport::new(ModeKind::Dot, provider.name);

        tracing::info!(provider = provider.name, "Enabling DNS-over-TLS");
        self.audit
            .record("SETUP_DOT", format_args!("Provider: {}", provider.name));

        self.leave_previous(ModeKind::Dot, &mut report);
        self.replace_resolv_conf(&files::render_dot(provider), &mut report)?;
        self.replace_dependent(
            &self.config.resolved_conf,
            &ResolvedConfig::for_dot(provider).render(),
        )?;
        self.enable_and_restart(&self.config.resolved_service, &mut report)?;
        self.lock_resolv_conf(&mut report);
        self.verify(vec![STUB_RESOLVER.to_string()], &mut report);
        Ok(report)
    }

    fn apply_doh(&self, name: &str) -> Result<TransitionReport> {
        let provider = doh_provider(name)?;
        require_parent(&self.config.proxy_conf)?;
        let proxy = ProxyConfig::for_doh(provider)
            .render()
            .map_err(ResolverError::Config)?;
        let mut report = TransitionReport::new(ModeKind::Doh, provider.name);

        tracing::info!(
            provider = provider.name,
            listen = provider.listen,
            "Enabling DNS-over-HTTPS"
        );
        self.audit.record(
            "SETUP_DOH",
            format_args!("Provider: {}, listen: {}", provider.name, provider.listen),
        );

        self.leave_previous(ModeKind::Doh, &mut report);
        self.replace_resolv_conf(&files::render_doh(provider), &mut report)?;
        self.replace_dependent(&self.config.proxy_conf, &proxy)?;
        self.enable_and_restart(&self.config.proxy_service, &mut report)?;
        self.lock_resolv_conf(&mut report);
        self.verify(vec![provider.listen_ip().to_string()], &mut report);
        Ok(report)
    }

    fn apply_default(&self) -> Result<TransitionReport> {
        let mut report = TransitionReport::new(ModeKind::Default, "DHCP");
        tracing::info!("Restoring DHCP-managed resolver configuration");
        self.audit
            .record("RESTORE", "Restoring to default configuration");

        if matches!(self.current_mode(), ActiveMode::Doh(_)) {
            self.stop_proxy(&mut report);
        }

        let resolved = &self.config.resolved_conf;
        if parent_exists(resolved) {
            self.replace_dependent(resolved, RESOLVED_BASELINE)?;
            report.best_effort(
                "restart stub resolver",
                self.sequencer
                    .restart(self.services.as_ref(), &self.config.resolved_service),
            );
        }

        let resolv = &self.config.resolv_conf;
        if resolv.symlink_metadata().is_ok() {
            report.best_effort("unlock", self.attributes.unlock(resolv));
            self.backups.snapshot(resolv)?;
            match std::fs::remove_file(resolv) {
                Ok(()) => tracing::info!(path = %resolv.display(), "Removed resolver file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(ResolverError::io("remove", resolv, e)),
            }
        }

        self.sequencer
            .restart(self.services.as_ref(), &self.config.network_service)?;
        self.flush_dns_cache();
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Shared steps
    // -----------------------------------------------------------------------

    /// Undoes the encrypted mode that is active, if any. Failures only warn.
    fn leave_previous(&self, target: ModeKind, report: &mut TransitionReport) {
        match self.current_mode() {
            ActiveMode::Dot(_) => self.reset_resolved(report),
            ActiveMode::Doh(_) if target != ModeKind::Doh => self.stop_proxy(report),
            _ => {}
        }
    }

    /// Puts the stub resolver config back to its latest backup (or the
    /// baseline when none exists) and restarts it.
    fn reset_resolved(&self, report: &mut TransitionReport) {
        let path = &self.config.resolved_conf;
        tracing::debug!(path = %path.display(), "Restoring stub resolver config");

        let restored = report.best_effort("restore stub resolver config", self.backups.restore_latest(path));
        if matches!(restored, Some(None)) {
            report.best_effort(
                "reset stub resolver config",
                write_atomic(path, RESOLVED_BASELINE, &self.audit),
            );
        }
        report.best_effort(
            "restart stub resolver",
            self.sequencer
                .restart(self.services.as_ref(), &self.config.resolved_service),
        );
    }

    fn stop_proxy(&self, report: &mut TransitionReport) {
        let service = &self.config.proxy_service;
        tracing::debug!(service = %service, "Stopping DoH proxy");
        report.best_effort("stop DoH proxy", self.services.stop(service, self.config.stop_timeout));
        report.best_effort("disable DoH proxy", self.services.disable(service));
    }

    /// Steps 3 to 5 for the resolver file.
    fn replace_resolv_conf(&self, content: &str, report: &mut TransitionReport) -> Result<()> {
        let path = &self.config.resolv_conf;
        if path.exists() {
            report.best_effort("unlock", self.attributes.unlock(path));
        }
        self.backups.snapshot(path)?;
        write_atomic(path, content, &self.audit)
    }

    fn replace_dependent(&self, path: &Path, content: &str) -> Result<()> {
        self.backups.snapshot(path)?;
        write_atomic(path, content, &self.audit)
    }

    fn enable_and_restart(&self, service: &str, report: &mut TransitionReport) -> Result<()> {
        report.best_effort("enable service", self.services.enable(service));
        self.sequencer
            .restart(self.services.as_ref(), service)
            .map_err(|e| {
                self.audit.record("ERROR", format_args!("Restart of {service} failed: {e}"));
                ResolverError::from(e)
            })
    }

    fn lock_resolv_conf(&self, report: &mut TransitionReport) {
        let path = &self.config.resolv_conf;
        match self.attributes.lock(path) {
            Ok(LockOutcome::Locked) => {
                tracing::info!(path = %path.display(), "Resolver file locked (immutable)");
            }
            Ok(LockOutcome::Unsupported) => {
                tracing::info!(
                    path = %path.display(),
                    "Filesystem has no immutable attribute, leaving file unlocked"
                );
                report.warn(Warning::UnsupportedAttribute(path.clone()));
            }
            Err(e) => {
                report.best_effort::<(), _>("lock", Err(e));
            }
        }
    }

    /// Flush, read back, and probe when the read-back matched.
    fn verify(&self, expected: Vec<String>, report: &mut TransitionReport) {
        self.flush_dns_cache();

        let verification = self.probe.verify(&expected);
        match &verification {
            Verification::Matched => report.connectivity = Some(self.test_connectivity()),
            Verification::Mismatched { expected, observed } => {
                report.warn(Warning::VerificationMismatch {
                    expected: expected.clone(),
                    observed: observed.clone(),
                });
            }
        }
        report.verification = Some(verification);
        report.nameservers = expected;
    }

    fn finish(
        &self,
        kind: ModeKind,
        target: &str,
        result: Result<TransitionReport>,
    ) -> Result<TransitionReport> {
        let target = files::single_line(target);
        let target = target.as_str();
        match &result {
            Ok(report) => {
                tracing::info!(
                    mode = %kind,
                    target,
                    warnings = report.warnings.len(),
                    "Transition complete"
                );
                self.audit.record(
                    "TRANSITION",
                    format_args!(
                        "{kind} {target}: success, {} warning(s)",
                        report.warnings.len()
                    ),
                );
            }
            Err(e) => {
                tracing::warn!(mode = %kind, target, error = %e, "Transition failed");
                self.audit
                    .record("TRANSITION", format_args!("{kind} {target}: failed: {e}"));
            }
        }
        result
    }
}

fn parent_exists(path: &Path) -> bool {
    path.parent().is_none_or(Path::is_dir)
}

/// Fails before any side effect when the directory of a dependent config
/// is missing, which means its service is not installed.
fn require_parent(path: &Path) -> Result<()> {
    if parent_exists(path) {
        return Ok(());
    }
    Err(ResolverError::io(
        "locate",
        path,
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "config directory missing; is the service installed?",
        ),
    ))
}
