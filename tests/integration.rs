//! Integration tests for `linux-resolver`.
//!
//! Everything runs inside a temp dir with in-memory stand-ins for the
//! service manager, the immutable flag and name lookup. Tests marked
//! `#[ignore]` drive the real host and require root:
//!
//! ```bash
//! sudo cargo test -- --ignored
//! ```

use linux_resolver::files::{self, RESOLVED_BASELINE};
use linux_resolver::{
    ActiveMode, BackupManager, Config, Connectivity, Engine, FileAttributes, LockOutcome, Mode,
    NameLookup, Outcome, ResolverError, ServiceControl, ServiceError, Verification, Warning,
};
use std::cell::RefCell;
use std::collections::HashSet;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct FakeServices {
    calls: Rc<RefCell<Vec<String>>>,
    active: Rc<RefCell<HashSet<String>>>,
    broken: Option<&'static str>,
}

impl FakeServices {
    fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    fn called(&self, call: &str) -> bool {
        self.calls.borrow().iter().any(|c| c == call)
    }
}

impl ServiceControl for FakeServices {
    fn stop(&self, service: &str, _: Duration) -> Result<(), ServiceError> {
        self.calls.borrow_mut().push(format!("stop {service}"));
        self.active.borrow_mut().remove(service);
        Ok(())
    }

    fn start(&self, service: &str, _: Duration) -> Result<(), ServiceError> {
        self.calls.borrow_mut().push(format!("start {service}"));
        if self.broken == Some(service) {
            return Err(ServiceError::StartFailed {
                service: service.to_string(),
                status: "exit status: 1".to_string(),
            });
        }
        self.active.borrow_mut().insert(service.to_string());
        Ok(())
    }

    fn enable(&self, service: &str) -> Result<(), ServiceError> {
        self.calls.borrow_mut().push(format!("enable {service}"));
        Ok(())
    }

    fn disable(&self, service: &str) -> Result<(), ServiceError> {
        self.calls.borrow_mut().push(format!("disable {service}"));
        Ok(())
    }

    fn is_active(&self, service: &str) -> bool {
        self.active.borrow().contains(service)
    }

    fn flush_caches(&self) -> usize {
        self.calls.borrow_mut().push("flush".to_string());
        1
    }
}

#[derive(Clone, Default)]
struct FakeAttributes {
    calls: Rc<RefCell<Vec<&'static str>>>,
    unsupported: bool,
    /// Simulates another writer replacing the file right after the lock.
    clobber_with: Option<&'static str>,
}

impl FileAttributes for FakeAttributes {
    fn lock(&self, path: &Path) -> std::io::Result<LockOutcome> {
        self.calls.borrow_mut().push("lock");
        if let Some(content) = self.clobber_with {
            std::fs::write(path, content)?;
        }
        Ok(if self.unsupported {
            LockOutcome::Unsupported
        } else {
            LockOutcome::Locked
        })
    }

    fn unlock(&self, _: &Path) -> std::io::Result<()> {
        self.calls.borrow_mut().push("unlock");
        Ok(())
    }
}

struct FakeLookup(bool);

impl NameLookup for FakeLookup {
    fn resolve(&self, _: &str, _: Duration) -> bool {
        self.0
    }
}

struct Harness {
    dir: tempfile::TempDir,
    services: FakeServices,
    attributes: FakeAttributes,
}

impl Harness {
    fn new() -> Self {
        Self::with(FakeServices::default(), FakeAttributes::default())
    }

    fn with(services: FakeServices, attributes: FakeAttributes) -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            services,
            attributes,
        }
    }

    fn config(&self) -> Config {
        Config::rooted_at(self.dir.path())
            .with_settle(Duration::ZERO)
            .with_verify_delay(Duration::ZERO)
    }

    fn engine(&self) -> Engine {
        Engine::new(self.config())
            .with_services(self.services.clone())
            .with_attributes(self.attributes.clone())
            .with_lookup(FakeLookup(true))
    }

    fn path(&self, name: &str) -> std::path::PathBuf {
        self.dir.path().join(name)
    }

    fn read(&self, name: &str) -> String {
        std::fs::read_to_string(self.path(name)).unwrap()
    }

    fn backups_of(&self, name: &str) -> Vec<String> {
        let prefix = format!("{name}.backup_");
        let mut found: Vec<String> = std::fs::read_dir(self.dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with(&prefix))
            .collect();
        found.sort();
        found
    }
}

// ---------------------------------------------------------------------------
// Standard mode
// ---------------------------------------------------------------------------

#[test]
fn standard_writes_nameservers_in_order() {
    let h = Harness::new();
    let report = h
        .engine()
        .apply(&Mode::standard("Google", ["8.8.8.8", "8.8.4.4"]))
        .unwrap();

    let content = h.read("resolv.conf");
    let lines: Vec<_> = content.lines().filter(|l| l.starts_with("nameserver")).collect();
    assert_eq!(lines, ["nameserver 8.8.8.8", "nameserver 8.8.4.4"]);

    assert_eq!(report.outcome(), Outcome::Success);
    assert_eq!(report.nameservers, ["8.8.8.8", "8.8.4.4"]);
    assert_eq!(report.verification, Some(Verification::Matched));
    assert_eq!(report.connectivity.unwrap().status, Connectivity::Excellent);
    assert_eq!(*h.attributes.calls.borrow(), ["lock"]);
    assert!(h.services.called("flush"));
    assert!(!h.path("resolv.conf.tmp").exists());
}

#[test]
fn standard_drops_invalid_address_with_warning() {
    let h = Harness::new();
    let report = h
        .engine()
        .apply(&Mode::standard("Custom", ["1.1.1.1", "not-an-ip"]))
        .unwrap();

    assert_eq!(files::parse_nameservers(&h.read("resolv.conf")), ["1.1.1.1"]);
    assert_eq!(report.outcome(), Outcome::SuccessWithWarnings);
    assert_eq!(
        report.warnings,
        [Warning::InvalidAddress("not-an-ip".to_string())]
    );
}

#[test]
fn label_cannot_inject_nameserver_lines() {
    let h = Harness::new();
    let report = h
        .engine()
        .apply(&Mode::standard(
            "Custom\nnameserver 6.6.6.6\nnameserver not-an-ip",
            ["1.1.1.1"],
        ))
        .unwrap();

    let content = h.read("resolv.conf");
    assert_eq!(files::parse_nameservers(&content), ["1.1.1.1"]);
    assert_eq!(content.lines().count(), 2);
    assert_eq!(report.target, "Custom nameserver 6.6.6.6 nameserver not-an-ip");

    let log = h.read("dns.log");
    assert!(log.lines().all(|line| line.split(" | ").count() >= 3));
    assert!(log.contains("| SET_DNS | Provider: Custom nameserver 6.6.6.6"));
}

#[test]
fn all_invalid_addresses_abort_before_any_write() {
    let h = Harness::new();
    std::fs::write(h.path("resolv.conf"), "nameserver 192.168.1.1\n").unwrap();

    let err = h
        .engine()
        .apply(&Mode::standard("Custom", ["nope", "999.1.1.1"]))
        .unwrap_err();

    assert!(matches!(err, ResolverError::Validation(_)));
    assert_eq!(h.read("resolv.conf"), "nameserver 192.168.1.1\n");
    assert!(h.backups_of("resolv.conf").is_empty());
    assert!(h.attributes.calls.borrow().is_empty());
    assert!(h.services.calls().is_empty());
}

#[test]
fn reapplying_a_mode_is_byte_identical() {
    let h = Harness::new();
    let engine = h.engine();
    let mode = Mode::preset("cloudflare").unwrap();

    engine.apply(&mode).unwrap();
    let first = std::fs::read(h.path("resolv.conf")).unwrap();
    engine.apply(&mode).unwrap();
    let second = std::fs::read(h.path("resolv.conf")).unwrap();

    assert_eq!(first, second);
    assert_eq!(h.backups_of("resolv.conf").len(), 1);
}

#[test]
fn previous_resolver_file_is_backed_up_and_unlocked() {
    let h = Harness::new();
    std::fs::write(h.path("resolv.conf"), "nameserver 192.168.1.1\n").unwrap();

    h.engine().apply(&Mode::preset("1").unwrap()).unwrap();

    let latest = BackupManager::find_latest(&h.path("resolv.conf")).unwrap();
    assert_eq!(
        std::fs::read_to_string(latest.path).unwrap(),
        "nameserver 192.168.1.1\n"
    );
    assert_eq!(*h.attributes.calls.borrow(), ["unlock", "lock"]);
}

#[test]
fn unsupported_attribute_is_informational() {
    let h = Harness::with(
        FakeServices::default(),
        FakeAttributes {
            unsupported: true,
            ..FakeAttributes::default()
        },
    );
    let report = h.engine().apply(&Mode::preset("2").unwrap()).unwrap();

    assert_eq!(
        report.warnings,
        [Warning::UnsupportedAttribute(h.path("resolv.conf"))]
    );
    assert_eq!(report.verification, Some(Verification::Matched));
}

#[test]
fn verification_mismatch_is_reported_not_raised() {
    let h = Harness::with(
        FakeServices::default(),
        FakeAttributes {
            clobber_with: Some("nameserver 1.1.1.1\n"),
            ..FakeAttributes::default()
        },
    );
    let report = h
        .engine()
        .apply(&Mode::standard("Google", ["8.8.8.8", "8.8.4.4"]))
        .unwrap();

    let expected = vec!["8.8.8.8".to_string(), "8.8.4.4".to_string()];
    let observed = vec!["1.1.1.1".to_string()];
    assert_eq!(
        report.verification,
        Some(Verification::Mismatched {
            expected: expected.clone(),
            observed: observed.clone(),
        })
    );
    assert!(report.connectivity.is_none());
    assert!(report
        .warnings
        .contains(&Warning::VerificationMismatch { expected, observed }));

    let log = h.read("dns.log");
    assert!(log.contains("VERIFY_FAIL"));
    assert!(log.contains("\"1.1.1.1\""));
}

// ---------------------------------------------------------------------------
// DoT / DoH
// ---------------------------------------------------------------------------

#[test]
fn dot_points_at_stub_and_configures_resolved() {
    let h = Harness::new();
    let report = h.engine().apply(&Mode::dot("Cloudflare")).unwrap();

    assert_eq!(files::parse_nameservers(&h.read("resolv.conf")), ["127.0.0.53"]);
    let resolved = h.read("resolved.conf");
    assert!(files::dns_over_tls_enabled(&resolved));
    assert!(resolved.contains("DNSSEC=allow-downgrade"));
    assert!(resolved.contains("Domains=~."));

    assert_eq!(
        h.services.calls()[..3],
        [
            "enable systemd-resolved",
            "stop systemd-resolved",
            "start systemd-resolved"
        ]
    );
    assert_eq!(report.verification, Some(Verification::Matched));
    assert_eq!(h.engine().current_mode(), ActiveMode::Dot(Some("Cloudflare")));
}

#[test]
fn leaving_dot_restores_previous_resolved_config() {
    let h = Harness::new();
    let original = "[Resolve]\n#DNS=\nLLMNR=no\n";
    std::fs::write(h.path("resolved.conf"), original).unwrap();
    let engine = h.engine();

    engine.apply(&Mode::dot("Google")).unwrap();
    engine.apply(&Mode::dot("Cloudflare")).unwrap();
    assert_eq!(engine.current_mode(), ActiveMode::Dot(Some("Cloudflare")));

    engine.apply(&Mode::preset("quad9").unwrap()).unwrap();

    assert_eq!(h.read("resolved.conf"), original);
    assert!(matches!(engine.current_mode(), ActiveMode::Standard(_)));
}

#[test]
fn leaving_dot_without_backup_writes_baseline() {
    let h = Harness::new();
    let engine = h.engine();

    engine.apply(&Mode::dot("Quad9")).unwrap();
    engine.apply(&Mode::preset("1").unwrap()).unwrap();

    assert_eq!(h.read("resolved.conf"), RESOLVED_BASELINE);
    assert!(matches!(engine.current_mode(), ActiveMode::Standard(_)));
}

#[test]
fn restart_failure_aborts_and_keeps_written_configs() {
    let h = Harness::with(
        FakeServices {
            broken: Some("systemd-resolved"),
            ..FakeServices::default()
        },
        FakeAttributes::default(),
    );

    let err = h.engine().apply(&Mode::dot("Cloudflare")).unwrap_err();

    assert!(matches!(
        err,
        ResolverError::Service(ServiceError::StartFailed { .. })
    ));
    assert!(files::dns_over_tls_enabled(&h.read("resolved.conf")));
    assert_eq!(files::parse_nameservers(&h.read("resolv.conf")), ["127.0.0.53"]);
    assert!(!h.attributes.calls.borrow().contains(&"lock"));
    assert!(h.read("dns.log").contains("DoT Cloudflare: failed"));
}

#[test]
fn doh_writes_proxy_config_and_starts_proxy() {
    let h = Harness::new();
    let engine = h.engine();
    let report = engine.apply(&Mode::doh("Cloudflare")).unwrap();

    let proxy = h.read("dnscrypt-proxy.toml");
    assert!(proxy.contains("doh_servers = true"));
    assert!(proxy.contains("[static.cloudflare]"));
    assert!(proxy.contains("sdns://AgcAAAAAAAAABzEuMC4wLjEAEmRucy5jbG91ZGZsYXJlLmNvbQovZG5zLXF1ZXJ5"));

    assert_eq!(files::parse_nameservers(&h.read("resolv.conf")), ["127.0.2.1"]);
    assert!(h.services.called("start dnscrypt-proxy"));
    assert_eq!(report.nameservers, ["127.0.2.1"]);
    assert_eq!(engine.current_mode(), ActiveMode::Doh(Some("Cloudflare")));
}

#[test]
fn leaving_doh_stops_the_proxy() {
    let h = Harness::new();
    let engine = h.engine();

    engine.apply(&Mode::doh("Google")).unwrap();
    engine.apply(&Mode::preset("2").unwrap()).unwrap();

    assert!(h.services.called("stop dnscrypt-proxy"));
    assert!(h.services.called("disable dnscrypt-proxy"));
    assert_eq!(
        engine.current_mode(),
        ActiveMode::Standard(vec![
            "1.1.1.1".into(),
            "1.0.0.1".into(),
            "2606:4700:4700::1111".into(),
            "2606:4700:4700::1001".into(),
        ])
    );
}

#[test]
fn unknown_provider_has_no_side_effects() {
    let h = Harness::new();

    let err = h.engine().apply(&Mode::doh("UnknownProvider")).unwrap_err();

    assert!(matches!(err, ResolverError::UnknownProvider { .. }));
    assert!(!h.path("resolv.conf").exists());
    assert!(!h.path("dnscrypt-proxy.toml").exists());
    assert!(h.services.calls().is_empty());
}

#[test]
fn dot_without_resolved_directory_fails_early() {
    let h = Harness::new();
    let mut config = h.config();
    config.resolved_conf = h.path("systemd/resolved.conf");
    std::fs::write(h.path("resolv.conf"), "nameserver 192.168.1.1\n").unwrap();

    let engine = Engine::new(config)
        .with_services(h.services.clone())
        .with_attributes(h.attributes.clone());
    let err = engine.apply(&Mode::dot("Cloudflare")).unwrap_err();

    assert!(matches!(err, ResolverError::Io { op: "locate", .. }));
    assert_eq!(h.read("resolv.conf"), "nameserver 192.168.1.1\n");
}

// ---------------------------------------------------------------------------
// Default
// ---------------------------------------------------------------------------

#[test]
fn restore_default_deletes_resolver_file_and_resets_resolved() {
    let h = Harness::new();
    let engine = h.engine();
    engine.apply(&Mode::dot("Cloudflare")).unwrap();

    let report = engine.restore_default().unwrap();

    assert!(!h.path("resolv.conf").exists());
    assert_eq!(h.read("resolved.conf"), RESOLVED_BASELINE);
    assert!(h.services.called("start NetworkManager"));
    assert!(report.verification.is_none());
    assert_eq!(engine.current_mode(), ActiveMode::Default);
    assert!(!h.backups_of("resolv.conf").is_empty());
}

#[test]
fn apply_default_is_restore_default() {
    let h = Harness::new();
    std::fs::write(h.path("resolv.conf"), "nameserver 10.0.0.1\n").unwrap();

    h.engine().apply(&Mode::Default).unwrap();
    assert!(!h.path("resolv.conf").exists());
    // Idempotent: nothing left to remove the second time.
    h.engine().apply(&Mode::Default).unwrap();
    assert_eq!(h.engine().current_mode(), ActiveMode::Default);
}

#[test]
fn network_manager_failure_is_fatal_on_restore() {
    let h = Harness::with(
        FakeServices {
            broken: Some("NetworkManager"),
            ..FakeServices::default()
        },
        FakeAttributes::default(),
    );
    assert!(matches!(
        h.engine().restore_default(),
        Err(ResolverError::Service(_))
    ));
}

// ---------------------------------------------------------------------------
// Housekeeping
// ---------------------------------------------------------------------------

#[test]
fn status_reports_files() {
    let h = Harness::new();
    let engine = h.engine();
    assert_eq!(engine.status().mode, ActiveMode::Default);

    engine.apply(&Mode::dot("Google")).unwrap();
    let status = engine.status();
    assert!(status.dns_over_tls);
    assert_eq!(status.nameservers.servers(), ["127.0.0.53"]);
}

#[test]
fn cleanup_removes_only_stale_backups() {
    let h = Harness::new();
    let stale = h.path("resolv.conf.backup_20250101_120000");
    let fresh = h.path("resolved.conf.backup_20260101_120000");
    std::fs::write(&stale, "old").unwrap();
    std::fs::write(&fresh, "new").unwrap();
    let month_ago = std::time::SystemTime::now() - Duration::from_secs(30 * 86_400);
    std::fs::File::options()
        .write(true)
        .open(&stale)
        .unwrap()
        .set_modified(month_ago)
        .unwrap();

    assert_eq!(h.engine().cleanup_backups(), 1);
    assert!(!stale.exists());
    assert!(fresh.exists());
    assert!(h.read("dns.log").contains("| CLEANUP |"));
}

#[test]
fn audit_log_records_the_transition() {
    let h = Harness::new();
    std::fs::write(h.path("resolv.conf"), "nameserver 192.168.1.1\n").unwrap();
    h.engine().apply(&Mode::preset("1").unwrap()).unwrap();

    let log = h.read("dns.log");
    for action in ["| SET_DNS |", "| BACKUP |", "| FLUSH |", "| TEST_CONNECTIVITY |", "| TRANSITION |"] {
        assert!(log.contains(action), "missing {action}");
    }
    assert!(log.contains("Standard Google: success"));
}

#[test]
fn connectivity_probe_classifies_failure() {
    let h = Harness::new();
    let engine = Engine::new(h.config())
        .with_services(h.services.clone())
        .with_lookup(FakeLookup(false));
    assert_eq!(engine.test_connectivity().status, Connectivity::Disconnected);
}

// ---------------------------------------------------------------------------
// Root-only tests
// ---------------------------------------------------------------------------

#[test]
#[ignore = "requires root and rewrites the host's /etc/resolv.conf"]
fn real_standard_then_default() {
    let engine = Engine::new(Config::default());
    let report = engine.apply(&Mode::preset("1").unwrap()).unwrap();
    assert_eq!(report.verification, Some(Verification::Matched));
    engine.restore_default().unwrap();
}
