//! OS service control and the stop/settle/start restart protocol.

use crate::config::Config;
use crate::error::ServiceError;
use crate::util::{Completion, pause, run_with_timeout};
use std::time::Duration;

const SYSTEMCTL: &str = "systemctl";

/// Bound on `enable`, `disable`, `is-active` and cache flushes.
const CONTROL_TIMEOUT: Duration = Duration::from_secs(15);

/// Tried in order; whichever daemons exist get flushed.
const FLUSH_COMMANDS: &[(&str, &[&str])] = &[
    ("resolvectl", &["flush-caches"]),
    ("systemd-resolve", &["--flush-caches"]),
    ("service", &["nscd", "restart"]),
];

/// Service-manager operations the engine depends on.
pub trait ServiceControl {
    /// Stops `service`, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::StopFailed`] or [`ServiceError::Spawn`].
    fn stop(&self, service: &str, timeout: Duration) -> Result<(), ServiceError>;

    /// Starts `service`, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::StartFailed`], [`ServiceError::StartTimedOut`]
    /// or [`ServiceError::Spawn`].
    fn start(&self, service: &str, timeout: Duration) -> Result<(), ServiceError>;

    /// Enables `service` at boot.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::UnitFileFailed`] or [`ServiceError::Spawn`].
    fn enable(&self, service: &str) -> Result<(), ServiceError>;

    /// Disables `service` at boot.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::UnitFileFailed`] or [`ServiceError::Spawn`].
    fn disable(&self, service: &str) -> Result<(), ServiceError>;

    /// Returns `true` if `service` is currently running.
    fn is_active(&self, service: &str) -> bool;

    /// Drops cached answers held by local resolver daemons. Returns how
    /// many flush commands succeeded.
    fn flush_caches(&self) -> usize;
}

/// [`ServiceControl`] backed by `systemctl`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Systemctl;

impl Systemctl {
    fn run(verb: &str, service: &str, timeout: Duration) -> Result<Completion, ServiceError> {
        tracing::debug!(verb, service, "Running systemctl");
        run_with_timeout(SYSTEMCTL, &[verb, service], timeout).map_err(|source| {
            ServiceError::Spawn {
                program: SYSTEMCTL.to_string(),
                source,
            }
        })
    }
}

impl ServiceControl for Systemctl {
    fn stop(&self, service: &str, timeout: Duration) -> Result<(), ServiceError> {
        if Self::run("stop", service, timeout)?.success() {
            Ok(())
        } else {
            Err(ServiceError::StopFailed {
                service: service.to_string(),
            })
        }
    }

    fn start(&self, service: &str, timeout: Duration) -> Result<(), ServiceError> {
        match Self::run("start", service, timeout)? {
            Completion::Exited(status) if status.success() => Ok(()),
            Completion::Exited(status) => Err(ServiceError::StartFailed {
                service: service.to_string(),
                status: status.to_string(),
            }),
            Completion::TimedOut => Err(ServiceError::StartTimedOut {
                service: service.to_string(),
                timeout,
            }),
        }
    }

    fn enable(&self, service: &str) -> Result<(), ServiceError> {
        let done = Self::run("enable", service, CONTROL_TIMEOUT)?;
        unit_file_result("enable", service, done)
    }

    fn disable(&self, service: &str) -> Result<(), ServiceError> {
        let done = Self::run("disable", service, CONTROL_TIMEOUT)?;
        unit_file_result("disable", service, done)
    }

    fn is_active(&self, service: &str) -> bool {
        Self::run("is-active", service, CONTROL_TIMEOUT).is_ok_and(Completion::success)
    }

    fn flush_caches(&self) -> usize {
        FLUSH_COMMANDS
            .iter()
            .filter(|(program, args)| {
                run_with_timeout(program, args, CONTROL_TIMEOUT).is_ok_and(Completion::success)
            })
            .count()
    }
}

fn unit_file_result(
    verb: &'static str,
    service: &str,
    done: Completion,
) -> Result<(), ServiceError> {
    let reason = match done {
        Completion::Exited(status) if status.success() => return Ok(()),
        Completion::Exited(status) => status.to_string(),
        Completion::TimedOut => format!("timed out after {CONTROL_TIMEOUT:?}"),
    };
    Err(ServiceError::UnitFileFailed {
        service: service.to_string(),
        verb,
        reason,
    })
}

/// Restarts services as stop, settle, start.
///
/// The settle pause keeps the new process from racing the old one for its
/// listening port.
#[derive(Debug, Clone, Copy)]
pub struct ServiceSequencer {
    stop_timeout: Duration,
    start_timeout: Duration,
    settle: Duration,
}

impl ServiceSequencer {
    /// Creates a sequencer with explicit bounds.
    #[must_use]
    pub const fn new(stop_timeout: Duration, start_timeout: Duration, settle: Duration) -> Self {
        Self {
            stop_timeout,
            start_timeout,
            settle,
        }
    }

    /// Takes the bounds from `config`.
    #[must_use]
    pub const fn from_config(config: &Config) -> Self {
        Self::new(config.stop_timeout, config.start_timeout, config.settle)
    }

    /// Restarts `service`.
    ///
    /// A failed stop is treated as "already stopped". The start must
    /// succeed. Nothing is rolled back on failure.
    ///
    /// # Errors
    ///
    /// Returns the start-side [`ServiceError`].
    pub fn restart(&self, control: &dyn ServiceControl, service: &str) -> Result<(), ServiceError> {
        tracing::info!(service, "Restarting service");

        if let Err(e) = control.stop(service, self.stop_timeout) {
            tracing::debug!(service, error = %e, "Stop failed, assuming already stopped");
        }

        pause(self.settle);

        control.start(service, self.start_timeout).inspect_err(|e| {
            tracing::warn!(service, error = %e, "Service failed to start");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Recorder {
        calls: RefCell<Vec<String>>,
        fail_stop: bool,
        start_result: Option<fn(&str) -> ServiceError>,
    }

    impl ServiceControl for Recorder {
        fn stop(&self, service: &str, _: Duration) -> Result<(), ServiceError> {
            self.calls.borrow_mut().push(format!("stop {service}"));
            if self.fail_stop {
                return Err(ServiceError::StopFailed {
                    service: service.into(),
                });
            }
            Ok(())
        }

        fn start(&self, service: &str, _: Duration) -> Result<(), ServiceError> {
            self.calls.borrow_mut().push(format!("start {service}"));
            self.start_result.map_or(Ok(()), |f| Err(f(service)))
        }

        fn enable(&self, _: &str) -> Result<(), ServiceError> {
            Ok(())
        }

        fn disable(&self, _: &str) -> Result<(), ServiceError> {
            Ok(())
        }

        fn is_active(&self, _: &str) -> bool {
            false
        }

        fn flush_caches(&self) -> usize {
            0
        }
    }

    fn sequencer() -> ServiceSequencer {
        ServiceSequencer::new(Duration::from_secs(10), Duration::from_secs(15), Duration::ZERO)
    }

    #[test]
    fn restart_stops_then_starts() {
        let r = Recorder::default();
        sequencer().restart(&r, "systemd-resolved").unwrap();
        assert_eq!(
            *r.calls.borrow(),
            ["stop systemd-resolved", "start systemd-resolved"]
        );
    }

    #[test]
    fn stop_failure_is_tolerated() {
        let r = Recorder {
            fail_stop: true,
            ..Recorder::default()
        };
        sequencer().restart(&r, "dnscrypt-proxy").unwrap();
        assert_eq!(r.calls.borrow().len(), 2);
    }

    #[test]
    fn start_failure_kinds_are_distinguishable() {
        let failed = Recorder {
            start_result: Some(|s| ServiceError::StartFailed {
                service: s.into(),
                status: "exit status: 1".into(),
            }),
            ..Recorder::default()
        };
        assert!(matches!(
            sequencer().restart(&failed, "x"),
            Err(ServiceError::StartFailed { .. })
        ));

        let timed_out = Recorder {
            start_result: Some(|s| ServiceError::StartTimedOut {
                service: s.into(),
                timeout: Duration::from_secs(15),
            }),
            ..Recorder::default()
        };
        assert!(matches!(
            sequencer().restart(&timed_out, "x"),
            Err(ServiceError::StartTimedOut { .. })
        ));
    }

    #[test]
    fn unit_file_failures_name_the_verb() {
        use std::os::unix::process::ExitStatusExt;
        use std::process::ExitStatus;

        assert!(unit_file_result("enable", "x", Completion::Exited(ExitStatus::from_raw(0))).is_ok());

        let err = unit_file_result("enable", "dnscrypt-proxy", Completion::Exited(ExitStatus::from_raw(1 << 8)))
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::UnitFileFailed { verb: "enable", .. }
        ));
        assert!(err.to_string().starts_with("failed to enable dnscrypt-proxy"));

        let err = unit_file_result("disable", "dnscrypt-proxy", Completion::TimedOut).unwrap_err();
        assert!(matches!(
            err,
            ServiceError::UnitFileFailed { verb: "disable", ref reason, .. } if reason.starts_with("timed out")
        ));
    }

    #[test]
    fn from_config_copies_bounds() {
        let s = ServiceSequencer::from_config(&Config::default());
        assert_eq!(s.stop_timeout, Duration::from_secs(10));
        assert_eq!(s.start_timeout, Duration::from_secs(15));
        assert_eq!(s.settle, Duration::from_secs(1));
    }

    #[test]
    #[ignore = "requires systemd and root"]
    fn real_systemctl_restart() {
        sequencer().restart(&Systemctl, "systemd-resolved").unwrap();
        assert!(Systemctl.is_active("systemd-resolved"));
    }
}
