//! Internal utilities.

use std::process::{Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How a bounded child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The process exited on its own.
    Exited(ExitStatus),
    /// The process was still running at the deadline and has been killed.
    TimedOut,
}

impl Completion {
    /// Returns `true` for a zero exit status.
    #[must_use]
    pub fn success(self) -> bool {
        matches!(self, Self::Exited(status) if status.success())
    }
}

/// Runs `program args..` with stdio discarded, killing it after `timeout`.
///
/// # Errors
///
/// Returns the spawn error if the program cannot be started.
pub fn run_with_timeout(
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> std::io::Result<Completion> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;

    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Completion::Exited(status));
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            tracing::debug!(program, ?args, ?timeout, "Command timed out");
            return Ok(Completion::TimedOut);
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Sleeps unless `d` is zero.
pub fn pause(d: Duration) {
    if !d.is_zero() {
        std::thread::sleep(d);
    }
}
