//! Cancellation of in-flight launchctl calls
//!
//! Each control call runs as the leader of its own process group and is
//! recorded in a [`ControlCalls`] set for as long as it runs. When the hook is
//! told to stop, either by SIGINT/SIGTERM/SIGHUP or by a [`ProcessGuard`]
//! going out of scope, every recorded group gets SIGTERM and, once the grace
//! period is over, SIGKILL. A cancelled installer never leaves a launchctl
//! call tearing services down on its own.

use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use std::collections::BTreeSet;
use std::process::Child;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::{Duration, Instant};

/// Grace period after SIGTERM when a signal cancels the run.
const SIGNAL_GRACE: Duration = Duration::from_secs(3);

/// Grace period after SIGTERM when a guard goes out of scope.
const GUARD_GRACE: Duration = Duration::from_secs(5);

const EXIT_POLL: Duration = Duration::from_millis(25);

/// Process groups of the control calls currently running.
///
/// Clones share the same set.
#[derive(Debug, Clone, Default)]
pub struct ControlCalls {
    groups: Arc<Mutex<BTreeSet<i32>>>,
}

impl ControlCalls {
    /// An empty, unshared set.
    pub fn new() -> Self {
        Self::default()
    }

    /// The set used by [`Launchctl`](crate::Launchctl) and the signal handlers.
    pub fn global() -> Self {
        static GLOBAL: OnceLock<ControlCalls> = OnceLock::new();
        GLOBAL.get_or_init(Self::new).clone()
    }

    fn groups(&self) -> MutexGuard<'_, BTreeSet<i32>> {
        // the set stays consistent even if a holder panicked
        self.groups.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record `child`, which must lead its own process group, until the
    /// returned handle is dropped.
    pub fn track(&self, child: &Child) -> InFlight {
        let pgid = child.id() as i32;
        self.groups().insert(pgid);
        tracing::trace!("Control call group {} started", pgid);
        InFlight {
            calls: self.clone(),
            pgid,
        }
    }

    /// Number of control calls currently running.
    pub fn in_flight(&self) -> usize {
        self.groups().len()
    }

    /// Cancel every running call.
    ///
    /// The set is drained first, so concurrent or repeated cancellations
    /// signal each group once.
    pub fn terminate(&self, grace: Duration) {
        let mut alive: Vec<i32> = std::mem::take(&mut *self.groups()).into_iter().collect();
        if alive.is_empty() {
            return;
        }

        tracing::info!("Cancelling {} running launchctl call(s)", alive.len());
        alive.retain(|&pgid| killpg(Pid::from_raw(pgid), Signal::SIGTERM).is_ok());

        let deadline = Instant::now() + grace;
        while !alive.is_empty() && Instant::now() < deadline {
            std::thread::sleep(EXIT_POLL);
            alive.retain(|&pgid| group_exists(pgid));
        }

        for pgid in alive {
            tracing::warn!("Control call group {} ignored SIGTERM, killing it", pgid);
            let _ = killpg(Pid::from_raw(pgid), Signal::SIGKILL);
        }
    }
}

/// A process group exists while any member, zombies included, is left.
fn group_exists(pgid: i32) -> bool {
    killpg(Pid::from_raw(pgid), None).is_ok()
}

/// Registration of one running control call; released on drop.
#[derive(Debug)]
pub struct InFlight {
    calls: ControlCalls,
    pgid: i32,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.calls.groups().remove(&self.pgid);
        tracing::trace!("Control call group {} finished", self.pgid);
    }
}

/// Cancels the control calls still running when it goes out of scope.
#[derive(Debug)]
pub struct ProcessGuard {
    calls: ControlCalls,
    grace: Duration,
}

impl ProcessGuard {
    pub fn new(calls: ControlCalls) -> Self {
        Self {
            calls,
            grace: GUARD_GRACE,
        }
    }

    /// Override the SIGTERM grace period.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        self.calls.terminate(self.grace);
    }
}

/// Install handlers for SIGINT, SIGTERM and SIGHUP.
///
/// The first signal cancels the global control calls and exits with
/// `128 + signo`. Lines already in the run log are on disk at that point,
/// each one went out in its own write.
pub fn init_signal_handlers() -> std::io::Result<()> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    std::thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            if let Some(signo) = signals.forever().next() {
                let name = Signal::try_from(signo).map_or("signal", Signal::as_str);
                tracing::warn!("Received {}, cancelling the run", name);

                ControlCalls::global().terminate(SIGNAL_GRACE);
                std::process::exit(128 + signo);
            }
        })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use std::os::unix::process::{CommandExt, ExitStatusExt};
    use std::process::{Command, Stdio};

    /// A stand-in for a launchctl call that hangs.
    fn hanging_call() -> Child {
        Command::new("sleep")
            .arg("30")
            .process_group(0)
            .spawn()
            .unwrap()
    }

    #[test]
    fn test_finished_call_is_released() {
        let calls = ControlCalls::new();
        let mut child = Command::new("true").process_group(0).spawn().unwrap();

        {
            let _in_flight = calls.track(&child);
            assert_eq!(calls.in_flight(), 1);
        }
        assert_eq!(calls.in_flight(), 0);
        child.wait().unwrap();
    }

    #[test]
    fn test_clones_share_the_set() {
        let calls = ControlCalls::new();
        let mut child = hanging_call();
        let _in_flight = calls.clone().track(&child);

        assert_eq!(calls.in_flight(), 1);
        assert_eq!(ControlCalls::new().in_flight(), 0);

        calls.terminate(Duration::from_secs(2));
        child.wait().unwrap();
    }

    #[test]
    fn test_terminate_sends_sigterm() {
        let calls = ControlCalls::new();
        let mut child = hanging_call();
        let in_flight = calls.track(&child);

        calls.terminate(Duration::from_secs(2));

        let status = child.wait().unwrap();
        assert_eq!(status.signal(), Some(Signal::SIGTERM as i32));
        assert_eq!(calls.in_flight(), 0);
        drop(in_flight);
        assert_eq!(calls.in_flight(), 0);
    }

    #[test]
    fn test_terminate_escalates_to_sigkill() {
        let calls = ControlCalls::new();
        let mut child = Command::new("sh")
            .args(["-c", "trap '' TERM; echo ready; exec sleep 30"])
            .stdout(Stdio::piped())
            .process_group(0)
            .spawn()
            .unwrap();
        let mut ready = String::new();
        BufReader::new(child.stdout.take().unwrap())
            .read_line(&mut ready)
            .unwrap();
        let _in_flight = calls.track(&child);

        calls.terminate(Duration::from_millis(200));

        let status = child.wait().unwrap();
        assert_eq!(status.signal(), Some(Signal::SIGKILL as i32));
    }

    #[test]
    fn test_terminate_with_nothing_running() {
        let calls = ControlCalls::new();
        let started = Instant::now();
        calls.terminate(Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_guard_cancels_on_drop() {
        let calls = ControlCalls::new();
        let mut child = hanging_call();
        let _in_flight = calls.track(&child);

        drop(ProcessGuard::new(calls.clone()).with_grace(Duration::from_secs(2)));

        assert!(child.wait().unwrap().signal().is_some());
        assert_eq!(calls.in_flight(), 0);
    }
}
