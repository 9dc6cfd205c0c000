//! Service manager control surface
//!
//! The hook does not own the service manager; it only needs three questions
//! answered and two requests carried out:
//!
//! - is a service currently registered/loaded?
//! - disable it (so launchd will not restart it)
//! - boot it out given its definition file
//!
//! [`ServiceManager`] is that seam. [`Launchctl`] is the production
//! implementation; tests substitute scripted fakes.
//!
//! # Process Lifecycle
//!
//! Every launchctl invocation leads its own process group and is tracked in
//! [`ControlCalls`] while it runs, so cancelling the hook also cancels an
//! in-flight control call.

use crate::error::{BENIGN_RACE_CODE, PreinstallError, Result};
use crate::process_guard::ControlCalls;
use crate::services::ServiceDescriptor;
use std::fmt;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// Classified result of a service control call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    /// Exit code 0.
    Success,
    /// Exit code 36: the request is already being carried out by another actor.
    BenignRace,
    /// Any other exit code. Signal termination is reported as `-1`.
    Failed(i32),
}

impl ControlOutcome {
    /// Classify a raw exit code.
    pub const fn from_exit_code(code: i32) -> Self {
        match code {
            0 => Self::Success,
            BENIGN_RACE_CODE => Self::BenignRace,
            other => Self::Failed(other),
        }
    }

    /// Classify a process status code (`None` when killed by a signal).
    pub const fn from_status(code: Option<i32>) -> Self {
        match code {
            Some(code) => Self::from_exit_code(code),
            None => Self::Failed(-1),
        }
    }
}

impl fmt::Display for ControlOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::BenignRace => write!(f, "already in progress"),
            Self::Failed(code) => write!(f, "failed with exit code {}", code),
        }
    }
}

/// Output of one service control call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlOutput {
    /// Command line as it was run, for the run log.
    pub command: String,
    /// Exit code (None if terminated by signal).
    pub exit_code: Option<i32>,
    /// Standard error from the call.
    pub stderr: String,
}

impl ControlOutput {
    /// Classify this output.
    pub fn outcome(&self) -> ControlOutcome {
        ControlOutcome::from_status(self.exit_code)
    }

    /// Exit code with signal termination mapped to `-1`.
    pub fn code(&self) -> i32 {
        self.exit_code.unwrap_or(-1)
    }
}

/// External service manager consumed by the shutdown controller.
pub trait ServiceManager {
    /// Whether the service is currently registered/loaded.
    fn is_loaded(&mut self, service: &ServiceDescriptor) -> Result<bool>;

    /// Disable the service so it is not restarted. Idempotent.
    fn disable(&mut self, service: &ServiceDescriptor) -> Result<ControlOutput>;

    /// Stop and unload the service using its definition file.
    fn bootout(&mut self, service: &ServiceDescriptor) -> Result<ControlOutput>;
}

/// launchd control through the `launchctl` binary.
#[derive(Debug, Clone)]
pub struct Launchctl {
    binary: PathBuf,
    domain: String,
    calls: ControlCalls,
}

impl Default for Launchctl {
    fn default() -> Self {
        Self::new("/bin/launchctl", "system")
    }
}

impl Launchctl {
    /// Create a launchctl driver for `binary` targeting `domain`.
    pub fn new(binary: impl Into<PathBuf>, domain: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            domain: domain.into(),
            calls: ControlCalls::global(),
        }
    }

    /// Track running calls in `calls` instead of the process-wide set.
    pub fn with_calls(mut self, calls: ControlCalls) -> Self {
        self.calls = calls;
        self
    }

    /// Command text for `args`, as written to the run log.
    fn command_line(&self, args: &[String]) -> String {
        let mut line = self.binary.display().to_string();
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// Run launchctl with `args` in its own process group.
    fn run(&self, args: Vec<String>) -> Result<ControlOutput> {
        let command = self.command_line(&args);
        tracing::debug!("Running {}", command);

        let child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .spawn()
            .map_err(|e| PreinstallError::spawn(command.clone(), e))?;

        let in_flight = self.calls.track(&child);
        let waited = child.wait_with_output();
        drop(in_flight);

        let output = waited.map_err(|e| PreinstallError::spawn(command.clone(), e))?;
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let exit_code = output.status.code();

        tracing::debug!("{} exited with {:?}", command, exit_code);
        Ok(ControlOutput {
            command,
            exit_code,
            stderr,
        })
    }
}

impl ServiceManager for Launchctl {
    fn is_loaded(&mut self, service: &ServiceDescriptor) -> Result<bool> {
        let output = self.run(vec!["list".to_string(), service.label.clone()])?;
        Ok(output.exit_code == Some(0))
    }

    fn disable(&mut self, service: &ServiceDescriptor) -> Result<ControlOutput> {
        self.run(vec![
            "disable".to_string(),
            format!("{}/{}", self.domain, service.label),
        ])
    }

    fn bootout(&mut self, service: &ServiceDescriptor) -> Result<ControlOutput> {
        self.run(vec![
            "bootout".to_string(),
            self.domain.clone(),
            service.plist.display().to_string(),
        ])
    }
}
