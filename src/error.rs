//! Error handling for the pre-install hook
//!
//! Every fatal condition of a run is a `PreinstallError`. Each variant carries
//! the command text and the source location of the call that failed, which is
//! exactly what the failure trap writes to the run log.

use std::panic::Location;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Exit code reported by launchctl when a bootout races another teardown.
pub const BENIGN_RACE_CODE: i32 = 36;

/// Exit code recorded for a service that never unloaded within the timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Exit status of a run that could not load its configuration.
pub const CONFIG_EXIT_CODE: i32 = 2;

/// Source location of a failing call.
pub type CallSite = &'static Location<'static>;

/// Main error type for the pre-install hook
#[derive(Error, Debug)]
pub enum PreinstallError {
    /// A service control call exited with a non-benign code
    #[error("`{command}` exited with code {code}")]
    Service {
        code: i32,
        command: String,
        location: CallSite,
    },

    /// The service manager binary could not be run at all
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        location: CallSite,
        #[source]
        source: std::io::Error,
    },

    /// Removing a filesystem artifact failed
    #[error("failed to remove {}: {source}", path.display())]
    Cleanup {
        path: PathBuf,
        command: String,
        location: CallSite,
        #[source]
        source: std::io::Error,
    },

    /// A service was still loaded when the stop timeout expired
    #[error("{service} still loaded after {}s", waited.as_secs())]
    StopTimeout {
        service: String,
        waited: Duration,
        command: String,
        location: CallSite,
    },

    /// Run stage ordering was violated
    #[error("Run state error: {0}")]
    Transition(#[from] crate::run_state::RunTransitionError),

    /// Configuration errors (loading, validation)
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors outside of artifact removal
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for pre-install operations
pub type Result<T> = std::result::Result<T, PreinstallError>;

impl PreinstallError {
    /// Build a service control failure attributed to the caller.
    #[track_caller]
    pub fn service(code: i32, command: impl Into<String>) -> Self {
        Self::Service {
            code,
            command: command.into(),
            location: Location::caller(),
        }
    }

    /// Build a spawn failure attributed to the caller.
    #[track_caller]
    pub fn spawn(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::Spawn {
            command: command.into(),
            location: Location::caller(),
            source,
        }
    }

    /// Build a removal failure attributed to the caller.
    #[track_caller]
    pub fn cleanup(
        path: impl Into<PathBuf>,
        command: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::Cleanup {
            path: path.into(),
            command: command.into(),
            location: Location::caller(),
            source,
        }
    }

    /// Build a stop timeout attributed to the caller.
    #[track_caller]
    pub fn stop_timeout(
        service: impl Into<String>,
        waited: Duration,
        command: impl Into<String>,
    ) -> Self {
        Self::StopTimeout {
            service: service.into(),
            waited,
            command: command.into(),
            location: Location::caller(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Exit code reported in the fatal run-log line.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Service { code, .. } => *code,
            Self::Spawn { source, .. } | Self::Cleanup { source, .. } => {
                source.raw_os_error().unwrap_or(1)
            }
            Self::StopTimeout { .. } => TIMEOUT_EXIT_CODE,
            Self::Io(e) => e.raw_os_error().unwrap_or(1),
            Self::Config(_) => CONFIG_EXIT_CODE,
            Self::Transition(_) | Self::Json(_) => 1,
        }
    }

    /// Source location of the failing call, when one was captured.
    pub fn location(&self) -> Option<CallSite> {
        match self {
            Self::Service { location, .. }
            | Self::Spawn { location, .. }
            | Self::Cleanup { location, .. }
            | Self::StopTimeout { location, .. } => Some(*location),
            Self::Transition(_) | Self::Config(_) | Self::Io(_) | Self::Json(_) => None,
        }
    }

    /// Command text of the failing call.
    pub fn command(&self) -> String {
        match self {
            Self::Service { command, .. }
            | Self::Spawn { command, .. }
            | Self::Cleanup { command, .. }
            | Self::StopTimeout { command, .. } => command.clone(),
            other => other.to_string(),
        }
    }
}
