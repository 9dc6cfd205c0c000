//! Run log and failure trap
//!
//! The run log is an append-only text file of timestamped lines. It is the
//! only record an operator has of what the hook did inside the installer, so
//! every action of the run is written here.
//!
//! # Failure Trap
//!
//! All failures of a run pass through [`RunLog::on_error`] or
//! [`RunLog::abort`]:
//!
//! - exit code 36 (a bootout racing another teardown) is benign and returns
//!   control to the caller without writing anything
//! - any other failure appends exactly one
//!   `<entry point> caught error: <code> on line <location> command was: <command>`
//!   line and hands the error back so the caller can stop the run
//!
//! # Lifecycle
//!
//! The file is opened lazily on the first line with `create + append`, so a
//! log that does not exist yet is created by its first line and an existing
//! one is never truncated. Each line goes out in a single `write_all` on an
//! `O_APPEND` descriptor, which keeps lines from two concurrent installer
//! invocations whole. The descriptor is flushed and closed on drop.

use crate::error::{CallSite, PreinstallError, Result};
use crate::service_manager::ControlOutcome;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::panic::Location;
use std::path::{Path, PathBuf};

/// Timestamp prefix format for every run-log line.
const TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Append-only, timestamped run log.
#[derive(Debug)]
pub struct RunLog {
    path: PathBuf,
    entry_point: String,
    file: Option<File>,
}

impl RunLog {
    /// Create a run log handle for `path`.
    ///
    /// `entry_point` names the program in fatal lines (the equivalent of `$0`).
    /// Nothing touches the filesystem until the first line is written.
    pub fn open(path: impl Into<PathBuf>, entry_point: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            entry_point: entry_point.into(),
            file: None,
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Program name used in fatal lines.
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    /// Append one timestamped line.
    ///
    /// Write failures are reported through `tracing` and otherwise ignored;
    /// the run does not abort because its diagnostics could not be written.
    pub fn line(&mut self, message: impl fmt::Display) {
        let stamp = chrono::Local::now().format(TIMESTAMP_FORMAT);
        let text = format!("{}: {}\n", stamp, message);

        if let Err(e) = self.append(text.as_bytes()) {
            tracing::warn!("Failed to write run log {}: {}", self.path.display(), e);
        }
    }

    fn append(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        if self.file.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            tracing::debug!("Opened run log {}", self.path.display());
            self.file = Some(file);
        }

        match self.file.as_mut() {
            Some(file) => file.write_all(bytes),
            None => Ok(()),
        }
    }

    /// Trap point for a service control call result.
    ///
    /// Success and the benign race code return `Ok(())` without writing.
    /// Any other code is logged as fatal and returned as
    /// [`PreinstallError::Service`] attributed to `location`.
    pub fn on_error(&mut self, exit_code: i32, location: CallSite, command: &str) -> Result<()> {
        match ControlOutcome::from_exit_code(exit_code) {
            ControlOutcome::Success => Ok(()),
            ControlOutcome::BenignRace => {
                tracing::debug!("Ignoring benign exit code {} from `{}`", exit_code, command);
                Ok(())
            }
            ControlOutcome::Failed(code) => Err(self.abort(PreinstallError::Service {
                code,
                command: command.to_string(),
                location,
            })),
        }
    }

    /// Record a fatal error and hand it back for propagation.
    ///
    /// Errors that did not capture where they happened are attributed to the
    /// caller of `abort`.
    #[track_caller]
    pub fn abort(&mut self, err: PreinstallError) -> PreinstallError {
        let caller: CallSite = Location::caller();
        let location = err.location().unwrap_or(caller);

        let message = format!(
            "{} caught error: {} on line {} command was: {}",
            self.entry_point,
            err.exit_code(),
            location,
            err.command()
        );
        self.line(message);
        tracing::error!("{}", err);
        err
    }
}

impl Drop for RunLog {
    fn drop(&mut self) {
        if let Some(file) = self.file.as_mut() {
            let _ = file.flush();
            let _ = file.sync_data();
        }
    }
}
