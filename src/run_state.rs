//! Run State Machine
//!
//! Tracks where a pre-install run is and refuses transitions that would
//! break the ordering guarantee: no artifact is touched before every service
//! has been confirmed stopped.
//!
//! # Stage Flow
//!
//! ```text
//! Start
//!     ↓
//! StoppingServices
//!     ↓
//! CleaningArtifacts
//!     ↓
//! Done
//!
//! (Any non-terminal stage can transition to Aborted)
//! ```

use std::fmt;
use thiserror::Error;

/// Stages of a pre-install run in sequential order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RunStage {
    /// Nothing has run yet
    Start = 0,

    /// Disabling and booting out services until none is loaded
    StoppingServices = 1,

    /// Removing artifacts of the previous installation
    CleaningArtifacts = 2,

    /// Run finished successfully (terminal state)
    Done = 3,

    /// A fatal error stopped the run (terminal state)
    Aborted = 255,
}

impl RunStage {
    /// Returns true if this is a terminal state (Done or Aborted)
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }

    /// Returns the next stage in the sequence, or None if at a terminal state
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Start => Some(Self::StoppingServices),
            Self::StoppingServices => Some(Self::CleaningArtifacts),
            Self::CleaningArtifacts => Some(Self::Done),
            Self::Done | Self::Aborted => None,
        }
    }

    /// Returns a human-readable description of this stage
    pub const fn description(self) -> &'static str {
        match self {
            Self::Start => "Not started",
            Self::StoppingServices => "Stopping services",
            Self::CleaningArtifacts => "Cleaning up previous installation",
            Self::Done => "Preinstall complete",
            Self::Aborted => "Preinstall aborted",
        }
    }
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors that can occur during stage transitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunTransitionError {
    /// Attempted to leave a terminal state
    #[error("Cannot transition from terminal state {from}")]
    FromTerminalState { from: RunStage },

    /// Attempted to jump to a stage other than the next one
    #[error("Cannot move from {from} to {to} (stages run strictly in order)")]
    OutOfOrder { from: RunStage, to: RunStage },
}

/// Owns the current stage of a run.
///
/// # Example
///
/// ```
/// use salt_preinstall::run_state::{RunContext, RunStage};
///
/// let mut ctx = RunContext::new();
/// ctx.advance().unwrap();
/// assert_eq!(ctx.current_stage(), RunStage::StoppingServices);
///
/// // Cleanup cannot be skipped to
/// assert!(ctx.transition_to(RunStage::Done).is_err());
/// ```
#[derive(Debug, Clone)]
pub struct RunContext {
    current: RunStage,
    aborted_at: Option<RunStage>,
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RunContext {
    /// Create a new context in the Start state.
    pub fn new() -> Self {
        Self {
            current: RunStage::Start,
            aborted_at: None,
        }
    }

    /// Returns the current stage
    #[inline]
    pub fn current_stage(&self) -> RunStage {
        self.current
    }

    /// Returns the stage that was active when the run aborted, if any
    #[inline]
    pub fn aborted_at(&self) -> Option<RunStage> {
        self.aborted_at
    }

    /// Advance to the next stage in sequence.
    pub fn advance(&mut self) -> Result<RunStage, RunTransitionError> {
        let next = self
            .current
            .next()
            .ok_or(RunTransitionError::FromTerminalState { from: self.current })?;

        tracing::debug!("Run stage: {} -> {}", self.current, next);
        self.current = next;
        Ok(next)
    }

    /// Transition to `target`, which must be the next stage in sequence.
    pub fn transition_to(&mut self, target: RunStage) -> Result<RunStage, RunTransitionError> {
        if self.current.is_terminal() {
            return Err(RunTransitionError::FromTerminalState { from: self.current });
        }
        if self.current.next() != Some(target) {
            return Err(RunTransitionError::OutOfOrder {
                from: self.current,
                to: target,
            });
        }
        self.advance()
    }

    /// Mark the run as aborted. Has no effect once the run is terminal.
    pub fn abort(&mut self) {
        if self.current.is_terminal() {
            return;
        }
        tracing::debug!("Run aborted during: {}", self.current);
        self.aborted_at = Some(self.current);
        self.current = RunStage::Aborted;
    }
}
