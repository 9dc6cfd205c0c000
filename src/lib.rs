//! Salt pre-install hook library
//!
//! Stops the Salt launch daemons, waits for launchd to unload them, and
//! removes the artifacts of a previous installation before the installer
//! lays down new files.

pub mod cleanup;
pub mod cli;
pub mod config;
pub mod error;
pub mod preinstall;
pub mod process_guard;
pub mod run_log;
pub mod run_state;
pub mod service_manager;
pub mod services;

// Re-export main types for convenience
pub use cleanup::{CleanupOutcome, CleanupTarget, cleanup, cleanup_all, default_targets};
pub use config::PreinstallConfig;
pub use error::{BENIGN_RACE_CODE, PreinstallError, Result};
pub use preinstall::{Preinstall, RunReport, run_preinstall};
pub use process_guard::{ControlCalls, InFlight, ProcessGuard};
pub use run_log::RunLog;
pub use run_state::{RunContext, RunStage, RunTransitionError};
pub use service_manager::{ControlOutcome, ControlOutput, Launchctl, ServiceManager};
pub use services::{
    ServiceDescriptor, StopPolicy, StopReport, default_services, ensure_stopped, stop_all,
};
