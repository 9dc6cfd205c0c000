//! Pre-install orchestration
//!
//! Runs the two phases in order and drives the run state machine:
//!
//! ```text
//! Start -> StoppingServices -> CleaningArtifacts -> Done
//!            (any fatal error) -> Aborted
//! ```
//!
//! # Failure Policy
//!
//! There is no rollback. Every fatal error is written to the run log exactly
//! once, by the trap that caught it; the run stops, the stage becomes
//! `Aborted`, and the error is returned so the entry point can exit non-zero.

use crate::cleanup::{CleanupOutcome, cleanup_all};
use crate::config::PreinstallConfig;
use crate::error::Result;
use crate::run_log::RunLog;
use crate::run_state::{RunContext, RunStage};
use crate::service_manager::ServiceManager;
use crate::services::stop_all;
use std::path::PathBuf;

/// Summary of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Services that were loaded and got stopped (or would be, in dry run).
    pub stopped: Vec<String>,
    /// Artifacts removed (or that would be, in dry run).
    pub removed: Vec<PathBuf>,
    /// Artifacts that were already absent.
    pub skipped: Vec<PathBuf>,
    /// Control calls that returned the benign race code.
    pub benign_races: u32,
}

/// A pre-install run over a service manager and a run log.
pub struct Preinstall<'a, M: ServiceManager + ?Sized> {
    config: &'a PreinstallConfig,
    manager: &'a mut M,
    log: &'a mut RunLog,
    context: RunContext,
}

impl<'a, M: ServiceManager + ?Sized> Preinstall<'a, M> {
    pub fn new(config: &'a PreinstallConfig, manager: &'a mut M, log: &'a mut RunLog) -> Self {
        Self {
            config,
            manager,
            log,
            context: RunContext::new(),
        }
    }

    /// Current stage of the run.
    pub fn stage(&self) -> RunStage {
        self.context.current_stage()
    }

    /// Stage state.
    pub fn context(&self) -> &RunContext {
        &self.context
    }

    /// Execute the run. On error the stage is `Aborted`.
    pub fn run(&mut self) -> Result<RunReport> {
        match self.execute() {
            Ok(report) => Ok(report),
            Err(e) => {
                self.context.abort();
                Err(e)
            }
        }
    }

    /// Move to `stage`. A refused transition is fatal like any other failure.
    #[track_caller]
    fn enter(&mut self, stage: RunStage) -> Result<()> {
        match self.context.transition_to(stage) {
            Ok(_) => Ok(()),
            Err(e) => Err(self.log.abort(e.into())),
        }
    }

    fn execute(&mut self) -> Result<RunReport> {
        let mut report = RunReport::default();
        let dry_run = self.config.dry_run;

        self.enter(RunStage::StoppingServices)?;
        self.log.line(if dry_run {
            "[DRY RUN] Preinstall started"
        } else {
            "Preinstall started"
        });

        let policy = self.config.stop_policy();
        let stops = stop_all(
            &mut *self.manager,
            &self.config.services,
            &policy,
            &mut *self.log,
        )?;
        for (name, stop) in stops {
            report.benign_races += stop.benign_races;
            if stop.was_running {
                report.stopped.push(name);
            }
        }

        self.enter(RunStage::CleaningArtifacts)?;
        let outcomes = cleanup_all(&self.config.targets, &mut *self.log, dry_run)?;
        for (target, outcome) in self.config.targets.iter().zip(outcomes) {
            let path = target.path().to_path_buf();
            match outcome {
                CleanupOutcome::Removed | CleanupOutcome::WouldRemove => report.removed.push(path),
                CleanupOutcome::Absent => report.skipped.push(path),
            }
        }

        self.enter(RunStage::Done)?;
        self.log.line("Preinstall Completed Successfully");
        tracing::info!(
            "Preinstall complete: {} service(s) stopped, {} artifact(s) removed, {} absent",
            report.stopped.len(),
            report.removed.len(),
            report.skipped.len()
        );

        Ok(report)
    }
}

/// Run the whole pre-install sequence.
pub fn run_preinstall<M>(
    config: &PreinstallConfig,
    manager: &mut M,
    log: &mut RunLog,
) -> Result<RunReport>
where
    M: ServiceManager + ?Sized,
{
    Preinstall::new(config, manager, log).run()
}
