//! Service Shutdown Controller
//!
//! Stops every configured launch daemon and waits until launchd no longer
//! lists it. For each service, in order:
//!
//! 1. query whether the service is loaded; if not, it is done
//! 2. log `Stopping <name>...`
//! 3. disable it (so launchd will not restart it), then boot it out
//! 4. sleep one poll interval, log `Stopped Successfully`, query again
//!
//! A bootout racing another teardown (exit code 36) keeps the loop going.
//! Every other failure goes through the run-log trap and stops the run.

use crate::error::{PreinstallError, Result};
use crate::run_log::RunLog;
use crate::service_manager::{ControlOutcome, ControlOutput, ServiceManager};
use serde::{Deserialize, Serialize};
use std::panic::Location;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Directory holding the launchd definition files.
pub const LAUNCH_DAEMONS_DIR: &str = "/Library/LaunchDaemons";

/// Salt roles installed as launch daemons, in shutdown order.
pub const SALT_ROLES: [&str; 4] = ["minion", "master", "syndic", "api"];

/// A service the hook must stop before files are replaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Logical name used in the run log (e.g. `salt-minion`).
    pub name: String,
    /// launchd label (e.g. `com.saltstack.salt.minion`).
    pub label: String,
    /// Path of the launchd definition file.
    pub plist: PathBuf,
}

impl ServiceDescriptor {
    pub fn new(name: impl Into<String>, label: impl Into<String>, plist: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            plist: plist.into(),
        }
    }

    /// Descriptor for a Salt role such as `minion`.
    pub fn salt(role: &str) -> Self {
        let label = format!("com.saltstack.salt.{}", role);
        let plist = PathBuf::from(LAUNCH_DAEMONS_DIR).join(format!("{}.plist", label));
        Self::new(format!("salt-{}", role), label, plist)
    }
}

/// The four Salt daemons in shutdown order.
pub fn default_services() -> Vec<ServiceDescriptor> {
    SALT_ROLES.iter().map(|role| ServiceDescriptor::salt(role)).collect()
}

/// How a service is waited on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopPolicy {
    /// Pause after each stop request before querying again.
    pub poll_interval: Duration,
    /// Give up once a service stays loaded this long. `None` waits forever.
    pub timeout: Option<Duration>,
    /// Report what would be stopped without sending any request.
    pub dry_run: bool,
}

impl Default for StopPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            timeout: Some(Duration::from_secs(120)),
            dry_run: false,
        }
    }
}

/// What happened while stopping one service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopReport {
    /// The service was loaded when first queried.
    pub was_running: bool,
    /// Disable/bootout rounds issued.
    pub passes: u32,
    /// Calls that returned the benign race code.
    pub benign_races: u32,
}

/// Stop `service` and wait until the manager no longer reports it loaded.
///
/// Returns once a query following a stop request reports the service absent.
/// A service that is not loaded to begin with is left alone and produces no
/// run-log line.
pub fn ensure_stopped<M>(
    manager: &mut M,
    service: &ServiceDescriptor,
    policy: &StopPolicy,
    log: &mut RunLog,
) -> Result<StopReport>
where
    M: ServiceManager + ?Sized,
{
    let started = Instant::now();
    let mut report = StopReport::default();
    let mut last_command = String::new();

    while manager.is_loaded(service).map_err(|e| log.abort(e))? {
        report.was_running = true;

        if policy.dry_run {
            log.line(format!("[DRY RUN] Would stop {}", service.name));
            return Ok(report);
        }

        if let Some(limit) = policy.timeout {
            let waited = started.elapsed();
            if report.passes > 0 && waited >= limit {
                return Err(log.abort(PreinstallError::stop_timeout(
                    service.name.clone(),
                    waited,
                    last_command,
                )));
            }
        }

        log.line(format!("Stopping {}...", service.name));

        let disabled = manager.disable(service).map_err(|e| log.abort(e))?;
        trap(log, &disabled, &mut report)?;

        let booted = manager.bootout(service).map_err(|e| log.abort(e))?;
        trap(log, &booted, &mut report)?;
        last_command = booted.command;

        std::thread::sleep(policy.poll_interval);
        report.passes += 1;
        log.line("Stopped Successfully");
    }

    if report.was_running {
        tracing::info!("{} stopped after {} pass(es)", service.name, report.passes);
    } else {
        tracing::debug!("{} not loaded", service.name);
    }
    Ok(report)
}

/// Stop every service in order. The first fatal error ends the sequence.
pub fn stop_all<M>(
    manager: &mut M,
    services: &[ServiceDescriptor],
    policy: &StopPolicy,
    log: &mut RunLog,
) -> Result<Vec<(String, StopReport)>>
where
    M: ServiceManager + ?Sized,
{
    let mut reports = Vec::with_capacity(services.len());
    for service in services {
        let report = ensure_stopped(manager, service, policy, log)?;
        reports.push((service.name.clone(), report));
    }
    Ok(reports)
}

/// Funnel a control call result through the run-log trap.
#[track_caller]
fn trap(log: &mut RunLog, output: &ControlOutput, report: &mut StopReport) -> Result<()> {
    let location = Location::caller();
    if output.outcome() == ControlOutcome::BenignRace {
        report.benign_races += 1;
        tracing::debug!("{}: {}", output.command, output.outcome());
    } else if !output.stderr.is_empty() {
        tracing::debug!("{}: {}", output.command, output.stderr);
    }
    log.on_error(output.code(), location, &output.command)
}
