//! Pre-install configuration
//!
//! Every value has a compile-time default matching the Salt macOS package, so
//! the installer can run the hook with no arguments. A JSON file may override
//! any subset of fields; missing fields keep their defaults.

use crate::cleanup::{CleanupTarget, default_targets};
use crate::error::{PreinstallError, Result};
use crate::services::{ServiceDescriptor, StopPolicy, default_services};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default run log location.
pub const DEFAULT_LOG_PATH: &str = "/tmp/preinstall.txt";

/// Configuration for one pre-install run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreinstallConfig {
    /// Services to stop, in order.
    pub services: Vec<ServiceDescriptor>,
    /// Artifacts to remove, in order.
    pub targets: Vec<CleanupTarget>,
    /// Run log file.
    pub log_path: PathBuf,
    /// Pause between a stop request and the next query.
    pub poll_interval_ms: u64,
    /// Per-service stop timeout in seconds. `0` waits forever.
    pub stop_timeout_secs: u64,
    /// launchctl binary.
    pub launchctl: PathBuf,
    /// launchd domain the services live in.
    pub domain: String,
    /// Report actions without performing them.
    pub dry_run: bool,
}

impl Default for PreinstallConfig {
    fn default() -> Self {
        Self {
            services: default_services(),
            targets: default_targets(),
            log_path: PathBuf::from(DEFAULT_LOG_PATH),
            poll_interval_ms: 1000,
            stop_timeout_secs: 120,
            launchctl: PathBuf::from("/bin/launchctl"),
            domain: "system".to_string(),
            dry_run: false,
        }
    }
}

impl PreinstallConfig {
    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let mut labels = HashSet::new();
        for service in &self.services {
            if service.name.trim().is_empty() {
                return Err(PreinstallError::config("service name must not be empty"));
            }
            if service.label.trim().is_empty() {
                return Err(PreinstallError::config(format!(
                    "service {} has an empty launchd label",
                    service.name
                )));
            }
            if service.plist.as_os_str().is_empty() {
                return Err(PreinstallError::config(format!(
                    "service {} has no definition file",
                    service.name
                )));
            }
            if !labels.insert(service.label.as_str()) {
                return Err(PreinstallError::config(format!(
                    "duplicate service label {}",
                    service.label
                )));
            }
        }

        for target in &self.targets {
            if !target.path().is_absolute() {
                return Err(PreinstallError::config(format!(
                    "cleanup path {} must be absolute",
                    target.path().display()
                )));
            }
        }

        if self.poll_interval_ms == 0 {
            return Err(PreinstallError::config("poll interval must be non-zero"));
        }
        if self.domain.trim().is_empty() {
            return Err(PreinstallError::config("launchd domain must not be empty"));
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Stop timeout, `None` when unbounded.
    pub fn stop_timeout(&self) -> Option<Duration> {
        (self.stop_timeout_secs > 0).then(|| Duration::from_secs(self.stop_timeout_secs))
    }

    /// Wait policy for the shutdown controller.
    pub fn stop_policy(&self) -> StopPolicy {
        StopPolicy {
            poll_interval: self.poll_interval(),
            timeout: self.stop_timeout(),
            dry_run: self.dry_run,
        }
    }
}
