use crate::config::{DEFAULT_LOG_PATH, PreinstallConfig};
use clap::Parser;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// Program name used when `argv[0]` is missing or unusable.
const DEFAULT_ENTRY_POINT: &str = "salt-preinstall";

/// Stop Salt launch daemons and remove a previous installation before new files land
#[derive(Parser, Debug)]
#[command(name = "salt-preinstall")]
#[command(version)]
pub struct Cli {
    /// JSON file overriding the built-in defaults
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Run log file (default: /tmp/preinstall.txt)
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Seconds to wait for each service to unload (0 waits forever)
    #[arg(long)]
    pub stop_timeout: Option<u64>,

    /// Milliseconds between a stop request and the next query
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,

    /// Dry-run mode: query services and paths but stop and remove nothing.
    #[arg(long)]
    pub dry_run: bool,

    /// Verbose diagnostics on stderr
    #[arg(short, long)]
    pub verbose: bool,

    /// Arguments passed by the installer (package path, target location, ...); ignored
    #[arg(hide = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub installer_args: Vec<String>,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Run log for failures that happen before a configuration exists.
    pub fn fallback_log_path(&self) -> PathBuf {
        self.log_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_PATH))
    }

    /// Apply command-line overrides on top of `config`.
    pub fn apply(&self, config: &mut PreinstallConfig) {
        if let Some(ref path) = self.log_file {
            config.log_path = path.clone();
        }
        if let Some(secs) = self.stop_timeout {
            config.stop_timeout_secs = secs;
        }
        if let Some(ms) = self.poll_interval_ms {
            config.poll_interval_ms = ms;
        }
        if self.dry_run {
            config.dry_run = true;
        }
    }
}

/// Name the run log reports for this program: the file name of `argv[0]`.
///
/// Installers run the hook from a temporary package directory, so the full
/// path says nothing useful.
pub fn entry_point_name(arg0: Option<&OsStr>) -> String {
    arg0.and_then(|arg| Path::new(arg).file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| DEFAULT_ENTRY_POINT.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_arguments_keeps_defaults() {
        let cli = Cli::try_parse_from(["salt-preinstall"]).unwrap();
        let mut config = PreinstallConfig::default();
        cli.apply(&mut config);
        assert_eq!(config, PreinstallConfig::default());
    }

    #[test]
    fn test_overrides_apply() {
        let cli = Cli::try_parse_from([
            "salt-preinstall",
            "--log-file",
            "/var/tmp/pre.txt",
            "--stop-timeout",
            "0",
            "--dry-run",
        ])
        .unwrap();
        let mut config = PreinstallConfig::default();
        cli.apply(&mut config);

        assert_eq!(config.log_path, PathBuf::from("/var/tmp/pre.txt"));
        assert_eq!(config.stop_timeout(), None);
        assert!(config.dry_run);
    }

    #[test]
    fn test_installer_arguments_are_accepted() {
        let cli = Cli::try_parse_from([
            "preinstall",
            "/tmp/salt.pkg",
            "/Applications",
            "/",
            "/",
        ])
        .unwrap();
        assert_eq!(cli.installer_args.len(), 4);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_entry_point_is_file_name() {
        let name = entry_point_name(Some(OsStr::new(
            "/private/tmp/PKInstallSandbox.abc/Scripts/com.saltstack.salt/preinstall",
        )));
        assert_eq!(name, "preinstall");
        assert_eq!(entry_point_name(Some(OsStr::new("preinstall"))), "preinstall");
    }

    #[test]
    fn test_entry_point_fallback() {
        assert_eq!(entry_point_name(None), "salt-preinstall");
        assert_eq!(entry_point_name(Some(OsStr::new("/"))), "salt-preinstall");
    }

    #[test]
    fn test_fallback_log_path() {
        let cli = Cli::try_parse_from(["salt-preinstall"]).unwrap();
        assert_eq!(cli.fallback_log_path(), PathBuf::from("/tmp/preinstall.txt"));

        let cli = Cli::try_parse_from(["salt-preinstall", "--log-file", "/var/tmp/p.txt"]).unwrap();
        assert_eq!(cli.fallback_log_path(), PathBuf::from("/var/tmp/p.txt"));
    }
}
