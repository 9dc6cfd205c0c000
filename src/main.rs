//! salt-preinstall - installer pre-install hook entry point
//!
//! Exit status: 0 on success, 1 when the run aborted, 2 when the
//! configuration could not be loaded. Every non-zero status leaves its fatal
//! line in the run log.

use anyhow::Context;
use salt_preinstall::cli::{Cli, entry_point_name};
use salt_preinstall::error::CONFIG_EXIT_CODE;
use salt_preinstall::process_guard::{self, ControlCalls, ProcessGuard};
use salt_preinstall::{Launchctl, PreinstallConfig, PreinstallError, RunLog, run_preinstall};
use std::process::ExitCode;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize stderr diagnostics. `RUST_LOG` overrides the level.
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("salt_preinstall={}", default_level)));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

fn load_config(cli: &Cli) -> anyhow::Result<PreinstallConfig> {
    let mut config = match cli.config {
        Some(ref path) => PreinstallConfig::load_from_file(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path))?,
        None => PreinstallConfig::default(),
    };
    cli.apply(&mut config);
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn main() -> ExitCode {
    let cli = Cli::parse_args();
    init_tracing(cli.verbose);

    if let Err(e) = process_guard::init_signal_handlers() {
        warn!("Failed to initialize signal handlers: {}", e);
    }

    let entry_point = entry_point_name(std::env::args_os().next().as_deref());

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("✗ {:#}", e);
            let mut log = RunLog::open(cli.fallback_log_path(), entry_point);
            log.abort(PreinstallError::config(format!("{:#}", e)));
            return ExitCode::from(CONFIG_EXIT_CODE as u8);
        }
    };
    debug!("Configuration: {:?}", config);

    // Declared before the log so the log is flushed first on the way out
    let _guard = ProcessGuard::new(ControlCalls::global());
    let mut log = RunLog::open(&config.log_path, entry_point);
    let mut manager = Launchctl::new(&config.launchctl, config.domain.as_str());

    info!("Running preinstall, log: {}", config.log_path.display());
    match run_preinstall(&config, &mut manager, &mut log) {
        Ok(report) => {
            debug!("{:?}", report);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Preinstall failed: {}", e);
            eprintln!("  See {} for details", config.log_path.display());
            ExitCode::FAILURE
        }
    }
}
