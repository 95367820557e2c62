mod cli;

use std::io::{self, BufWriter};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use nexos_simulator::io::{Config, SystemHost};
use nexos_simulator::kernel::{Driver, Kernel};

use crate::cli::Cli;

fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    let mut config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "failed to load configuration");
            return err.exit_code();
        }
    };
    cli.apply(&mut config);

    // Overrides may have made the file's values invalid.
    if let Err(err) = config.validate() {
        error!(%err, "invalid configuration");
        return err.exit_code();
    }

    let kernel = match Kernel::from_config(&config, Arc::new(SystemHost::new())) {
        Ok(kernel) => kernel,
        Err(err) => {
            error!(%err, "failed to build kernel");
            return err.exit_code();
        }
    };

    let mut driver = Driver::new(kernel, config.kernel.autostart.clone());
    let stdin = io::stdin();
    let stdout = BufWriter::new(io::stdout());

    match driver.start(stdin.lock(), stdout) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "console I/O failed");
            ExitCode::from(2)
        }
    }
}
