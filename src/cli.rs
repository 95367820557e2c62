use std::path::PathBuf;

use clap::Parser;

use nexos_simulator::io::{Config, DEFAULT_CONFIG_PATH};
use nexos_simulator::kernel::SchedulingPolicy;

/// Process manager simulator with a resource ledger and a multilevel
/// worker-pool scheduler.
#[derive(Parser, Debug)]
#[command(name = "nexos", version, about)]
pub struct Cli {
    /// TOML file with the hardware, kernel and task catalog sections.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Installed RAM in GB.
    #[arg(long)]
    pub ram_gb: Option<u32>,

    /// Disk capacity in GB.
    #[arg(long)]
    pub disk_gb: Option<u32>,

    /// Number of CPU cores.
    #[arg(long)]
    pub cores: Option<u32>,

    /// Initial scheduling policy.
    #[arg(long, value_enum)]
    pub scheduler: Option<SchedulingPolicy>,

    /// Boot in user mode instead of kernel mode.
    #[arg(long)]
    pub user_mode: bool,

    /// Log filter, e.g. `info` or `nexos_simulator=debug`. Falls back to RUST_LOG.
    #[arg(long)]
    pub log_level: Option<String>,
}

impl Cli {
    /// Applies command-line overrides on top of the loaded file.
    pub fn apply(&self, config: &mut Config) {
        if let Some(ram_gb) = self.ram_gb {
            config.hardware.ram_gb = ram_gb;
        }
        if let Some(disk_gb) = self.disk_gb {
            config.hardware.disk_gb = disk_gb;
        }
        if let Some(cores) = self.cores {
            config.hardware.cpu_cores = cores;
        }
        if let Some(scheduler) = self.scheduler {
            config.kernel.scheduler = scheduler;
        }
        if self.user_mode {
            config.kernel.privileged = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
        [hardware]
        ram_gb = 4
        disk_gb = 64
        cpu_cores = 4
    "#;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["nexos"]);
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert!(!cli.user_mode);
        assert!(cli.scheduler.is_none());
    }

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::parse_from([
            "nexos",
            "--ram-gb",
            "1",
            "--cores",
            "0",
            "--scheduler",
            "rr",
            "--user-mode",
        ]);
        let mut config = Config::parse(CONFIG).unwrap();
        cli.apply(&mut config);

        assert_eq!(config.hardware.ram_gb, 1);
        assert_eq!(config.hardware.disk_gb, 64);
        assert_eq!(config.hardware.cpu_cores, 0);
        assert_eq!(config.kernel.scheduler, SchedulingPolicy::RoundRobin);
        assert!(!config.kernel.privileged);
    }
}
