//! TOML configuration: hardware sizing, kernel tunables and the task catalog.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use serde::Deserialize;

use super::{TaskCatalog, TaskDescriptor};

use crate::kernel::SchedulingPolicy;

pub const DEFAULT_CONFIG_PATH: &str = "data/nexos.toml";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {reason}")]
    Invalid { reason: String },
}

impl ConfigError {
    /// Configuration problems are infrastructure errors.
    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(2)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub hardware: HardwareConfig,
    #[serde(default)]
    pub kernel: KernelConfig,
    #[serde(default)]
    pub tasks: Vec<TaskDescriptor>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct HardwareConfig {
    pub ram_gb: u32,
    pub disk_gb: u32,
    pub cpu_cores: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub max_tasks: usize,
    pub worker_threads: usize,
    pub quantum_unit_ms: u64,
    pub scheduler: SchedulingPolicy,
    pub privileged: bool,
    pub feed_scheduler: bool,
    pub autostart: Vec<String>,
}

impl Default for KernelConfig {
    fn default() -> KernelConfig {
        KernelConfig {
            max_tasks: 20,
            worker_threads: 5,
            quantum_unit_ms: 2000,
            scheduler: SchedulingPolicy::Fcfs,
            privileged: true,
            feed_scheduler: true,
            autostart: Vec::new(),
        }
    }
}

impl KernelConfig {
    pub fn quantum_unit(&self) -> Duration {
        Duration::from_millis(self.quantum_unit_ms)
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Config::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Config, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn catalog(&self) -> Result<TaskCatalog, ConfigError> {
        TaskCatalog::new(self.tasks.clone())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hardware.ram_gb.checked_mul(1024).is_none() {
            return Err(invalid(format!("ram_gb {} is too large", self.hardware.ram_gb)));
        }
        if self.hardware.cpu_cores == 0 {
            return Err(invalid("cpu_cores must be at least 1".to_string()));
        }
        if self.kernel.max_tasks == 0 {
            return Err(invalid("max_tasks must be at least 1".to_string()));
        }
        if self.kernel.worker_threads == 0 {
            return Err(invalid("worker_threads must be at least 1".to_string()));
        }

        let catalog = self.catalog()?;
        for name in &self.kernel.autostart {
            if catalog.position(name).is_none() {
                return Err(invalid(format!("autostart task {} is not in the catalog", name)));
            }
        }

        Ok(())
    }
}

fn invalid(reason: String) -> ConfigError {
    ConfigError::Invalid { reason }
}
