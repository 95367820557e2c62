pub mod catalog;
pub mod config;
pub mod host;

pub use catalog::{TaskCatalog, TaskDescriptor};
pub use config::{Config, ConfigError, HardwareConfig, KernelConfig, DEFAULT_CONFIG_PATH};
pub use host::{HostChild, ProcessHost, ScriptedExit, ScriptedHost, SystemHost};
