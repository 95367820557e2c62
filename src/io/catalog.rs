use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::ConfigError;

use crate::kernel::Requirements;

pub const MAX_PRIORITY: u8 = 3;

/// One launchable application as listed in the `[[tasks]]` table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub name: String,
    pub path: PathBuf,
    pub memory_mb: u32,
    pub disk_gb: u32,
    #[serde(default)]
    pub priority: u8,
}

impl TaskDescriptor {
    pub fn requirements(&self) -> Requirements {
        Requirements {
            memory_mb: self.memory_mb,
            disk_gb: self.disk_gb,
        }
    }
}

/// Read-only, ordered list of the applications the kernel may admit.
#[derive(Clone, Debug, Default)]
pub struct TaskCatalog {
    tasks: Vec<TaskDescriptor>,
}

impl TaskCatalog {
    pub fn new(tasks: Vec<TaskDescriptor>) -> Result<TaskCatalog, ConfigError> {
        let mut names = HashSet::new();

        for task in &tasks {
            if task.name.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    reason: format!("task with path {} has an empty name", task.path.display()),
                });
            }
            if task.priority > MAX_PRIORITY {
                return Err(ConfigError::Invalid {
                    reason: format!(
                        "task {} has priority {}, expected 0-{}",
                        task.name, task.priority, MAX_PRIORITY
                    ),
                });
            }
            if !names.insert(task.name.as_str()) {
                return Err(ConfigError::Invalid {
                    reason: format!("task {} is listed twice", task.name),
                });
            }
        }

        Ok(TaskCatalog { tasks })
    }

    pub fn get(&self, index: usize) -> Option<&TaskDescriptor> {
        self.tasks.get(index)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.tasks.iter().position(|task| task.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskDescriptor> {
        self.tasks.iter()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
