use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::io::TaskDescriptor;

pub type Pid = u32;

/// Ids at or above this are handed to records with no host process behind
/// them. Host pids stay below it.
pub const DETACHED_PID_BASE: Pid = 1 << 31;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProcessState {
    Inactive,
    Active,
    Minimized,
}

impl ProcessState {
    pub fn is_live(self) -> bool {
        self != ProcessState::Inactive
    }

    pub fn can_become(self, next: ProcessState) -> bool {
        use ProcessState::*;

        matches!(
            (self, next),
            (Active, Minimized) | (Minimized, Active) | (Active, Inactive) | (Minimized, Inactive)
        )
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ProcessState::Inactive => "inactive",
            ProcessState::Active => "active",
            ProcessState::Minimized => "minimized",
        };
        f.write_str(label)
    }
}

/// Memory and disk held by one admitted task. Every task also holds one core.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Requirements {
    pub memory_mb: u32,
    pub disk_gb: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessRecord {
    pub pid: Option<Pid>,
    pub state: ProcessState,

    name: String,
    path: PathBuf,
    requirements: Requirements,
    priority: u8,
    start_time: SystemTime,
}

impl ProcessRecord {
    /// Copies everything from the descriptor so later catalog edits never
    /// reach a running task.
    pub fn new(descriptor: &TaskDescriptor, pid: Option<Pid>, state: ProcessState) -> ProcessRecord {
        ProcessRecord {
            pid,
            state,
            name: descriptor.name.clone(),
            path: descriptor.path.clone(),
            requirements: descriptor.requirements(),
            priority: descriptor.priority,
            start_time: SystemTime::now(),
        }
    }

    pub fn vacant() -> ProcessRecord {
        ProcessRecord {
            pid: None,
            state: ProcessState::Inactive,
            name: String::new(),
            path: PathBuf::new(),
            requirements: Requirements::default(),
            priority: 0,
            start_time: SystemTime::UNIX_EPOCH,
        }
    }

    pub fn get_name(&self) -> &str {
        &self.name
    }

    pub fn get_path(&self) -> &Path {
        &self.path
    }

    pub fn get_requirements(&self) -> Requirements {
        self.requirements
    }

    pub fn get_priority(&self) -> u8 {
        self.priority
    }

    pub fn is_minimized(&self) -> bool {
        self.state == ProcessState::Minimized
    }

    pub fn get_running_time(&self) -> Duration {
        SystemTime::now()
            .duration_since(self.start_time)
            .unwrap_or_default()
    }
}
