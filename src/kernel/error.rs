use std::path::PathBuf;
use std::process::ExitCode;

use super::{Pid, ProcessState};

/// Every way a kernel operation can be refused.
///
/// A refused operation leaves the ledger and the process table exactly as
/// they were before the call.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    #[error("not enough system resources to start {name}")]
    ResourceExhausted { name: String },

    #[error("{name} is already running")]
    AlreadyRunning { name: String },

    #[error("{name} is not executable: {}", path.display())]
    NotExecutable { name: String, path: PathBuf },

    #[error("no empty slot in process table")]
    TableFull,

    #[error("failed to execute {name}: {reason}")]
    SpawnFailure { name: String, reason: String },

    #[error("failed to acquire the {lock} lock")]
    LockAcquisition { lock: &'static str },

    #[error("operation requires kernel mode")]
    PermissionDenied,

    #[error("no application at catalog index {index}")]
    UnknownTask { index: usize },

    #[error("no active process with pid {pid}")]
    ProcessNotFound { pid: Pid },

    #[error("cannot move a process from {from} to {to}")]
    InvalidTransition { from: ProcessState, to: ProcessState },

    #[error("process slot {index} no longer holds the referenced task")]
    StaleHandle { index: usize },

    #[error("queue at level {level} is full")]
    QueueFull { level: usize },
}

impl KernelError {
    /// `2` for lock failures (infrastructure), `1` for everything the
    /// operator can act on.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::LockAcquisition { .. } => ExitCode::from(2),

            Self::ResourceExhausted { .. }
            | Self::AlreadyRunning { .. }
            | Self::NotExecutable { .. }
            | Self::TableFull
            | Self::SpawnFailure { .. }
            | Self::PermissionDenied
            | Self::UnknownTask { .. }
            | Self::ProcessNotFound { .. }
            | Self::InvalidTransition { .. }
            | Self::StaleHandle { .. }
            | Self::QueueFull { .. } => ExitCode::from(1),
        }
    }
}
