use tracing::{debug, error, info, warn};

use super::{KernelError, ProcessRecord, ProcessState, Semaphore, SlotHandle, SystemContext};

/// Exit code a task uses to ask for minimization instead of closing.
pub const MINIMIZE_EXIT_CODE: i32 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Exited with [`MINIMIZE_EXIT_CODE`]; resources stay reserved.
    Minimized,
    /// Any other exit. `code` is `None` when the child died from a signal or
    /// could not be waited on.
    Closed { code: Option<i32> },
}

impl ExitOutcome {
    pub fn from_code(code: Option<i32>) -> ExitOutcome {
        match code {
            Some(MINIMIZE_EXIT_CODE) => ExitOutcome::Minimized,
            code => ExitOutcome::Closed { code },
        }
    }
}

/// What to do with the record when the child cannot be created at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OnSpawnFailure {
    /// Fresh admission: free the slot and release the reservation.
    Discard,
    /// Resume: fall back to minimized, keeping the reservation.
    KeepMinimized,
}

pub struct ProcessLauncher {
    context: SystemContext,
    // One permit: a single foreground child at a time.
    foreground: Semaphore,
}

impl ProcessLauncher {
    pub fn new(context: SystemContext) -> ProcessLauncher {
        ProcessLauncher {
            context,
            foreground: Semaphore::new(1),
        }
    }

    pub fn foreground_busy(&self) -> bool {
        self.foreground.available_permits() == 0
    }

    /// Spawns the record's program and blocks until it exits, then applies
    /// the exit-code protocol to the table and ledger.
    pub fn run_foreground(
        &self,
        handle: SlotHandle,
        record: &ProcessRecord,
        on_failure: OnSpawnFailure,
    ) -> Result<ExitOutcome, KernelError> {
        let _permit = self.foreground.acquire()?;
        let name = record.get_name();

        let mut child = match self.context.host.spawn(record.get_path()) {
            Ok(child) => child,
            Err(err) => {
                warn!(name, %err, "spawn failed");
                self.undo_spawn(handle, on_failure)?;
                return Err(KernelError::SpawnFailure {
                    name: name.to_string(),
                    reason: err.to_string(),
                });
            }
        };

        let pid = child.id();
        if let Err(err) = self.context.table.assign_pid(handle, pid) {
            warn!(name, pid, %err, "task left the table before its pid was recorded");
        }
        info!(name, pid, "started");

        let code = match child.wait() {
            Ok(code) => code,
            Err(err) => {
                warn!(name, pid, %err, "wait failed, treating task as closed");
                None
            }
        };

        let outcome = ExitOutcome::from_code(code);
        self.settle(handle, name, outcome)?;
        Ok(outcome)
    }

    fn undo_spawn(&self, handle: SlotHandle, on_failure: OnSpawnFailure) -> Result<(), KernelError> {
        let table = &self.context.table;

        match on_failure {
            OnSpawnFailure::Discard => match table.transition(handle, ProcessState::Inactive) {
                Ok(previous) => self.context.ledger.release(&previous.get_requirements()),
                Err(KernelError::StaleHandle { .. }) => Ok(()),
                Err(err) => Err(err),
            },
            OnSpawnFailure::KeepMinimized => match table.transition(handle, ProcessState::Minimized) {
                Ok(_) | Err(KernelError::StaleHandle { .. }) => Ok(()),
                Err(err) => Err(err),
            },
        }
    }

    fn settle(&self, handle: SlotHandle, name: &str, outcome: ExitOutcome) -> Result<(), KernelError> {
        let table = &self.context.table;

        match outcome {
            ExitOutcome::Minimized => match table.transition(handle, ProcessState::Minimized) {
                Ok(_) => {
                    info!(name, "minimized, can be resumed later");
                    Ok(())
                }
                // Minimized by someone else while the child ran.
                Err(KernelError::InvalidTransition {
                    from: ProcessState::Minimized,
                    ..
                }) => Ok(()),
                Err(KernelError::StaleHandle { .. }) => {
                    debug!(name, "terminated while running");
                    Ok(())
                }
                Err(err) => Err(err),
            },
            ExitOutcome::Closed { code } => match table.transition(handle, ProcessState::Inactive) {
                Ok(previous) => {
                    self.context.ledger.release(&previous.get_requirements())?;
                    info!(name, ?code, "closed");
                    Ok(())
                }
                // Terminate already released the reservation.
                Err(KernelError::StaleHandle { .. }) => {
                    debug!(name, "terminated while running");
                    Ok(())
                }
                Err(err) => {
                    error!(name, %err, "could not close task");
                    Err(err)
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_outcome_from_code() {
        assert_eq!(ExitOutcome::from_code(Some(10)), ExitOutcome::Minimized);
        assert_eq!(ExitOutcome::from_code(Some(0)), ExitOutcome::Closed { code: Some(0) });
        assert_eq!(ExitOutcome::from_code(Some(1)), ExitOutcome::Closed { code: Some(1) });
        assert_eq!(ExitOutcome::from_code(None), ExitOutcome::Closed { code: None });
    }
}
