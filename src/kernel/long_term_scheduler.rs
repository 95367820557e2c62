use tracing::{debug, warn};

use super::{KernelError, Pid, ProcessState, SlotHandle, SystemContext};

use crate::io::TaskDescriptor;

/// Admission: reserve resources, check the program, take a table slot.
/// Each step undoes the earlier ones when it fails.
pub struct LongTermScheduler {
    context: SystemContext,
    feed_on_admission: bool,
}

impl LongTermScheduler {
    pub fn new(context: SystemContext, feed_on_admission: bool) -> LongTermScheduler {
        LongTermScheduler {
            context,
            feed_on_admission,
        }
    }

    pub fn admit(
        &self,
        descriptor: &TaskDescriptor,
        pid: Option<Pid>,
        state: ProcessState,
    ) -> Result<SlotHandle, KernelError> {
        let requirements = descriptor.requirements();
        let ledger = &self.context.ledger;

        if !ledger.reserve(&requirements)? {
            return Err(KernelError::ResourceExhausted {
                name: descriptor.name.clone(),
            });
        }

        if !self.context.host.is_executable(&descriptor.path) {
            ledger.release(&requirements)?;
            return Err(KernelError::NotExecutable {
                name: descriptor.name.clone(),
                path: descriptor.path.clone(),
            });
        }

        let handle = match self.context.table.insert(descriptor, pid, state) {
            Ok(handle) => handle,
            Err(err) => {
                ledger.release(&requirements)?;
                return Err(err);
            }
        };

        debug!(name = %descriptor.name, slot = handle.index(), %state, "admitted");

        if self.feed_on_admission && state == ProcessState::Active {
            self.feed(handle, descriptor.priority);
        }

        Ok(handle)
    }

    /// Best-effort enqueue; a full level is logged, never fatal.
    pub fn feed(&self, handle: SlotHandle, priority: u8) {
        if !self.feed_on_admission {
            return;
        }
        if let Err(err) = self.schedule(handle, priority) {
            warn!(slot = handle.index(), %err, "task not queued for the worker pool");
        }
    }

    pub fn schedule(&self, handle: SlotHandle, priority: u8) -> Result<usize, KernelError> {
        let level = self.context.ready.enqueue(handle, priority)?;
        debug!(slot = handle.index(), level, "queued for the worker pool");
        Ok(level)
    }
}
