use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard};

use super::{KernelError, Pid, ProcessRecord, ProcessState};

use crate::io::TaskDescriptor;

/// Reference to one tenancy of a table slot. The generation changes every
/// time the slot is reused, so a handle kept past termination goes stale
/// instead of pointing at the next occupant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SlotHandle {
    index: usize,
    generation: u64,
}

impl SlotHandle {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

struct Slot {
    generation: u64,
    record: ProcessRecord,
}

struct Slots {
    slots: Vec<Slot>,
    // Ordered so the lowest free index is always handed out first.
    free: BTreeSet<usize>,
}

impl Slots {
    fn live(&self, handle: SlotHandle) -> Result<&Slot, KernelError> {
        match self.slots.get(handle.index) {
            Some(slot) if slot.generation == handle.generation && slot.record.state.is_live() => Ok(slot),
            _ => Err(KernelError::StaleHandle { index: handle.index }),
        }
    }

    fn live_mut(&mut self, handle: SlotHandle) -> Result<&mut Slot, KernelError> {
        match self.slots.get_mut(handle.index) {
            Some(slot) if slot.generation == handle.generation && slot.record.state.is_live() => Ok(slot),
            _ => Err(KernelError::StaleHandle { index: handle.index }),
        }
    }

    fn find(&self, predicate: impl Fn(&ProcessRecord) -> bool) -> Option<(SlotHandle, ProcessRecord)> {
        self.slots
            .iter()
            .enumerate()
            .find(|(_, slot)| slot.record.state.is_live() && predicate(&slot.record))
            .map(|(index, slot)| {
                let handle = SlotHandle {
                    index,
                    generation: slot.generation,
                };
                (handle, slot.record.clone())
            })
    }
}

/// Fixed-capacity registry of admitted tasks.
pub struct ProcessTable {
    inner: Mutex<Slots>,
    capacity: usize,
}

impl ProcessTable {
    pub fn new(capacity: usize) -> ProcessTable {
        let slots = (0..capacity)
            .map(|_| Slot {
                generation: 0,
                record: ProcessRecord::vacant(),
            })
            .collect();

        ProcessTable {
            inner: Mutex::new(Slots {
                slots,
                free: (0..capacity).collect(),
            }),
            capacity,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Slots>, KernelError> {
        self.inner
            .lock()
            .map_err(|_| KernelError::LockAcquisition { lock: "process table" })
    }

    /// Leaves the table lock poisoned, as a panic while holding it would.
    #[cfg(test)]
    pub(crate) fn poison(&self) {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = self.inner.lock();
            panic!("process table poisoned");
        }));
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn find_free_slot(&self) -> Result<Option<usize>, KernelError> {
        Ok(self.lock()?.free.first().copied())
    }

    pub fn is_running(&self, name: &str) -> Result<bool, KernelError> {
        Ok(self.find_by_name(name)?.is_some())
    }

    pub fn find_by_name(&self, name: &str) -> Result<Option<(SlotHandle, ProcessRecord)>, KernelError> {
        Ok(self.lock()?.find(|record| record.get_name() == name))
    }

    /// Lowest live slot carrying `pid`.
    pub fn find_by_pid(&self, pid: Pid) -> Result<Option<(SlotHandle, ProcessRecord)>, KernelError> {
        Ok(self.lock()?.find(|record| record.pid == Some(pid)))
    }

    /// Snapshot of the record behind `handle`, or `None` once it is stale.
    pub fn get(&self, handle: SlotHandle) -> Result<Option<ProcessRecord>, KernelError> {
        Ok(self.lock()?.live(handle).ok().map(|slot| slot.record.clone()))
    }

    /// Admits a task into the lowest free slot. The duplicate-name check is
    /// repeated here, under the table lock, so two racing admissions of the
    /// same application cannot both succeed.
    pub fn insert(
        &self,
        descriptor: &TaskDescriptor,
        pid: Option<Pid>,
        state: ProcessState,
    ) -> Result<SlotHandle, KernelError> {
        if !state.is_live() {
            return Err(KernelError::InvalidTransition {
                from: ProcessState::Inactive,
                to: state,
            });
        }

        let mut slots = self.lock()?;

        if slots.find(|record| record.get_name() == descriptor.name).is_some() {
            return Err(KernelError::AlreadyRunning {
                name: descriptor.name.clone(),
            });
        }

        let index = slots.free.pop_first().ok_or(KernelError::TableFull)?;
        let slot = &mut slots.slots[index];
        slot.generation += 1;
        slot.record = ProcessRecord::new(descriptor, pid, state);

        Ok(SlotHandle {
            index,
            generation: slot.generation,
        })
    }

    pub fn assign_pid(&self, handle: SlotHandle, pid: Pid) -> Result<(), KernelError> {
        let mut slots = self.lock()?;
        slots.live_mut(handle)?.record.pid = Some(pid);
        Ok(())
    }

    /// Moves a live record to `next` and returns the record as it was before
    /// the move. Moving to `Inactive` frees the slot; the caller owns the
    /// matching ledger release using the returned requirements.
    pub fn transition(&self, handle: SlotHandle, next: ProcessState) -> Result<ProcessRecord, KernelError> {
        let mut slots = self.lock()?;
        let slot = slots.live_mut(handle)?;
        let from = slot.record.state;

        if !from.can_become(next) {
            return Err(KernelError::InvalidTransition { from, to: next });
        }

        let previous = slot.record.clone();
        if next.is_live() {
            slot.record.state = next;
        } else {
            slot.record = ProcessRecord::vacant();
            slots.free.insert(handle.index);
        }

        Ok(previous)
    }

    pub fn active(&self) -> Result<Vec<(SlotHandle, ProcessRecord)>, KernelError> {
        let slots = self.lock()?;

        Ok(slots
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.record.state.is_live())
            .map(|(index, slot)| {
                let handle = SlotHandle {
                    index,
                    generation: slot.generation,
                };
                (handle, slot.record.clone())
            })
            .collect())
    }

    pub fn live_count(&self) -> Result<usize, KernelError> {
        let slots = self.lock()?;
        Ok(self.capacity - slots.free.len())
    }
}
