use std::sync::{Mutex, MutexGuard};

use tracing::error;

use super::{KernelError, Requirements};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HardwareResources {
    pub total_memory_mb: u32,
    pub total_disk_gb: u32,
    pub total_cores: u32,

    pub available_memory_mb: u32,
    pub available_disk_gb: u32,
    pub available_cores: u32,
}

impl HardwareResources {
    /// Machine sized in GB of RAM; the ledger counts memory in MB.
    pub fn new(ram_gb: u32, disk_gb: u32, cpu_cores: u32) -> HardwareResources {
        HardwareResources::with_memory_mb(ram_gb.saturating_mul(1024), disk_gb, cpu_cores)
    }

    pub fn with_memory_mb(memory_mb: u32, disk_gb: u32, cpu_cores: u32) -> HardwareResources {
        HardwareResources {
            total_memory_mb: memory_mb,
            total_disk_gb: disk_gb,
            total_cores: cpu_cores,
            available_memory_mb: memory_mb,
            available_disk_gb: disk_gb,
            available_cores: cpu_cores,
        }
    }

    pub fn can_fit(&self, requirements: &Requirements) -> bool {
        self.available_memory_mb >= requirements.memory_mb
            && self.available_disk_gb >= requirements.disk_gb
            && self.available_cores > 0
    }

    pub fn reserved_memory_mb(&self) -> u32 {
        self.total_memory_mb - self.available_memory_mb
    }

    pub fn reserved_disk_gb(&self) -> u32 {
        self.total_disk_gb - self.available_disk_gb
    }

    pub fn reserved_cores(&self) -> u32 {
        self.total_cores - self.available_cores
    }
}

/// The live available/total counters. Reserve and release are the only
/// mutations and must be called in pairs with the same requirements.
pub struct ResourceLedger {
    hardware: Mutex<HardwareResources>,
}

impl ResourceLedger {
    pub fn new(hardware: HardwareResources) -> ResourceLedger {
        ResourceLedger {
            hardware: Mutex::new(hardware),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HardwareResources>, KernelError> {
        self.hardware
            .lock()
            .map_err(|_| KernelError::LockAcquisition { lock: "resource" })
    }

    /// All-or-nothing: either memory, disk and one core are taken, or
    /// nothing changes and `false` comes back.
    pub fn reserve(&self, requirements: &Requirements) -> Result<bool, KernelError> {
        let mut hardware = self.lock()?;

        if !hardware.can_fit(requirements) {
            return Ok(false);
        }

        hardware.available_memory_mb -= requirements.memory_mb;
        hardware.available_disk_gb -= requirements.disk_gb;
        hardware.available_cores -= 1;

        Ok(true)
    }

    pub fn release(&self, requirements: &Requirements) -> Result<(), KernelError> {
        let mut hardware = self.lock()?;

        let memory = hardware.available_memory_mb.saturating_add(requirements.memory_mb);
        let disk = hardware.available_disk_gb.saturating_add(requirements.disk_gb);
        let cores = hardware.available_cores.saturating_add(1);

        if memory > hardware.total_memory_mb
            || disk > hardware.total_disk_gb
            || cores > hardware.total_cores
        {
            error!(
                memory_mb = requirements.memory_mb,
                disk_gb = requirements.disk_gb,
                "release without a matching reservation, clamping to totals"
            );
        }

        hardware.available_memory_mb = memory.min(hardware.total_memory_mb);
        hardware.available_disk_gb = disk.min(hardware.total_disk_gb);
        hardware.available_cores = cores.min(hardware.total_cores);

        Ok(())
    }

    pub fn snapshot(&self) -> Result<HardwareResources, KernelError> {
        Ok(*self.lock()?)
    }
}
