mod error;
mod launcher;
mod long_term_scheduler;
mod process_control_block;
mod process_table;
mod resources;
mod semaphore;
mod short_term_scheduler;
mod system;
mod worker_pool;

pub mod driver;

pub use driver::Driver;
pub use error::KernelError;
pub use launcher::{ExitOutcome, OnSpawnFailure, ProcessLauncher, MINIMIZE_EXIT_CODE};
pub use long_term_scheduler::LongTermScheduler;
pub use process_control_block::{Pid, ProcessRecord, ProcessState, Requirements, DETACHED_PID_BASE};
pub use process_table::{ProcessTable, SlotHandle};
pub use resources::{HardwareResources, ResourceLedger};
pub use semaphore::{Semaphore, SemaphorePermit};
pub use short_term_scheduler::{MultiLevelQueue, SchedulingPolicy, LEVELS};
pub use system::{Kernel, KernelOptions, Signal, SystemContext};
pub use worker_pool::{ReadyQueue, WorkerPool, WorkerStats};
