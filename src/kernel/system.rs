use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{info, warn};

use super::{
    ExitOutcome, HardwareResources, KernelError, LongTermScheduler, OnSpawnFailure, Pid, ProcessLauncher,
    ProcessRecord, ProcessState, ProcessTable, ReadyQueue, ResourceLedger, SchedulingPolicy, SlotHandle, WorkerPool,
    WorkerStats, DETACHED_PID_BASE,
};

use crate::io::{Config, ConfigError, KernelConfig, ProcessHost, TaskCatalog, TaskDescriptor};

/// Shared structures every kernel component works against. Each one has
/// its own lock; no operation holds two of them at once.
#[derive(Clone)]
pub struct SystemContext {
    pub ledger: Arc<ResourceLedger>,
    pub table: Arc<ProcessTable>,
    pub ready: Arc<ReadyQueue>,
    pub host: Arc<dyn ProcessHost>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KernelOptions {
    pub max_tasks: usize,
    pub worker_threads: usize,
    pub quantum_unit: Duration,
    pub policy: SchedulingPolicy,
    pub privileged: bool,
    pub feed_scheduler: bool,
}

impl From<&KernelConfig> for KernelOptions {
    fn from(config: &KernelConfig) -> KernelOptions {
        KernelOptions {
            max_tasks: config.max_tasks,
            worker_threads: config.worker_threads,
            quantum_unit: config.quantum_unit(),
            policy: config.scheduler,
            privileged: config.privileged,
            feed_scheduler: config.feed_scheduler,
        }
    }
}

impl Default for KernelOptions {
    fn default() -> KernelOptions {
        KernelOptions::from(&KernelConfig::default())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    Stop,
    Continue,
    Term,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Signal::Stop => "SIGSTOP",
            Signal::Continue => "SIGCONT",
            Signal::Term => "SIGTERM",
        };
        f.write_str(label)
    }
}

impl FromStr for Signal {
    type Err = String;

    fn from_str(input: &str) -> Result<Signal, String> {
        match input.to_ascii_lowercase().as_str() {
            "1" | "stop" | "sigstop" => Ok(Signal::Stop),
            "2" | "cont" | "continue" | "sigcont" => Ok(Signal::Continue),
            "3" | "term" | "sigterm" => Ok(Signal::Term),
            _ => Err(format!("unknown signal: {}", input)),
        }
    }
}

/// Owns the ledger, the table, the scheduler and the worker pool, and
/// exposes the operations the shell drives.
pub struct Kernel {
    context: SystemContext,
    catalog: TaskCatalog,
    admission: LongTermScheduler,
    launcher: ProcessLauncher,
    policy: Mutex<SchedulingPolicy>,
    privileged: AtomicBool,
    detached: AtomicU32,
    workers: Mutex<Option<WorkerPool>>,
}

impl Kernel {
    pub fn new(
        hardware: HardwareResources,
        catalog: TaskCatalog,
        options: KernelOptions,
        host: Arc<dyn ProcessHost>,
    ) -> Kernel {
        let context = SystemContext {
            ledger: Arc::new(ResourceLedger::new(hardware)),
            table: Arc::new(ProcessTable::new(options.max_tasks)),
            ready: Arc::new(ReadyQueue::new(options.max_tasks, options.quantum_unit)),
            host,
        };

        let workers = WorkerPool::start(options.worker_threads, context.ready.clone(), context.table.clone());

        info!(
            memory_mb = hardware.total_memory_mb,
            disk_gb = hardware.total_disk_gb,
            cores = hardware.total_cores,
            max_tasks = options.max_tasks,
            policy = %options.policy,
            "kernel started"
        );

        Kernel {
            admission: LongTermScheduler::new(context.clone(), options.feed_scheduler),
            launcher: ProcessLauncher::new(context.clone()),
            context,
            catalog,
            policy: Mutex::new(options.policy),
            privileged: AtomicBool::new(options.privileged),
            detached: AtomicU32::new(0),
            workers: Mutex::new(Some(workers)),
        }
    }

    pub fn from_config(config: &Config, host: Arc<dyn ProcessHost>) -> Result<Kernel, ConfigError> {
        let hardware = HardwareResources::new(
            config.hardware.ram_gb,
            config.hardware.disk_gb,
            config.hardware.cpu_cores,
        );

        Ok(Kernel::new(
            hardware,
            config.catalog()?,
            KernelOptions::from(&config.kernel),
            host,
        ))
    }

    /// Background-launches the named tasks. Returns the names admitted.
    pub fn boot(&self, autostart: &[String]) -> Vec<String> {
        let mut started = Vec::new();

        for name in autostart {
            let Some(index) = self.catalog.position(name) else {
                warn!(name = %name, "autostart task is not in the catalog");
                continue;
            };

            match self.launch_background(index) {
                Ok(true) => started.push(name.clone()),
                Ok(false) => {}
                Err(err) => warn!(name = %name, %err, "autostart failed"),
            }
        }

        started
    }

    pub fn catalog(&self) -> &TaskCatalog {
        &self.catalog
    }

    fn descriptor(&self, index: usize) -> Result<&TaskDescriptor, KernelError> {
        self.catalog.get(index).ok_or(KernelError::UnknownTask { index })
    }

    fn require_privilege(&self) -> Result<(), KernelError> {
        if self.is_privileged() {
            Ok(())
        } else {
            Err(KernelError::PermissionDenied)
        }
    }

    fn find_live(&self, pid: Pid) -> Result<(SlotHandle, ProcessRecord), KernelError> {
        self.context
            .table
            .find_by_pid(pid)?
            .ok_or(KernelError::ProcessNotFound { pid })
    }

    /// Informational line for the current policy, if it has one.
    pub fn admission_note(&self, index: usize) -> Result<Option<String>, KernelError> {
        let descriptor = self.descriptor(index)?;
        let quantum = self.context.ready.quantum_for(descriptor.priority)?;
        Ok(self.policy()?.admission_note(descriptor, quantum))
    }

    /// Runs a catalog task in the foreground and blocks until it exits. A
    /// minimized instance of the same task is resumed instead.
    pub fn launch(&self, index: usize) -> Result<ExitOutcome, KernelError> {
        self.launch_with(index, |_| {})
    }

    /// Like [`Kernel::launch`], but calls `on_admitted` with the active
    /// record once the task holds its slot and before its program starts.
    /// A refused launch never calls it.
    pub fn launch_with<F>(&self, index: usize, on_admitted: F) -> Result<ExitOutcome, KernelError>
    where
        F: FnOnce(&ProcessRecord),
    {
        let descriptor = self.descriptor(index)?;

        if let Some((handle, record)) = self.context.table.find_by_name(&descriptor.name)? {
            if record.is_minimized() {
                return self.resume_handle(handle, on_admitted);
            }
            return Err(KernelError::AlreadyRunning {
                name: descriptor.name.clone(),
            });
        }

        let handle = self.admission.admit(descriptor, None, ProcessState::Active)?;
        let record = self
            .context
            .table
            .get(handle)?
            .ok_or(KernelError::StaleHandle { index: handle.index() })?;

        on_admitted(&record);
        self.launcher.run_foreground(handle, &record, OnSpawnFailure::Discard)
    }

    fn next_detached_pid(&self) -> Pid {
        let sequence = self.detached.fetch_add(1, Ordering::Relaxed);
        DETACHED_PID_BASE | (sequence & !DETACHED_PID_BASE)
    }

    /// Admits a task straight into `Minimized` without spawning it, under a
    /// detached pid of its own. Returns `false` when the task was already
    /// running.
    pub fn launch_background(&self, index: usize) -> Result<bool, KernelError> {
        let descriptor = self.descriptor(index)?;

        if self.context.table.is_running(&descriptor.name)? {
            return Ok(false);
        }

        let pid = self.next_detached_pid();
        self.admission.admit(descriptor, Some(pid), ProcessState::Minimized)?;
        info!(name = %descriptor.name, pid, "started in background");
        Ok(true)
    }

    pub fn terminate(&self, pid: Pid) -> Result<ProcessRecord, KernelError> {
        self.require_privilege()?;
        let (handle, _) = self.find_live(pid)?;
        self.terminate_handle(handle)
    }

    fn terminate_handle(&self, handle: SlotHandle) -> Result<ProcessRecord, KernelError> {
        let previous = self.context.table.transition(handle, ProcessState::Inactive)?;
        self.context.ledger.release(&previous.get_requirements())?;

        if let Err(err) = self.context.host.stop_by_name(previous.get_name()) {
            warn!(name = previous.get_name(), %err, "could not stop host processes");
        }

        info!(name = previous.get_name(), pid = ?previous.pid, "terminated");
        Ok(previous)
    }

    pub fn minimize(&self, pid: Pid) -> Result<(), KernelError> {
        let (handle, record) = self.find_live(pid)?;
        self.context.table.transition(handle, ProcessState::Minimized)?;
        info!(name = record.get_name(), pid, "minimized");
        Ok(())
    }

    /// Brings a minimized task back and runs it in the foreground again.
    pub fn resume(&self, pid: Pid) -> Result<ExitOutcome, KernelError> {
        let (handle, _) = self.find_live(pid)?;
        self.resume_handle(handle, |_| {})
    }

    fn resume_handle<F>(&self, handle: SlotHandle, on_admitted: F) -> Result<ExitOutcome, KernelError>
    where
        F: FnOnce(&ProcessRecord),
    {
        // transition hands back the record as it was before.
        let mut record = self.context.table.transition(handle, ProcessState::Active)?;
        record.state = ProcessState::Active;
        info!(name = record.get_name(), "resuming");
        on_admitted(&record);

        self.admission.feed(handle, record.get_priority());
        self.launcher.run_foreground(handle, &record, OnSpawnFailure::KeepMinimized)
    }

    /// `Stop` minimizes, `Continue` resumes, `Term` terminates. Only
    /// `Continue` runs the task and so yields an outcome.
    pub fn send_signal(&self, pid: Pid, signal: Signal) -> Result<Option<ExitOutcome>, KernelError> {
        self.require_privilege()?;
        info!(pid, %signal, "signal");

        match signal {
            Signal::Stop => self.minimize(pid).map(|_| None),
            Signal::Continue => self.resume(pid).map(Some),
            Signal::Term => self.terminate(pid).map(|_| None),
        }
    }

    /// Feeds a live task to the worker pool by hand. Returns its level.
    pub fn schedule(&self, pid: Pid) -> Result<usize, KernelError> {
        let (handle, record) = self.find_live(pid)?;
        self.admission.schedule(handle, record.get_priority())
    }

    fn policy_lock(&self) -> Result<MutexGuard<'_, SchedulingPolicy>, KernelError> {
        self.policy
            .lock()
            .map_err(|_| KernelError::LockAcquisition { lock: "scheduler policy" })
    }

    pub fn change_scheduler_policy(&self, policy: SchedulingPolicy) -> Result<(), KernelError> {
        self.require_privilege()?;
        *self.policy_lock()? = policy;
        info!(%policy, "scheduler changed");
        Ok(())
    }

    pub fn policy(&self) -> Result<SchedulingPolicy, KernelError> {
        Ok(*self.policy_lock()?)
    }

    pub fn list_active(&self) -> Result<Vec<ProcessRecord>, KernelError> {
        Ok(self
            .context
            .table
            .active()?
            .into_iter()
            .map(|(_, record)| record)
            .collect())
    }

    /// Most tasks the table holds at once.
    pub fn capacity(&self) -> usize {
        self.context.table.capacity()
    }

    pub fn hardware(&self) -> Result<HardwareResources, KernelError> {
        self.context.ledger.snapshot()
    }

    pub fn is_privileged(&self) -> bool {
        self.privileged.load(Ordering::SeqCst)
    }

    pub fn set_privileged(&self, privileged: bool) {
        self.privileged.store(privileged, Ordering::SeqCst);
    }

    /// Toggles kernel/user mode and returns the new mode.
    pub fn switch_mode(&self) -> bool {
        let privileged = !self.privileged.fetch_xor(true, Ordering::SeqCst);
        info!(privileged, "mode switched");
        privileged
    }

    pub fn foreground_busy(&self) -> bool {
        self.launcher.foreground_busy()
    }

    pub fn worker_stats(&self) -> Option<WorkerStats> {
        let workers = self.workers.lock().ok()?;
        workers.as_ref().map(WorkerPool::stats)
    }

    /// Terminates every live task, privileged or not, then stops the
    /// worker pool. Returns the names that were terminated.
    pub fn shutdown(&self) -> Vec<String> {
        let mut terminated = Vec::new();

        match self.context.table.active() {
            Ok(live) => {
                for (handle, record) in live {
                    match self.terminate_handle(handle) {
                        Ok(_) => terminated.push(record.get_name().to_string()),
                        Err(err) => warn!(name = record.get_name(), %err, "could not terminate during shutdown"),
                    }
                }
            }
            Err(err) => warn!(%err, "could not list tasks during shutdown"),
        }

        let pool = match self.workers.lock() {
            Ok(mut workers) => workers.take(),
            Err(err) => {
                warn!(%err, "worker pool lock poisoned");
                None
            }
        };
        if let Some(mut pool) = pool {
            pool.shutdown();
        }

        info!(terminated = terminated.len(), "kernel shut down");
        terminated
    }
}
