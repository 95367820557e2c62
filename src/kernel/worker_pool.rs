use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::{KernelError, MultiLevelQueue, ProcessState, ProcessTable, SlotHandle};

struct ReadyState {
    levels: MultiLevelQueue,
    shutdown: bool,
}

/// The multilevel queue shared between the admission path and the workers.
pub struct ReadyQueue {
    state: Mutex<ReadyState>,
    // Woken on enqueue and on shutdown.
    process_ready: Condvar,
    // Wakes workers sleeping through a quantum when shutdown begins.
    stop: Condvar,
}

impl ReadyQueue {
    pub fn new(capacity: usize, quantum_unit: Duration) -> ReadyQueue {
        ReadyQueue {
            state: Mutex::new(ReadyState {
                levels: MultiLevelQueue::new(capacity, quantum_unit),
                shutdown: false,
            }),
            process_ready: Condvar::new(),
            stop: Condvar::new(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, ReadyState>, KernelError> {
        self.state
            .lock()
            .map_err(|_| KernelError::LockAcquisition { lock: "ready queue" })
    }

    pub fn enqueue(&self, handle: SlotHandle, priority: u8) -> Result<usize, KernelError> {
        let level = self.lock()?.levels.enqueue(handle, priority)?;
        self.process_ready.notify_one();
        Ok(level)
    }

    pub fn quantum_for(&self, priority: u8) -> Result<Duration, KernelError> {
        Ok(self.lock()?.levels.quantum_for(priority))
    }

    pub fn is_empty(&self) -> Result<bool, KernelError> {
        Ok(self.lock()?.levels.is_empty())
    }

    /// Blocks until some level is non-empty. `None` once shutdown has begun.
    fn wait_next(&self) -> Result<Option<(usize, SlotHandle, Duration)>, KernelError> {
        let state = self.lock()?;
        let mut state = self
            .process_ready
            .wait_while(state, |state| !state.shutdown && state.levels.is_empty())
            .map_err(|_| KernelError::LockAcquisition { lock: "ready queue" })?;

        if state.shutdown {
            return Ok(None);
        }

        Ok(state
            .levels
            .select_next_ready()
            .map(|(level, handle)| (level, handle, state.levels.quantum(level))))
    }

    /// Sleeps for one quantum. Returns `false` if shutdown cut it short.
    fn run_slice(&self, quantum: Duration) -> Result<bool, KernelError> {
        let state = self.lock()?;
        let (state, _) = self
            .stop
            .wait_timeout_while(state, quantum, |state| !state.shutdown)
            .map_err(|_| KernelError::LockAcquisition { lock: "ready queue" })?;

        Ok(!state.shutdown)
    }

    fn begin_shutdown(&self) {
        match self.lock() {
            Ok(mut state) => state.shutdown = true,
            Err(err) => error!(%err, "could not flag worker shutdown"),
        }
        self.process_ready.notify_all();
        self.stop.notify_all();
    }
}

#[derive(Default)]
struct WorkerCounters {
    slices: AtomicU64,
    stale: AtomicU64,
    requeued: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub slices: u64,
    pub stale: u64,
    pub requeued: u64,
}

/// Fixed set of threads draining the ready queue one quantum at a time.
pub struct WorkerPool {
    ready: Arc<ReadyQueue>,
    workers: Vec<JoinHandle<()>>,
    counters: Arc<WorkerCounters>,
}

impl WorkerPool {
    pub fn start(size: usize, ready: Arc<ReadyQueue>, table: Arc<ProcessTable>) -> WorkerPool {
        let counters = Arc::new(WorkerCounters::default());
        let mut workers = Vec::with_capacity(size);

        for id in 0..size {
            let ready_clone = ready.clone();
            let table_clone = table.clone();
            let counters_clone = counters.clone();

            let spawned = thread::Builder::new()
                .name(format!("worker-{}", id))
                .spawn(move || run_worker(id, &ready_clone, &table_clone, &counters_clone));

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(err) => warn!(worker = id, %err, "failed to create worker thread"),
            }
        }

        info!(workers = workers.len(), "worker pool started");

        WorkerPool {
            ready,
            workers,
            counters,
        }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            slices: self.counters.slices.load(Ordering::Relaxed),
            stale: self.counters.stale.load(Ordering::Relaxed),
            requeued: self.counters.requeued.load(Ordering::Relaxed),
        }
    }

    /// Stops and joins every worker. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }

        self.ready.begin_shutdown();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("worker thread panicked");
            }
        }
        info!("worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(id: usize, ready: &ReadyQueue, table: &ProcessTable, counters: &WorkerCounters) {
    debug!(worker = id, "worker started");

    loop {
        let (level, handle, quantum) = match ready.wait_next() {
            Ok(Some(next)) => next,
            Ok(None) => break,
            Err(err) => {
                error!(worker = id, %err, "worker stopping");
                break;
            }
        };

        // The queue only holds handles; the table decides whether the task
        // still exists.
        let record = match table.get(handle) {
            Ok(Some(record)) => record,
            Ok(None) => {
                counters.stale.fetch_add(1, Ordering::Relaxed);
                debug!(worker = id, slot = handle.index(), "dropping stale handle");
                continue;
            }
            Err(err) => {
                error!(worker = id, %err, "worker stopping");
                break;
            }
        };

        if record.state != ProcessState::Active {
            debug!(worker = id, name = record.get_name(), "task minimized, parked until resumed");
            continue;
        }

        debug!(worker = id, name = record.get_name(), level, "processing task");
        match ready.run_slice(quantum) {
            Ok(true) => {}
            Ok(false) => break,
            Err(err) => {
                error!(worker = id, %err, "worker stopping");
                break;
            }
        }
        counters.slices.fetch_add(1, Ordering::Relaxed);

        let record = match table.get(handle) {
            Ok(Some(record)) if record.state == ProcessState::Active => record,
            Ok(_) => continue,
            Err(err) => {
                error!(worker = id, %err, "worker stopping");
                break;
            }
        };

        match ready.enqueue(handle, record.get_priority()) {
            Ok(_) => {
                counters.requeued.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => warn!(worker = id, name = record.get_name(), %err, "could not requeue task"),
        }
    }

    debug!(worker = id, "worker stopped");
}
