//! Ledger conservation and admission atomicity under random operation
//! sequences.
//!
//! After every operation: available + reserved-by-live-records == total,
//! no two live records share a name or a pid, and a refused operation
//! leaves the ledger and the table exactly as they were. The same holds
//! once several threads have driven one kernel at the same time.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use nexos_simulator::io::{ScriptedExit, ScriptedHost, TaskCatalog, TaskDescriptor};
use nexos_simulator::kernel::{
    ExitOutcome, HardwareResources, Kernel, KernelError, KernelOptions, ProcessRecord, MINIMIZE_EXIT_CODE,
};
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;

const TOTAL_MEMORY_MB: u32 = 1024;
const TOTAL_DISK_GB: u32 = 40;
const TOTAL_CORES: u32 = 3;
const TABLE_CAPACITY: usize = 4;
const THREADS: usize = 8;

fn descriptor(name: &str, memory_mb: u32, disk_gb: u32, priority: u8) -> TaskDescriptor {
    TaskDescriptor {
        name: name.to_string(),
        path: PathBuf::from(format!("./tasks/{}.sh", name.to_lowercase())),
        memory_mb,
        disk_gb,
        priority,
    }
}

fn catalog() -> TaskCatalog {
    TaskCatalog::new(vec![
        descriptor("Notepad", 256, 10, 2),
        descriptor("Calculator", 64, 2, 3),
        descriptor("Clock", 64, 2, 3),
        descriptor("Minesweeper", 512, 20, 0),
        descriptor("Browser", 700, 15, 1),
    ])
    .unwrap()
}

fn boot(host: Arc<ScriptedHost>) -> Kernel {
    let options = KernelOptions {
        max_tasks: TABLE_CAPACITY,
        worker_threads: 1,
        quantum_unit: Duration::from_millis(1),
        ..KernelOptions::default()
    };
    Kernel::new(
        HardwareResources::with_memory_mb(TOTAL_MEMORY_MB, TOTAL_DISK_GB, TOTAL_CORES),
        catalog(),
        options,
        host,
    )
}

#[derive(Clone, Debug)]
enum Op {
    Launch { task: usize, exit: ScriptedExit, fail_spawn: bool },
    Background(usize),
    Terminate(usize),
    Minimize(usize),
    Resume { pick: usize, exit: ScriptedExit, fail_spawn: bool },
}

fn exit_strategy() -> impl Strategy<Value = ScriptedExit> {
    prop_oneof![
        Just(ScriptedExit::Code(0)),
        Just(ScriptedExit::Code(MINIMIZE_EXIT_CODE)),
        Just(ScriptedExit::Code(3)),
        Just(ScriptedExit::Killed),
        Just(ScriptedExit::WaitFails),
    ]
}

fn op_strategy() -> impl Strategy<Value = Op> {
    // Index 5 is one past the catalog.
    prop_oneof![
        (0..6usize, exit_strategy(), proptest::bool::weighted(0.2))
            .prop_map(|(task, exit, fail_spawn)| Op::Launch { task, exit, fail_spawn }),
        (0..6usize).prop_map(Op::Background),
        any::<usize>().prop_map(Op::Terminate),
        any::<usize>().prop_map(Op::Minimize),
        (any::<usize>(), exit_strategy(), proptest::bool::weighted(0.2))
            .prop_map(|(pick, exit, fail_spawn)| Op::Resume { pick, exit, fail_spawn }),
    ]
}

fn full() -> HardwareResources {
    HardwareResources::with_memory_mb(TOTAL_MEMORY_MB, TOTAL_DISK_GB, TOTAL_CORES)
}

/// What must hold for any single snapshot of the table, even while other
/// threads are mid-operation.
fn check_table(records: &[ProcessRecord]) -> Result<(), TestCaseError> {
    prop_assert!(records.len() <= TABLE_CAPACITY);

    let names: HashSet<&str> = records.iter().map(|r| r.get_name()).collect();
    prop_assert_eq!(names.len(), records.len(), "duplicate live names: {:?}", records);

    // A foreground task has no pid until its child is spawned.
    let pids: Vec<u32> = records.iter().filter_map(|r| r.pid).collect();
    let distinct: HashSet<u32> = pids.iter().copied().collect();
    prop_assert_eq!(distinct.len(), pids.len(), "shared pids: {:?}", records);
    Ok(())
}

fn check_invariants(kernel: &Kernel) -> Result<(), TestCaseError> {
    let hardware = kernel.hardware().unwrap();
    let records = kernel.list_active().unwrap();

    let memory: u32 = records.iter().map(|r| r.get_requirements().memory_mb).sum();
    let disk: u32 = records.iter().map(|r| r.get_requirements().disk_gb).sum();
    let cores = records.len() as u32;

    prop_assert_eq!(hardware.available_memory_mb + memory, TOTAL_MEMORY_MB);
    prop_assert_eq!(hardware.available_disk_gb + disk, TOTAL_DISK_GB);
    prop_assert_eq!(hardware.available_cores + cores, TOTAL_CORES);
    check_table(&records)
}

/// Applies one operation. Returns whether the kernel refused it.
fn apply(kernel: &Kernel, host: &ScriptedHost, op: &Op) -> bool {
    let records = kernel.list_active().unwrap();
    let pick_pid = |pick: usize| {
        if records.is_empty() {
            // Nobody has this pid.
            Some(7)
        } else {
            records[pick % records.len()].pid
        }
    };

    match op {
        Op::Launch { task, exit, fail_spawn } => {
            let path = match kernel.catalog().get(*task) {
                Some(descriptor) => descriptor.path.clone(),
                None => PathBuf::from("./tasks/none.sh"),
            };
            host.push_exit(path.clone(), *exit);
            if *fail_spawn {
                host.fail_spawns(path.clone());
            }
            let refused = kernel.launch(*task).is_err();
            host.restore_spawns(&path);
            refused
        }
        Op::Background(task) => kernel.launch_background(*task).is_err(),
        Op::Terminate(pick) => match pick_pid(*pick) {
            Some(pid) => kernel.terminate(pid).is_err(),
            None => true,
        },
        Op::Minimize(pick) => match pick_pid(*pick) {
            Some(pid) => kernel.minimize(pid).is_err(),
            None => true,
        },
        Op::Resume { pick, exit, fail_spawn } => {
            let Some(pid) = pick_pid(*pick) else {
                return true;
            };
            let path = records
                .iter()
                .find(|record| record.pid == Some(pid))
                .map(|record| record.get_path().to_path_buf())
                .unwrap_or_else(|| PathBuf::from("./tasks/none.sh"));
            host.push_exit(path.clone(), *exit);
            if *fail_spawn {
                host.fail_spawns(path.clone());
            }
            let refused = kernel.resume(pid).is_err();
            host.restore_spawns(&path);
            refused
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    /// Every operation keeps the ledger balanced against the live records.
    #[test]
    fn ledger_is_conserved(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let host = Arc::new(ScriptedHost::new());
        let kernel = boot(host.clone());

        for op in &ops {
            apply(&kernel, &host, op);
            check_invariants(&kernel)?;
        }

        kernel.shutdown();
        prop_assert_eq!(kernel.hardware().unwrap(), full());
    }

    /// Several threads launching, backgrounding, resuming and terminating
    /// at once still leave the ledger balanced and the names unique.
    #[test]
    fn ledger_is_conserved_across_threads(
        streams in prop::collection::vec(prop::collection::vec(op_strategy(), 1..20), THREADS)
    ) {
        let host = Arc::new(ScriptedHost::new());
        let kernel = boot(host.clone());

        thread::scope(|scope| -> Result<(), TestCaseError> {
            let runners: Vec<_> = streams
                .iter()
                .map(|ops| {
                    let (kernel, host) = (&kernel, &host);
                    scope.spawn(move || -> Result<(), TestCaseError> {
                        for op in ops {
                            apply(kernel, host, op);
                            check_table(&kernel.list_active().unwrap())?;
                        }
                        Ok(())
                    })
                })
                .collect();

            for runner in runners {
                runner.join().unwrap()?;
            }
            Ok(())
        })?;

        check_invariants(&kernel)?;
        kernel.shutdown();
        prop_assert_eq!(kernel.hardware().unwrap(), full());
        prop_assert!(kernel.list_active().unwrap().is_empty());
    }

    /// A refused operation changes neither the ledger nor the table.
    #[test]
    fn refused_operations_change_nothing(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let host = Arc::new(ScriptedHost::new());
        let kernel = boot(host.clone());

        for op in &ops {
            let hardware = kernel.hardware().unwrap();
            let records = kernel.list_active().unwrap();

            if apply(&kernel, &host, op) {
                prop_assert_eq!(kernel.hardware().unwrap(), hardware, "after {:?}", op);
                prop_assert_eq!(kernel.list_active().unwrap(), records, "after {:?}", op);
            }
        }

        kernel.shutdown();
    }

    /// Only exit code 10 minimizes.
    #[test]
    fn exit_code_mapping(code in any::<i32>()) {
        let outcome = ExitOutcome::from_code(Some(code));
        prop_assert_eq!(outcome == ExitOutcome::Minimized, code == MINIMIZE_EXIT_CODE);
    }
}

/// Racing background launches of one task admit it exactly once.
#[test]
fn racing_background_launches_admit_once() {
    for _ in 0..20 {
        let kernel = boot(Arc::new(ScriptedHost::new()));
        let start = Barrier::new(THREADS);

        let results: Vec<Result<bool, KernelError>> = thread::scope(|scope| {
            let runners: Vec<_> = (0..THREADS)
                .map(|_| {
                    let (kernel, start) = (&kernel, &start);
                    scope.spawn(move || {
                        start.wait();
                        kernel.launch_background(0)
                    })
                })
                .collect();
            runners.into_iter().map(|runner| runner.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|result| **result == Ok(true)).count(), 1);
        for result in &results {
            assert!(
                matches!(result, Ok(_) | Err(KernelError::AlreadyRunning { .. })),
                "unexpected outcome: {:?}",
                result
            );
        }

        let records = kernel.list_active().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(kernel.hardware().unwrap().available_memory_mb, TOTAL_MEMORY_MB - 256);
        check_invariants(&kernel).unwrap();
        kernel.shutdown();
        assert_eq!(kernel.hardware().unwrap(), full());
    }
}
