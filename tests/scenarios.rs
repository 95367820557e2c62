//! End-to-end kernel scenarios on a scripted host.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use nexos_simulator::io::{ScriptedExit, ScriptedHost, TaskCatalog, TaskDescriptor};
use nexos_simulator::kernel::{
    ExitOutcome, HardwareResources, Kernel, KernelError, KernelOptions, ProcessState, Signal, DETACHED_PID_BASE,
};

const EDITOR: &str = "./tasks/notepad.sh";

fn catalog() -> TaskCatalog {
    TaskCatalog::new(vec![
        TaskDescriptor {
            name: "Notepad".to_string(),
            path: PathBuf::from(EDITOR),
            memory_mb: 256,
            disk_gb: 10,
            priority: 2,
        },
        TaskDescriptor {
            name: "Clock".to_string(),
            path: PathBuf::from("./tasks/clock.sh"),
            memory_mb: 64,
            disk_gb: 2,
            priority: 3,
        },
    ])
    .unwrap()
}

fn boot(hardware: HardwareResources, host: Arc<ScriptedHost>) -> Kernel {
    let options = KernelOptions {
        max_tasks: 20,
        worker_threads: 2,
        quantum_unit: Duration::from_millis(1),
        ..KernelOptions::default()
    };
    Kernel::new(hardware, catalog(), options, host)
}

fn available(kernel: &Kernel) -> (u32, u32, u32) {
    let hardware = kernel.hardware().unwrap();
    (
        hardware.available_memory_mb,
        hardware.available_disk_gb,
        hardware.available_cores,
    )
}

/// Scenario A: admission reserves, a second admission of the same active
/// name is refused and changes nothing.
#[test]
fn admission_reserves_and_rejects_duplicates() {
    let host = Arc::new(ScriptedHost::new());
    host.push_exit(
        EDITOR,
        ScriptedExit::Delayed {
            code: 0,
            delay: Duration::from_millis(300),
        },
    );
    let kernel = boot(HardwareResources::with_memory_mb(512, 20, 2), host);

    thread::scope(|scope| {
        let foreground = scope.spawn(|| kernel.launch(0));

        let deadline = Instant::now() + Duration::from_secs(5);
        while !kernel.foreground_busy() || kernel.list_active().unwrap().is_empty() {
            assert!(Instant::now() < deadline, "launch never became active");
            thread::sleep(Duration::from_millis(2));
        }

        assert_eq!(kernel.list_active().unwrap()[0].state, ProcessState::Active);
        assert_eq!(available(&kernel), (256, 10, 1));

        let second = kernel.launch(0);
        assert!(matches!(second, Err(KernelError::AlreadyRunning { .. })));
        assert_eq!(kernel.launch_background(0), Ok(false));
        assert_eq!(available(&kernel), (256, 10, 1));

        let outcome = foreground.join().unwrap();
        assert_eq!(outcome, Ok(ExitOutcome::Closed { code: Some(0) }));
    });

    assert_eq!(available(&kernel), (512, 20, 2));
    kernel.shutdown();
}

/// Scenario B: exit code 10 keeps the reservation; resuming and exiting
/// normally gives everything back.
#[test]
fn minimize_then_resume_then_close() {
    let host = Arc::new(ScriptedHost::new());
    host.push_exit(EDITOR, ScriptedExit::Code(10));
    host.push_exit(EDITOR, ScriptedExit::Code(0));
    let kernel = boot(HardwareResources::with_memory_mb(512, 20, 2), host);

    assert_eq!(kernel.launch(0), Ok(ExitOutcome::Minimized));
    assert_eq!(available(&kernel), (256, 10, 1));

    let record = kernel.list_active().unwrap().remove(0);
    assert_eq!(record.state, ProcessState::Minimized);

    let outcome = kernel.resume(record.pid.unwrap()).unwrap();
    assert_eq!(outcome, ExitOutcome::Closed { code: Some(0) });
    assert_eq!(available(&kernel), (512, 20, 2));
    assert!(kernel.list_active().unwrap().is_empty());
    kernel.shutdown();
}

/// Scenario C: with no cores nothing can be admitted.
#[test]
fn zero_cores_admits_nothing() {
    let host = Arc::new(ScriptedHost::new());
    let kernel = boot(HardwareResources::with_memory_mb(4096, 100, 0), host.clone());

    assert!(matches!(kernel.launch(0), Err(KernelError::ResourceExhausted { .. })));
    assert!(matches!(
        kernel.launch_background(1),
        Err(KernelError::ResourceExhausted { .. })
    ));
    assert_eq!(available(&kernel), (4096, 100, 0));
    assert!(kernel.list_active().unwrap().is_empty());
    assert!(host.spawned().is_empty());
    kernel.shutdown();
}

/// Scenario D: user mode refuses terminate and leaves the record alone.
#[test]
fn user_mode_cannot_terminate() {
    let host = Arc::new(ScriptedHost::new());
    let kernel = boot(HardwareResources::with_memory_mb(512, 20, 2), host.clone());
    kernel.launch_background(1).unwrap();
    kernel.set_privileged(false);

    let before = kernel.list_active().unwrap();
    let pid = before[0].pid.unwrap();
    assert_eq!(kernel.terminate(pid), Err(KernelError::PermissionDenied));
    assert_eq!(kernel.send_signal(pid, Signal::Term), Err(KernelError::PermissionDenied));
    assert_eq!(kernel.list_active().unwrap(), before);
    assert_eq!(available(&kernel), (448, 18, 1));
    assert!(host.stopped().is_empty());

    // Minimize and resume are not privileged.
    assert!(matches!(kernel.resume(pid), Ok(ExitOutcome::Closed { .. })));
    assert_eq!(available(&kernel), (512, 20, 2));
    kernel.shutdown();
}

#[test]
fn freed_slot_is_reused_by_the_next_admission() {
    let host = Arc::new(ScriptedHost::new());
    let kernel = boot(HardwareResources::with_memory_mb(512, 20, 2), host);

    kernel.launch_background(0).unwrap();
    kernel.launch_background(1).unwrap();

    assert_eq!(kernel.terminate(DETACHED_PID_BASE).unwrap().get_name(), "Notepad");
    kernel.launch_background(0).unwrap();

    let live: Vec<(String, Option<u32>)> = kernel
        .list_active()
        .unwrap()
        .iter()
        .map(|record| (record.get_name().to_string(), record.pid))
        .collect();
    assert_eq!(
        live,
        vec![
            ("Notepad".to_string(), Some(DETACHED_PID_BASE + 2)),
            ("Clock".to_string(), Some(DETACHED_PID_BASE + 1)),
        ]
    );
    kernel.shutdown();
}

#[test]
fn shutdown_releases_everything_and_stops_workers() {
    let host = Arc::new(ScriptedHost::new());
    let kernel = boot(HardwareResources::with_memory_mb(512, 20, 2), host.clone());
    kernel.launch_background(0).unwrap();
    kernel.launch_background(1).unwrap();
    assert_eq!(kernel.schedule(DETACHED_PID_BASE), Ok(1));

    let terminated = kernel.shutdown();
    assert_eq!(terminated.len(), 2);
    assert_eq!(available(&kernel), (512, 20, 2));
    assert_eq!(host.stopped().len(), 2);
    assert!(kernel.worker_stats().is_none());
}
