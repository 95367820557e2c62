use std::io::{self, BufRead, Write};
use std::str::FromStr;
use std::time::Duration;

use tracing::debug;

use super::{ExitOutcome, Kernel, KernelError, Pid, ProcessRecord, SchedulingPolicy, Signal};

const PROMPT: &str = "nexos> ";

const HELP: &str = "\
Commands:
  apps                    list launchable applications
  launch <n>              run application n in the foreground
  bg <n>                  start application n minimized
  ps                      list active processes
  minimize <pid>          minimize a process
  resume <pid>            resume a minimized process
  terminate <pid>         terminate a process (kernel mode)
  signal <pid> <sig>      send stop|cont|term (kernel mode)
  scheduler [name]        show or change the scheduler (kernel mode)
  schedule <pid>          queue a process for the worker pool
  mode                    switch between kernel and user mode
  status                  show system status
  help                    show this help
  quit                    shut down";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Command {
    Apps,
    Launch(usize),
    Background(usize),
    Ps,
    Minimize(Pid),
    Resume(Pid),
    Terminate(Pid),
    Signal(Pid, Signal),
    Scheduler(Option<SchedulingPolicy>),
    Schedule(Pid),
    Mode,
    Status,
    Help,
    Quit,
}

fn argument<T: FromStr>(value: Option<&str>, what: &str) -> Result<T, String> {
    let value = value.ok_or_else(|| format!("missing {}", what))?;
    value.parse().map_err(|_| format!("invalid {}: {}", what, value))
}

impl Command {
    /// `Ok(None)` for a blank line.
    fn parse(line: &str) -> Result<Option<Command>, String> {
        let mut words = line.split_whitespace();
        let Some(word) = words.next() else {
            return Ok(None);
        };
        let first = words.next();

        let command = match word.to_ascii_lowercase().as_str() {
            "apps" => Command::Apps,
            "launch" => Command::Launch(argument(first, "application number")?),
            "bg" => Command::Background(argument(first, "application number")?),
            "ps" => Command::Ps,
            "minimize" => Command::Minimize(argument(first, "pid")?),
            "resume" => Command::Resume(argument(first, "pid")?),
            "terminate" | "kill" => Command::Terminate(argument(first, "pid")?),
            "signal" => {
                let pid = argument(first, "pid")?;
                let signal = words.next().ok_or("missing signal")?.parse()?;
                Command::Signal(pid, signal)
            }
            "scheduler" => Command::Scheduler(first.map(str::parse).transpose()?),
            "schedule" => Command::Schedule(argument(first, "pid")?),
            "mode" => Command::Mode,
            "status" => Command::Status,
            "help" | "?" => Command::Help,
            "quit" | "exit" | "shutdown" => Command::Quit,
            other => return Err(format!("unknown command: {} (try help)", other)),
        };

        Ok(Some(command))
    }
}

fn format_running_time(running: Duration) -> String {
    let seconds = running.as_secs();
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

fn print_outcome<W: Write>(output: &mut W, name: &str, outcome: ExitOutcome) -> io::Result<()> {
    match outcome {
        ExitOutcome::Minimized => writeln!(output, "{} minimized. Use resume to bring it back.", name),
        ExitOutcome::Closed { code: Some(code) } => writeln!(output, "{} closed (exit code {}).", name, code),
        ExitOutcome::Closed { code: None } => writeln!(output, "{} closed.", name),
    }
}

fn announce<W: Write>(output: &mut W, note: Option<&str>, name: &str) -> io::Result<()> {
    if let Some(note) = note {
        writeln!(output, "{}", note)?;
    }
    writeln!(output, "Running {}...", name)?;
    output.flush()
}

fn mode_name(privileged: bool) -> &'static str {
    if privileged {
        "kernel"
    } else {
        "user"
    }
}

/// Line-oriented operator shell over a [`Kernel`].
pub struct Driver {
    kernel: Kernel,
    autostart: Vec<String>,
}

impl Driver {
    pub fn new(kernel: Kernel, autostart: Vec<String>) -> Driver {
        Driver { kernel, autostart }
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    /// Reads commands until `quit` or end of input, then shuts the kernel
    /// down. Only I/O errors on `output` end the loop early.
    pub fn start<R: BufRead, W: Write>(&mut self, input: R, mut output: W) -> io::Result<()> {
        writeln!(output, "Starting the kernel.")?;
        self.print_status(&mut output)?;
        for name in self.kernel.boot(&self.autostart) {
            writeln!(output, "...Started {} in background.", name)?;
        }
        writeln!(output, "Type help for the list of commands.")?;

        let mut lines = input.lines();
        loop {
            write!(output, "{}", PROMPT)?;
            output.flush()?;

            let Some(line) = lines.next() else {
                writeln!(output)?;
                break;
            };
            let line = line?;

            let command = match Command::parse(&line) {
                Ok(Some(command)) => command,
                Ok(None) => continue,
                Err(message) => {
                    writeln!(output, "{}", message)?;
                    continue;
                }
            };

            debug!(?command, "command");
            if command == Command::Quit {
                break;
            }

            if let Err(err) = self.execute(command, &mut output)? {
                writeln!(output, "Error: {}", err)?;
            }
        }

        writeln!(output, "Shutting down.")?;
        let terminated = self.kernel.shutdown();
        for name in &terminated {
            writeln!(output, "...Terminated {}.", name)?;
        }
        writeln!(output, "Shutdown complete.")?;
        Ok(())
    }

    /// The outer result is output I/O, the inner one the kernel's answer.
    fn execute<W: Write>(&self, command: Command, output: &mut W) -> io::Result<Result<(), KernelError>> {
        let kernel = &self.kernel;

        let result = match command {
            Command::Apps => {
                self.print_apps(output)?;
                Ok(())
            }
            Command::Launch(index) => match kernel.admission_note(index) {
                Ok(note) => {
                    let name = self.task_name(index);
                    let mut announced = Ok(());
                    let result = kernel.launch_with(index, |_| {
                        announced = announce(&mut *output, note.as_deref(), &name);
                    });
                    announced?;
                    match result {
                        Ok(outcome) => {
                            print_outcome(output, &name, outcome)?;
                            Ok(())
                        }
                        Err(err) => Err(err),
                    }
                }
                Err(err) => Err(err),
            },
            Command::Background(index) => match kernel.launch_background(index) {
                Ok(true) => {
                    writeln!(output, "{} started in background.", self.task_name(index))?;
                    Ok(())
                }
                Ok(false) => {
                    writeln!(output, "{} is already running.", self.task_name(index))?;
                    Ok(())
                }
                Err(err) => Err(err),
            },
            Command::Ps => match kernel.list_active() {
                Ok(records) => {
                    self.print_processes(output, &records)?;
                    Ok(())
                }
                Err(err) => Err(err),
            },
            Command::Minimize(pid) => match kernel.minimize(pid) {
                Ok(()) => {
                    writeln!(output, "Process {} minimized.", pid)?;
                    Ok(())
                }
                Err(err) => Err(err),
            },
            Command::Resume(pid) => match kernel.resume(pid) {
                Ok(outcome) => {
                    print_outcome(output, &format!("Process {}", pid), outcome)?;
                    Ok(())
                }
                Err(err) => Err(err),
            },
            Command::Terminate(pid) => match kernel.terminate(pid) {
                Ok(record) => {
                    writeln!(output, "{} (pid {}) terminated.", record.get_name(), pid)?;
                    Ok(())
                }
                Err(err) => Err(err),
            },
            Command::Signal(pid, signal) => match kernel.send_signal(pid, signal) {
                Ok(outcome) => {
                    writeln!(output, "Sent {} to process {}.", signal, pid)?;
                    if let Some(outcome) = outcome {
                        print_outcome(output, &format!("Process {}", pid), outcome)?;
                    }
                    Ok(())
                }
                Err(err) => Err(err),
            },
            Command::Scheduler(None) => match kernel.policy() {
                Ok(current) => {
                    writeln!(output, "Current scheduler: {}", current)?;
                    for (number, policy) in SchedulingPolicy::ALL.iter().enumerate() {
                        writeln!(output, "  {}. {}", number + 1, policy)?;
                    }
                    Ok(())
                }
                Err(err) => Err(err),
            },
            Command::Scheduler(Some(policy)) => match kernel.change_scheduler_policy(policy) {
                Ok(()) => {
                    writeln!(output, "Scheduler changed to {}.", policy)?;
                    Ok(())
                }
                Err(err) => Err(err),
            },
            Command::Schedule(pid) => match kernel.schedule(pid) {
                Ok(level) => {
                    writeln!(output, "Process {} queued at level {}.", pid, level)?;
                    Ok(())
                }
                Err(err) => Err(err),
            },
            Command::Mode => {
                let privileged = kernel.switch_mode();
                writeln!(output, "Switched to {} mode.", mode_name(privileged))?;
                Ok(())
            }
            Command::Status => {
                self.print_status(output)?;
                Ok(())
            }
            Command::Help => {
                writeln!(output, "{}", HELP)?;
                Ok(())
            }
            Command::Quit => Ok(()),
        };

        Ok(result)
    }

    fn task_name(&self, index: usize) -> String {
        self.kernel
            .catalog()
            .get(index)
            .map(|task| task.name.clone())
            .unwrap_or_else(|| format!("application {}", index))
    }

    fn print_apps<W: Write>(&self, output: &mut W) -> io::Result<()> {
        writeln!(output, "Available applications:")?;
        for (index, task) in self.kernel.catalog().iter().enumerate() {
            writeln!(
                output,
                "{:>3}. {:<16} {:>5} MB {:>4} GB  priority {}",
                index, task.name, task.memory_mb, task.disk_gb, task.priority
            )?;
        }
        Ok(())
    }

    fn print_processes<W: Write>(&self, output: &mut W, records: &[ProcessRecord]) -> io::Result<()> {
        if records.is_empty() {
            writeln!(output, "No active processes.")?;
            return Ok(());
        }

        writeln!(output, " PID        | Name             | RAM (MB) | Disk (GB) | Priority | State     | Time")?;
        writeln!(output, "------------|------------------|----------|-----------|----------|-----------|------")?;
        for record in records {
            let pid = record.pid.map(|pid| pid.to_string()).unwrap_or_else(|| "-".to_string());
            let requirements = record.get_requirements();
            writeln!(
                output,
                " {:<10} | {:<16} | {:>8} | {:>9} | {:>8} | {:<9} | {}",
                pid,
                record.get_name(),
                requirements.memory_mb,
                requirements.disk_gb,
                record.get_priority(),
                record.state,
                format_running_time(record.get_running_time())
            )?;
        }
        Ok(())
    }

    fn print_status<W: Write>(&self, output: &mut W) -> io::Result<()> {
        let kernel = &self.kernel;

        writeln!(output, "Mode:      {}", mode_name(kernel.is_privileged()))?;
        match kernel.policy() {
            Ok(policy) => writeln!(output, "Scheduler: {}", policy)?,
            Err(err) => writeln!(output, "Scheduler: unavailable ({})", err)?,
        }
        match kernel.hardware() {
            Ok(hardware) => {
                writeln!(
                    output,
                    "RAM:       {} / {} MB available, {} reserved",
                    hardware.available_memory_mb,
                    hardware.total_memory_mb,
                    hardware.reserved_memory_mb()
                )?;
                writeln!(
                    output,
                    "Disk:      {} / {} GB available, {} reserved",
                    hardware.available_disk_gb,
                    hardware.total_disk_gb,
                    hardware.reserved_disk_gb()
                )?;
                writeln!(
                    output,
                    "Cores:     {} / {} available, {} reserved",
                    hardware.available_cores,
                    hardware.total_cores,
                    hardware.reserved_cores()
                )?;
            }
            Err(err) => writeln!(output, "Hardware:  unavailable ({})", err)?,
        }
        match kernel.list_active() {
            Ok(records) => writeln!(output, "Processes: {} / {} active", records.len(), kernel.capacity())?,
            Err(err) => writeln!(output, "Processes: unavailable ({})", err)?,
        }
        if let Some(stats) = kernel.worker_stats() {
            writeln!(
                output,
                "Workers:   {} slices run, {} stale handles skipped",
                stats.slices, stats.stale
            )?;
        }
        Ok(())
    }
}
