//! Host operating-system collaborator.
//!
//! The kernel never touches `std::process` directly. It asks a [`ProcessHost`]
//! to check permissions, spawn and reap children, and stop processes by name.
//! [`SystemHost`] talks to the real OS; [`ScriptedHost`] replays canned exit
//! codes so the kernel can be driven deterministically.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crate::kernel::Pid;

pub trait ProcessHost: Send + Sync {
    /// True when `path` is a regular file the current user may execute.
    fn is_executable(&self, path: &Path) -> bool;

    fn spawn(&self, path: &Path) -> io::Result<Box<dyn HostChild>>;

    /// Best-effort stop of every OS process whose command line matches `name`.
    fn stop_by_name(&self, name: &str) -> io::Result<()>;
}

pub trait HostChild: Send {
    fn id(&self) -> Pid;

    /// Blocks until the child exits. `None` means it was killed by a signal.
    fn wait(&mut self) -> io::Result<Option<i32>>;
}

#[derive(Debug, Default)]
pub struct SystemHost;

impl SystemHost {
    pub fn new() -> SystemHost {
        SystemHost
    }
}

impl ProcessHost for SystemHost {
    #[cfg(unix)]
    fn is_executable(&self, path: &Path) -> bool {
        use std::os::unix::fs::PermissionsExt;

        match path.metadata() {
            Ok(metadata) => metadata.is_file() && metadata.permissions().mode() & 0o111 != 0,
            Err(_) => false,
        }
    }

    #[cfg(not(unix))]
    fn is_executable(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn spawn(&self, path: &Path) -> io::Result<Box<dyn HostChild>> {
        let child = Command::new(path).spawn()?;
        Ok(Box::new(SystemChild { child }))
    }

    #[cfg(unix)]
    fn stop_by_name(&self, name: &str) -> io::Result<()> {
        // pkill exits 1 when nothing matched, which is not a failure here.
        Command::new("pkill").args(["-f", name]).output()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn stop_by_name(&self, name: &str) -> io::Result<()> {
        Command::new("taskkill")
            .args(["/F", "/FI", &format!("WINDOWTITLE eq {name}")])
            .output()?;
        Ok(())
    }
}

struct SystemChild {
    child: Child,
}

impl HostChild for SystemChild {
    fn id(&self) -> Pid {
        self.child.id()
    }

    fn wait(&mut self) -> io::Result<Option<i32>> {
        Ok(self.child.wait()?.code())
    }
}

/// What a scripted child does when waited on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScriptedExit {
    Code(i32),
    /// Blocks the waiter for `delay`, then exits with `code`.
    Delayed { code: i32, delay: Duration },
    Killed,
    WaitFails,
}

#[derive(Default)]
struct Script {
    exits: HashMap<PathBuf, VecDeque<ScriptedExit>>,
    not_executable: HashSet<PathBuf>,
    failing_spawns: HashSet<PathBuf>,
    spawned: Vec<PathBuf>,
    stopped: Vec<String>,
    next_pid: Pid,
}

/// Deterministic in-memory host. Children exit immediately with the next
/// scripted outcome for their path, or code 0 when nothing is queued.
pub struct ScriptedHost {
    script: Mutex<Script>,
}

impl ScriptedHost {
    pub const FIRST_CHILD_PID: Pid = 1000;

    pub fn new() -> ScriptedHost {
        ScriptedHost {
            script: Mutex::new(Script {
                next_pid: Self::FIRST_CHILD_PID,
                ..Script::default()
            }),
        }
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push_exit(&self, path: impl Into<PathBuf>, exit: ScriptedExit) {
        self.script()
            .exits
            .entry(path.into())
            .or_default()
            .push_back(exit);
    }

    pub fn mark_not_executable(&self, path: impl Into<PathBuf>) {
        self.script().not_executable.insert(path.into());
    }

    pub fn fail_spawns(&self, path: impl Into<PathBuf>) {
        self.script().failing_spawns.insert(path.into());
    }

    pub fn restore_spawns(&self, path: &Path) {
        self.script().failing_spawns.remove(path);
    }

    pub fn spawned(&self) -> Vec<PathBuf> {
        self.script().spawned.clone()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.script().stopped.clone()
    }
}

impl Default for ScriptedHost {
    fn default() -> ScriptedHost {
        ScriptedHost::new()
    }
}

impl ProcessHost for ScriptedHost {
    fn is_executable(&self, path: &Path) -> bool {
        !self.script().not_executable.contains(path)
    }

    fn spawn(&self, path: &Path) -> io::Result<Box<dyn HostChild>> {
        let mut script = self.script();

        if script.failing_spawns.contains(path) {
            return Err(io::Error::new(io::ErrorKind::Other, "scripted spawn failure"));
        }

        let exit = script
            .exits
            .get_mut(path)
            .and_then(VecDeque::pop_front)
            .unwrap_or(ScriptedExit::Code(0));
        let pid = script.next_pid;
        script.next_pid += 1;
        script.spawned.push(path.to_path_buf());

        Ok(Box::new(ScriptedChild { pid, exit }))
    }

    fn stop_by_name(&self, name: &str) -> io::Result<()> {
        self.script().stopped.push(name.to_string());
        Ok(())
    }
}

struct ScriptedChild {
    pid: Pid,
    exit: ScriptedExit,
}

impl HostChild for ScriptedChild {
    fn id(&self) -> Pid {
        self.pid
    }

    fn wait(&mut self) -> io::Result<Option<i32>> {
        match self.exit {
            ScriptedExit::Code(code) => Ok(Some(code)),
            ScriptedExit::Delayed { code, delay } => {
                thread::sleep(delay);
                Ok(Some(code))
            }
            ScriptedExit::Killed => Ok(None),
            ScriptedExit::WaitFails => Err(io::Error::new(io::ErrorKind::Other, "scripted wait failure")),
        }
    }
}
