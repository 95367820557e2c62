use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{KernelError, SlotHandle};

use crate::io::TaskDescriptor;

pub const LEVELS: usize = 3;

/// CPU scheduling policy. It shapes admission messages only; bucket
/// assignment and worker behaviour are identical under every policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SchedulingPolicy {
    #[default]
    Fcfs,
    Sjf,
    Priority,
    #[value(alias = "rr")]
    RoundRobin,
}

impl SchedulingPolicy {
    pub const ALL: [SchedulingPolicy; 4] = [
        SchedulingPolicy::Fcfs,
        SchedulingPolicy::Sjf,
        SchedulingPolicy::Priority,
        SchedulingPolicy::RoundRobin,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SchedulingPolicy::Fcfs => "First-Come-First-Served",
            SchedulingPolicy::Sjf => "Shortest Job First",
            SchedulingPolicy::Priority => "Priority Scheduling",
            SchedulingPolicy::RoundRobin => "Round Robin",
        }
    }

    pub fn admission_note(&self, descriptor: &TaskDescriptor, quantum: Duration) -> Option<String> {
        match self {
            SchedulingPolicy::Fcfs => None,
            SchedulingPolicy::Sjf => Some(format!(
                "Using Shortest Job First scheduling. Task size: {} MB.",
                descriptor.memory_mb
            )),
            SchedulingPolicy::Priority => Some(format!(
                "Using Priority scheduling for this task (priority: {}).",
                descriptor.priority
            )),
            SchedulingPolicy::RoundRobin => Some(format!(
                "Using Round Robin scheduling with a time quantum of {} ms.",
                quantum.as_millis()
            )),
        }
    }
}

impl fmt::Display for SchedulingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SchedulingPolicy {
    type Err = String;

    /// Accepts the CLI names as well as the menu numbers 1-4.
    fn from_str(input: &str) -> Result<SchedulingPolicy, String> {
        if let Ok(choice) = input.parse::<usize>() {
            return choice
                .checked_sub(1)
                .and_then(|index| SchedulingPolicy::ALL.get(index).copied())
                .ok_or_else(|| format!("no scheduler numbered {}", choice));
        }

        <SchedulingPolicy as clap::ValueEnum>::from_str(input, true)
            .map_err(|_| format!("unknown scheduler: {}", input))
    }
}

/// Three-level feedback queue of table handles. Level 0 is the most
/// urgent; each level's quantum grows with its index.
pub struct MultiLevelQueue {
    levels: [VecDeque<SlotHandle>; LEVELS],
    quanta: [Duration; LEVELS],
    capacity: usize,
}

impl MultiLevelQueue {
    pub fn new(capacity: usize, quantum_unit: Duration) -> MultiLevelQueue {
        MultiLevelQueue {
            levels: Default::default(),
            quanta: [quantum_unit, quantum_unit * 2, quantum_unit * 3],
            capacity,
        }
    }

    pub fn level_for(priority: u8) -> usize {
        match priority {
            3..=u8::MAX => 0,
            1 | 2 => 1,
            0 => 2,
        }
    }

    pub fn quantum(&self, level: usize) -> Duration {
        self.quanta[level]
    }

    pub fn quantum_for(&self, priority: u8) -> Duration {
        self.quantum(Self::level_for(priority))
    }

    /// Returns the level the handle sits in. A handle that is already
    /// queued is not queued twice.
    pub fn enqueue(&mut self, handle: SlotHandle, priority: u8) -> Result<usize, KernelError> {
        let level = Self::level_for(priority);
        let queue = &mut self.levels[level];

        if queue.contains(&handle) {
            return Ok(level);
        }
        if queue.len() >= self.capacity {
            return Err(KernelError::QueueFull { level });
        }

        queue.push_back(handle);
        Ok(level)
    }

    pub fn dequeue(&mut self, level: usize) -> Option<SlotHandle> {
        self.levels.get_mut(level)?.pop_front()
    }

    /// Head of the most urgent non-empty level. No aging: a busy level 0
    /// starves the levels below it.
    pub fn select_next_ready(&mut self) -> Option<(usize, SlotHandle)> {
        let level = self.levels.iter().position(|queue| !queue.is_empty())?;
        self.dequeue(level).map(|handle| (level, handle))
    }

    pub fn len(&self, level: usize) -> usize {
        self.levels[level].len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.iter().all(VecDeque::is_empty)
    }
}
