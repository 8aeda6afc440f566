//! Worker lifecycle state machine.
//!
//! This module tracks which worker generation is current and whether it may
//! receive commands. It performs no I/O: the bus actor spawns and signals
//! processes, then reports the outcome here.
//!
//! State transitions:
//! - Exited -> Starting (initial spawn, or respawn after the backoff delay)
//! - Starting -> Running (process spawned with piped stdio)
//! - Starting -> Exited (spawn failed; another attempt is scheduled)
//! - Running -> Exited (process exited, crashed or was killed)
//!
//! Every spawn bumps the generation. Output and exit events carry the
//! generation they came from, and events from an older generation are
//! ignored so a late line from a dead worker can never resolve a command
//! dispatched to its replacement.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// Lifecycle state of the current worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// A spawn is in progress; commands queue but are not written.
    Starting,
    /// The worker is up and may receive commands.
    Running,
    /// No live worker; a respawn is pending.
    Exited,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Starting => "starting",
            WorkerState::Running => "running",
            WorkerState::Exited => "exited",
        };
        f.write_str(name)
    }
}

/// Monotonic worker generation number. Zero means "never spawned".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct Generation(u64);

impl Generation {
    pub fn get(self) -> u64 {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn from_raw(n: u64) -> Self {
        Self(n)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Owns the Process Handle state for the bus.
#[derive(Debug)]
pub(crate) struct Supervisor {
    state: WorkerState,
    generation: Generation,
    /// Cleared when a write to the current worker fails; restored by the
    /// next spawn.
    writable: bool,
    respawn_delay: Duration,
    /// Unexpected exits observed (spawn failures excluded).
    exits: u64,
    spawn_failures: u64,
}

impl Supervisor {
    pub(crate) fn new(respawn_delay: Duration) -> Self {
        Self {
            state: WorkerState::Exited,
            generation: Generation::default(),
            writable: false,
            respawn_delay,
            exits: 0,
            spawn_failures: 0,
        }
    }

    pub(crate) fn state(&self) -> WorkerState {
        self.state
    }

    pub(crate) fn generation(&self) -> Generation {
        self.generation
    }

    pub(crate) fn respawn_delay(&self) -> Duration {
        self.respawn_delay
    }

    pub(crate) fn exits(&self) -> u64 {
        self.exits
    }

    pub(crate) fn spawn_failures(&self) -> u64 {
        self.spawn_failures
    }

    /// Exited -> Starting. Returns the generation to spawn, or `None` if a
    /// worker is already starting or running.
    pub(crate) fn begin_start(&mut self) -> Option<Generation> {
        if self.state != WorkerState::Exited {
            return None;
        }
        self.generation = Generation(self.generation.0 + 1);
        self.state = WorkerState::Starting;
        self.writable = false;
        Some(self.generation)
    }

    /// Starting -> Running for the current generation.
    pub(crate) fn mark_running(&mut self, generation: Generation) -> bool {
        if !self.is_current(generation) || self.state != WorkerState::Starting {
            return false;
        }
        self.state = WorkerState::Running;
        self.writable = true;
        true
    }

    /// Starting -> Exited after a failed spawn.
    pub(crate) fn mark_spawn_failed(&mut self, generation: Generation) -> bool {
        if !self.is_current(generation) || self.state != WorkerState::Starting {
            return false;
        }
        self.state = WorkerState::Exited;
        self.writable = false;
        self.spawn_failures += 1;
        true
    }

    /// Running -> Exited. Only the first exit of the current generation
    /// counts; duplicates and stale generations return `false`.
    pub(crate) fn mark_exited(&mut self, generation: Generation) -> bool {
        if !self.is_current(generation) || self.state != WorkerState::Running {
            return false;
        }
        self.state = WorkerState::Exited;
        self.writable = false;
        self.exits += 1;
        true
    }

    /// Stop dispatching to the current worker after its stdin failed.
    pub(crate) fn mark_unwritable(&mut self, generation: Generation) {
        if self.is_current(generation) {
            self.writable = false;
        }
    }

    /// Whether a command may be written right now.
    pub(crate) fn can_dispatch(&self) -> bool {
        self.state == WorkerState::Running && self.writable
    }

    pub(crate) fn is_current(&self, generation: Generation) -> bool {
        self.generation == generation
    }
}
