//! I/O-free core of the command bus.
//!
//! The Scheduler owns the three pieces of shared mutable state (the command
//! queue, the in-flight waiter and the worker lifecycle) and is driven by
//! the bus actor one event at a time. Each event returns at most one
//! `Effect` for the actor to carry out, so crash and respawn sequences can
//! be replayed deterministically in tests without real processes or timers.
//!
//! The dispatch step runs after every submission and every settlement:
//! when nothing is in flight and the worker is running and writable, the
//! head of the queue is dequeued, its waiter registered, and a `Write`
//! effect is returned.

use std::time::Duration;

use serde::Serialize;

use super::command::{Command, CommandId};
use super::correlator::{LineOutcome, ResponseCorrelator};
use super::queue::CommandQueue;
use super::supervisor::{Generation, Supervisor, WorkerState};
use crate::error::BusError;

/// Action the actor must perform on behalf of the scheduler.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Effect {
    /// Spawn a worker for this generation and report back via
    /// `on_spawned` / `on_spawn_failed`.
    Spawn(Generation),
    /// Write `line` plus a newline to this generation's stdin and report a
    /// failure via `on_write_failed`.
    Write {
        generation: Generation,
        id: CommandId,
        line: String,
    },
    /// Call `on_respawn_due` after this delay.
    ScheduleRespawn(Duration),
    /// Kill this generation; its exit event follows.
    Terminate(Generation),
}

/// Point-in-time view of the bus, served by the health endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BusStatus {
    pub state: WorkerState,
    pub generation: Generation,
    pub queued: usize,
    pub in_flight: bool,
    pub exits: u64,
    pub spawn_failures: u64,
}

#[derive(Debug)]
pub(crate) struct Scheduler {
    queue: CommandQueue,
    correlator: ResponseCorrelator,
    supervisor: Supervisor,
}

impl Scheduler {
    pub(crate) fn new(respawn_delay: Duration) -> Self {
        Self {
            queue: CommandQueue::new(),
            correlator: ResponseCorrelator::new(),
            supervisor: Supervisor::new(respawn_delay),
        }
    }

    /// Request the first spawn.
    pub(crate) fn start(&mut self) -> Option<Effect> {
        self.supervisor.begin_start().map(Effect::Spawn)
    }

    /// Enqueue a command at the tail and try to dispatch.
    pub(crate) fn submit(&mut self, command: Command) -> Option<Effect> {
        log::debug!(
            target: "stockbridge::bus::scheduler",
            "Queued command {}: {} (queue depth {})",
            command.id(),
            command.line(),
            self.queue.len() + 1
        );
        self.queue.push(command);
        self.dispatch()
    }

    pub(crate) fn on_spawned(&mut self, generation: Generation) -> Option<Effect> {
        if !self.supervisor.mark_running(generation) {
            return None;
        }
        log::info!(
            target: "stockbridge::bus::supervisor",
            "Worker {} running ({} command(s) queued)",
            generation,
            self.queue.len()
        );
        self.dispatch()
    }

    pub(crate) fn on_spawn_failed(&mut self, generation: Generation) -> Option<Effect> {
        if !self.supervisor.mark_spawn_failed(generation) {
            return None;
        }
        Some(Effect::ScheduleRespawn(self.supervisor.respawn_delay()))
    }

    pub(crate) fn on_respawn_due(&mut self) -> Option<Effect> {
        self.supervisor.begin_start().map(Effect::Spawn)
    }

    /// Feed one framed stdout line from `generation`.
    pub(crate) fn on_line(&mut self, generation: Generation, line: &str) -> Option<Effect> {
        if !self.supervisor.is_current(generation) {
            log::debug!(
                target: "stockbridge::bus::scheduler",
                "Ignoring output from stale worker {}: {}",
                generation,
                line
            );
            return None;
        }

        match self.correlator.on_line(line) {
            LineOutcome::Resolved(id) | LineOutcome::Malformed(id) => {
                log::debug!(
                    target: "stockbridge::bus::scheduler",
                    "Command {} settled",
                    id
                );
                self.dispatch()
            }
            LineOutcome::Unsolicited => None,
        }
    }

    /// Worker `generation` exited. Fails the in-flight command; queued
    /// commands stay queued for the next generation.
    pub(crate) fn on_exit(&mut self, generation: Generation, code: Option<i32>) -> Option<Effect> {
        if !self.supervisor.mark_exited(generation) {
            return None;
        }
        if let Some(id) = self.correlator.fail(BusError::worker_crashed(code)) {
            log::warn!(
                target: "stockbridge::bus::supervisor",
                "Worker {} exited with command {} in flight",
                generation,
                id
            );
        }
        Some(Effect::ScheduleRespawn(self.supervisor.respawn_delay()))
    }

    /// Writing command `id` to worker `generation` failed.
    ///
    /// The command is rejected and the worker is treated as unwritable, then
    /// terminated so the normal exit/respawn path takes over. Queued
    /// commands wait for the replacement instead of being tried against the
    /// same broken pipe.
    pub(crate) fn on_write_failed(
        &mut self,
        generation: Generation,
        id: CommandId,
        error: std::io::Error,
    ) -> Option<Effect> {
        if self.correlator.in_flight() == Some(id) {
            self.correlator.fail(BusError::write_failure(error));
        } else {
            log::warn!(
                target: "stockbridge::bus::scheduler",
                "Write failure for command {} which is no longer in flight: {}",
                id,
                error
            );
        }
        if !self.supervisor.is_current(generation) {
            return None;
        }
        self.supervisor.mark_unwritable(generation);
        Some(Effect::Terminate(generation))
    }

    /// Reject everything, in flight first, then the queue in order.
    pub(crate) fn drain(&mut self) -> usize {
        let mut failed = usize::from(self.correlator.fail(BusError::ShuttingDown).is_some());
        for command in self.queue.drain() {
            command.settle(Err(BusError::ShuttingDown));
            failed += 1;
        }
        failed
    }

    pub(crate) fn status(&self) -> BusStatus {
        BusStatus {
            state: self.supervisor.state(),
            generation: self.supervisor.generation(),
            queued: self.queue.len(),
            in_flight: self.correlator.is_awaiting(),
            exits: self.supervisor.exits(),
            spawn_failures: self.supervisor.spawn_failures(),
        }
    }

    fn dispatch(&mut self) -> Option<Effect> {
        if self.correlator.is_awaiting() || !self.supervisor.can_dispatch() {
            return None;
        }
        let command = self.queue.pop_front()?;
        let id = command.id();
        let (line, waiter) = command.into_dispatch();
        if let Err(waiter) = self.correlator.register(waiter) {
            // is_awaiting() was checked above
            waiter.settle(Err(BusError::ShuttingDown));
            return None;
        }
        Some(Effect::Write {
            generation: self.supervisor.generation(),
            id,
            line,
        })
    }
}
