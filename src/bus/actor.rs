//! The task that owns all bus state.
//!
//! Submissions, status queries, worker output, worker exits and the respawn
//! timer are all funnelled into one `select!` loop, so the scheduler is only
//! ever touched from this task and needs no locking.

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::command::Command;
use super::scheduler::{BusStatus, Effect, Scheduler};
use super::supervisor::WorkerState;
use super::worker::{WorkerEvent, WorkerProcess};
use crate::config::WorkerConfig;
use crate::error::{BusError, BusResult};

/// Message from a `CommandBus` handle to the actor.
#[derive(Debug)]
pub(crate) enum Request {
    Submit(Command),
    Status(oneshot::Sender<BusStatus>),
    /// Answered once the next spawn attempt succeeds or fails, or at once
    /// if a worker is already running.
    WorkerReady(oneshot::Sender<BusResult<()>>),
}

pub(crate) struct BusActor {
    scheduler: Scheduler,
    config: WorkerConfig,
    worker: Option<WorkerProcess>,
    worker_tx: mpsc::UnboundedSender<WorkerEvent>,
    worker_rx: mpsc::UnboundedReceiver<WorkerEvent>,
    requests: mpsc::UnboundedReceiver<Request>,
    respawn_at: Option<Instant>,
    ready_waiters: Vec<oneshot::Sender<BusResult<()>>>,
    cancel: CancellationToken,
}

impl BusActor {
    pub(crate) fn new(
        config: WorkerConfig,
        requests: mpsc::UnboundedReceiver<Request>,
        cancel: CancellationToken,
    ) -> Self {
        let (worker_tx, worker_rx) = mpsc::unbounded_channel();
        Self {
            scheduler: Scheduler::new(config.respawn_delay()),
            config,
            worker: None,
            worker_tx,
            worker_rx,
            requests,
            respawn_at: None,
            ready_waiters: Vec::new(),
            cancel,
        }
    }

    pub(crate) async fn run(mut self) {
        let first = self.scheduler.start();
        self.apply(first).await;

        loop {
            let respawn_at = self.respawn_at;
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    debug!(target: "stockbridge::bus", "Bus cancelled");
                    break;
                }

                // Worker output before new submissions: a queued command must
                // never overtake the response it is waiting behind.
                Some(event) = self.worker_rx.recv() => {
                    self.on_worker_event(event).await;
                }

                _ = tokio::time::sleep_until(respawn_at.unwrap_or_else(Instant::now)),
                    if respawn_at.is_some() =>
                {
                    self.respawn_at = None;
                    let effect = self.scheduler.on_respawn_due();
                    self.apply(effect).await;
                }

                request = self.requests.recv() => match request {
                    Some(request) => self.on_request(request).await,
                    None => {
                        debug!(target: "stockbridge::bus", "All bus handles dropped");
                        break;
                    }
                },
            }
        }

        self.shutdown().await;
    }

    async fn on_request(&mut self, request: Request) {
        match request {
            Request::Submit(command) => {
                let effect = self.scheduler.submit(command);
                self.apply(effect).await;
            }
            Request::Status(reply) => {
                let _ = reply.send(self.scheduler.status());
            }
            Request::WorkerReady(reply) => {
                if self.scheduler.status().state == WorkerState::Running {
                    let _ = reply.send(Ok(()));
                } else {
                    self.ready_waiters.push(reply);
                }
            }
        }
    }

    async fn on_worker_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Line { generation, line } => {
                let effect = self.scheduler.on_line(generation, &line);
                self.apply(effect).await;
            }
            WorkerEvent::Exited { generation, code } => {
                if self
                    .worker
                    .as_ref()
                    .is_some_and(|w| w.generation() == generation)
                {
                    self.worker = None;
                }
                match code {
                    Some(0) => info!(
                        target: "stockbridge::bus::supervisor",
                        "Worker {} exited",
                        generation
                    ),
                    Some(code) => warn!(
                        target: "stockbridge::bus::supervisor",
                        "Worker {} exited with code {}",
                        generation,
                        code
                    ),
                    None => warn!(
                        target: "stockbridge::bus::supervisor",
                        "Worker {} terminated by signal",
                        generation
                    ),
                }
                let effect = self.scheduler.on_exit(generation, code);
                self.apply(effect).await;
            }
        }
    }

    /// Execute an effect and every effect it leads to.
    async fn apply(&mut self, effect: Option<Effect>) {
        let mut next = effect;
        while let Some(effect) = next.take() {
            next = self.execute(effect).await;
        }
    }

    async fn execute(&mut self, effect: Effect) -> Option<Effect> {
        match effect {
            Effect::Spawn(generation) => {
                match WorkerProcess::spawn(&self.config, generation, self.worker_tx.clone()) {
                    Ok(worker) => {
                        self.worker = Some(worker);
                        for waiter in self.ready_waiters.drain(..) {
                            let _ = waiter.send(Ok(()));
                        }
                        self.scheduler.on_spawned(generation)
                    }
                    Err(e) => {
                        error!(
                            target: "stockbridge::bus::supervisor",
                            "Worker {} failed to start: {}",
                            generation,
                            e
                        );
                        self.notify_spawn_failed(&e);
                        self.scheduler.on_spawn_failed(generation)
                    }
                }
            }
            Effect::Write {
                generation,
                id,
                line,
            } => {
                let Some(worker) = self
                    .worker
                    .as_mut()
                    .filter(|w| w.generation() == generation)
                else {
                    let gone = std::io::Error::new(
                        std::io::ErrorKind::BrokenPipe,
                        "worker is not running",
                    );
                    return self.scheduler.on_write_failed(generation, id, gone);
                };
                debug!(
                    target: "stockbridge::bus",
                    "Sending command {} to worker {}: {}",
                    id,
                    generation,
                    line
                );
                match worker.write_line(&line).await {
                    Ok(()) => None,
                    Err(e) => {
                        warn!(
                            target: "stockbridge::bus",
                            "Failed to write command {} to worker {}: {}",
                            id,
                            generation,
                            e
                        );
                        self.scheduler.on_write_failed(generation, id, e)
                    }
                }
            }
            Effect::ScheduleRespawn(delay) => {
                info!(
                    target: "stockbridge::bus::supervisor",
                    "Respawning worker in {:?}",
                    delay
                );
                self.respawn_at = Some(Instant::now() + delay);
                None
            }
            Effect::Terminate(generation) => {
                if let Some(worker) = self
                    .worker
                    .as_mut()
                    .filter(|w| w.generation() == generation)
                {
                    worker.kill();
                }
                None
            }
        }
    }

    /// `BusError` is not `Clone`; each waiter gets its own copy of the cause.
    fn notify_spawn_failed(&mut self, error: &BusError) {
        let (kind, message) = match error {
            BusError::SpawnFailure { source, .. } => (source.kind(), source.to_string()),
            other => (std::io::ErrorKind::Other, other.to_string()),
        };
        for waiter in self.ready_waiters.drain(..) {
            let source = std::io::Error::new(kind, message.clone());
            let _ = waiter.send(Err(BusError::spawn_failure(&self.config.program, source)));
        }
    }

    async fn shutdown(mut self) {
        self.requests.close();
        let mut rejected = self.scheduler.drain();
        while let Ok(request) = self.requests.try_recv() {
            match request {
                Request::Submit(command) => {
                    command.settle(Err(BusError::ShuttingDown));
                    rejected += 1;
                }
                Request::Status(reply) => {
                    let _ = reply.send(self.scheduler.status());
                }
                Request::WorkerReady(reply) => {
                    let _ = reply.send(Err(BusError::ShuttingDown));
                }
            }
        }
        for waiter in self.ready_waiters.drain(..) {
            let _ = waiter.send(Err(BusError::ShuttingDown));
        }
        info!(
            target: "stockbridge::bus",
            "Command bus stopping, rejected {} pending command(s)",
            rejected
        );

        if let Some(worker) = self.worker.take() {
            worker.shutdown(self.config.kill_grace()).await;
        }
    }
}
