//! Worker process spawning and stdio plumbing.
//!
//! A `WorkerProcess` is one generation of the external worker. Spawning it
//! starts two background tasks:
//!
//! - the stdout task feeds raw reads through a `LineFramer`, forwards each
//!   line to the bus, and forwards exactly one `Exited` event once the
//!   process is reaped. The process may exit while a leftover child still
//!   holds stdout open, so the task waits on the process and the pipe
//!   together; after an exit it drains whatever output is already buffered
//!   for at most `EXIT_DRAIN`. Lines always precede the exit event on the
//!   channel, so a final answer printed just before a crash still reaches
//!   its caller.
//! - the stderr task logs each stderr line. It never touches a waiter.
//!
//! Commands are written to stdin by the bus actor through `write_line`.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::framer::LineFramer;
use super::supervisor::Generation;
use crate::config::WorkerConfig;
use crate::error::BusError;

const READ_CHUNK_SIZE: usize = 8 * 1024;
const EXIT_DRAIN: Duration = Duration::from_millis(100);

/// Output of a worker generation, delivered to the bus actor.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum WorkerEvent {
    Line { generation: Generation, line: String },
    Exited { generation: Generation, code: Option<i32> },
}

/// How to stop a worker.
#[derive(Debug, Clone, Copy)]
enum Termination {
    /// Kill immediately.
    Kill,
    /// Close stdin, then SIGTERM (Unix), then kill, spread over `grace`.
    Graceful { grace: Duration },
}

/// One spawned generation of the worker.
pub(crate) struct WorkerProcess {
    generation: Generation,
    pid: Option<u32>,
    stdin: Option<ChildStdin>,
    terminate_tx: Option<oneshot::Sender<Termination>>,
    stdout_task: JoinHandle<()>,
    /// Held so the stderr task stays associated with this generation.
    _stderr_task: JoinHandle<()>,
}

impl std::fmt::Debug for WorkerProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerProcess")
            .field("generation", &self.generation)
            .field("pid", &self.pid)
            .field("stdin_open", &self.stdin.is_some())
            .finish()
    }
}

impl WorkerProcess {
    /// Spawn the worker with piped stdio.
    ///
    /// Must be called from within a tokio runtime. The child is killed if
    /// this handle is dropped while it is still running.
    pub(crate) fn spawn(
        config: &WorkerConfig,
        generation: Generation,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Result<Self, BusError> {
        let mut child = Command::new(&config.program)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BusError::spawn_failure(&config.program, e))?;

        let pid = child.id();
        let stdin = child.stdin.take().ok_or_else(|| missing_pipe(config, "stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| missing_pipe(config, "stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| missing_pipe(config, "stderr"))?;

        log::info!(
            target: "stockbridge::worker",
            "Spawned worker {} (pid {:?}): {} {}",
            generation,
            pid,
            config.program.display(),
            config.args.join(" ")
        );

        let (terminate_tx, terminate_rx) = oneshot::channel();
        let stdout_task = tokio::spawn(stdout_loop(
            child,
            pid,
            stdout,
            generation,
            events,
            terminate_rx,
        ));
        let stderr_task = tokio::spawn(stderr_loop(stderr, generation));

        Ok(Self {
            generation,
            pid,
            stdin: Some(stdin),
            terminate_tx: Some(terminate_tx),
            stdout_task,
            _stderr_task: stderr_task,
        })
    }

    pub(crate) fn generation(&self) -> Generation {
        self.generation
    }

    /// Write one command line (a newline is appended) and flush.
    pub(crate) async fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        let stdin = self.stdin.as_mut().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "worker stdin is closed")
        })?;
        let mut framed = Vec::with_capacity(line.len() + 1);
        framed.extend_from_slice(line.as_bytes());
        framed.push(b'\n');
        stdin.write_all(&framed).await?;
        stdin.flush().await
    }

    /// Kill the worker without waiting. The exit event follows as usual.
    pub(crate) fn kill(&mut self) {
        self.stdin = None;
        if let Some(tx) = self.terminate_tx.take() {
            let _ = tx.send(Termination::Kill);
        }
    }

    /// Close stdin, signal the worker, and wait until it has exited (killing
    /// it once `grace` elapses).
    pub(crate) async fn shutdown(mut self, grace: Duration) {
        self.stdin = None;
        if let Some(tx) = self.terminate_tx.take() {
            let _ = tx.send(Termination::Graceful { grace });
        }
        // The stdout task finishes once the process is reaped.
        let bound = grace + Duration::from_secs(1);
        if tokio::time::timeout(bound, &mut self.stdout_task).await.is_err() {
            log::warn!(
                target: "stockbridge::worker",
                "Worker {} (pid {:?}) did not finish within {:?}",
                self.generation,
                self.pid,
                bound
            );
            self.stdout_task.abort();
        }
    }
}

fn missing_pipe(config: &WorkerConfig, name: &str) -> BusError {
    BusError::spawn_failure(
        &config.program,
        std::io::Error::other(format!("failed to capture worker {name}")),
    )
}

/// Read stdout until EOF, process exit or a termination request, then reap
/// the process and report its exit.
async fn stdout_loop(
    mut child: Child,
    pid: Option<u32>,
    mut stdout: ChildStdout,
    generation: Generation,
    events: mpsc::UnboundedSender<WorkerEvent>,
    mut terminate_rx: oneshot::Receiver<Termination>,
) {
    let mut framer = LineFramer::new();
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    let mut termination: Option<Termination> = None;
    let mut exited: Option<std::io::Result<std::process::ExitStatus>> = None;

    loop {
        tokio::select! {
            biased;

            // A dropped sender means the handle is gone; stop the worker.
            requested = &mut terminate_rx => {
                termination = Some(requested.unwrap_or(Termination::Kill));
                break;
            }
            read = stdout.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => forward_lines(&mut framer, &buf[..n], generation, &events),
                Err(e) => {
                    log::warn!(
                        target: "stockbridge::worker",
                        "Worker {} stdout read error: {}",
                        generation,
                        e
                    );
                    break;
                }
            },
            status = child.wait() => {
                exited = Some(status);
                break;
            }
        }
    }

    if exited.is_some() {
        drain_after_exit(&mut stdout, &mut framer, &mut buf, generation, &events).await;
    }

    if let Some(tail) = framer.take_pending() {
        log::warn!(
            target: "stockbridge::worker",
            "Worker {} stopped mid-line, discarding: {}",
            generation,
            tail
        );
    }

    let status = match (exited, termination) {
        (Some(status), _) => status,
        (None, Some(mode)) => terminate(&mut child, pid, generation, mode).await,
        // stdout closed on its own; a termination request may still arrive
        // while the process lingers.
        (None, None) => tokio::select! {
            status = child.wait() => status,
            requested = &mut terminate_rx => {
                let mode = requested.unwrap_or(Termination::Kill);
                terminate(&mut child, pid, generation, mode).await
            }
        },
    };
    report_exit(status, generation, &events);
}

fn forward_lines(
    framer: &mut LineFramer,
    chunk: &[u8],
    generation: Generation,
    events: &mpsc::UnboundedSender<WorkerEvent>,
) {
    for line in framer.feed(chunk) {
        log::debug!(
            target: "stockbridge::worker",
            "Worker {} output: {}",
            generation,
            line
        );
        let _ = events.send(WorkerEvent::Line { generation, line });
    }
}

/// Read output the exited process left in the pipe. Stops at EOF, on error,
/// or once `EXIT_DRAIN` has passed (a surviving grandchild may keep the
/// pipe open indefinitely).
async fn drain_after_exit(
    stdout: &mut ChildStdout,
    framer: &mut LineFramer,
    buf: &mut [u8],
    generation: Generation,
    events: &mpsc::UnboundedSender<WorkerEvent>,
) {
    let deadline = tokio::time::Instant::now() + EXIT_DRAIN;
    loop {
        match tokio::time::timeout_at(deadline, stdout.read(buf)).await {
            Ok(Ok(0)) | Ok(Err(_)) => return,
            Ok(Ok(n)) => forward_lines(framer, &buf[..n], generation, events),
            Err(_) => {
                log::debug!(
                    target: "stockbridge::worker",
                    "Worker {} exited but its stdout is still open",
                    generation
                );
                return;
            }
        }
    }
}

/// Stop the child and reap it.
///
/// Graceful termination relies on stdin already being closed (the worker
/// exits on EOF), escalates to SIGTERM after half the grace period and to a
/// kill after the other half.
async fn terminate(
    child: &mut Child,
    pid: Option<u32>,
    generation: Generation,
    mode: Termination,
) -> std::io::Result<std::process::ExitStatus> {
    let grace = match mode {
        Termination::Kill => {
            let _ = child.start_kill();
            return child.wait().await;
        }
        Termination::Graceful { grace } => grace,
    };

    let half = grace / 2;
    if let Ok(status) = tokio::time::timeout(half, child.wait()).await {
        return status;
    }
    send_sigterm(pid);
    if let Ok(status) = tokio::time::timeout(half, child.wait()).await {
        return status;
    }
    log::warn!(
        target: "stockbridge::worker",
        "Worker {} ignored termination for {:?}, killing",
        generation,
        grace
    );
    let _ = child.start_kill();
    child.wait().await
}

#[cfg(unix)]
fn send_sigterm(pid: Option<u32>) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        log::debug!(
            target: "stockbridge::worker",
            "SIGTERM to pid {} failed: {}",
            pid,
            e
        );
    }
}

#[cfg(not(unix))]
fn send_sigterm(_pid: Option<u32>) {
    // No SIGTERM equivalent; the kill after the grace period covers it.
}

fn report_exit(
    status: std::io::Result<std::process::ExitStatus>,
    generation: Generation,
    events: &mpsc::UnboundedSender<WorkerEvent>,
) {
    let code = match status {
        Ok(status) => {
            log::info!(
                target: "stockbridge::worker",
                "Worker {} exited: {}",
                generation,
                status
            );
            status.code()
        }
        Err(e) => {
            log::warn!(
                target: "stockbridge::worker",
                "Failed to reap worker {}: {}",
                generation,
                e
            );
            None
        }
    };
    let _ = events.send(WorkerEvent::Exited { generation, code });
}

/// Surface worker stderr as diagnostics only.
async fn stderr_loop(stderr: ChildStderr, generation: Generation) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if !line.trim().is_empty() {
                    log::warn!(
                        target: "stockbridge::worker::stderr",
                        "[worker {}] {}",
                        generation,
                        line
                    );
                }
            }
            Ok(None) => break,
            Err(e) => {
                log::debug!(
                    target: "stockbridge::worker::stderr",
                    "Worker {} stderr read error: {}",
                    generation,
                    e
                );
                break;
            }
        }
    }
}
