//! Ownership of a launched worker: control queue, exit observer and
//! forced termination.

use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{
    pump_lines, write_controls, ControlToken, ExitOutcome, SpawnError, StreamKind, WorkerCommand,
    WorkerEvent, WorkerMessage, WorkerProcess,
};

/// Timing used by a launched worker's background tasks.
#[derive(Debug, Clone, Copy)]
pub struct LaunchTiming {
    /// SIGTERM to SIGKILL escalation window.
    pub terminate_timeout: Duration,
    /// Maximum wait for the output pumps after the process exits.
    pub stream_drain: Duration,
}

/// Handle to a live worker.
///
/// The child itself is owned by an exit-observer task; this handle only
/// holds the channels needed to talk to it. Dropping the handle closes the
/// worker's stdin but does not kill it, use [`WorkerHandle::abandon`].
#[derive(Debug)]
pub struct WorkerHandle {
    generation: u64,
    pid: Option<u32>,
    control_tx: UnboundedSender<ControlToken>,
    kill: CancellationToken,
    exited: CancellationToken,
}

impl WorkerHandle {
    /// Spawn the worker and wire its pipes.
    ///
    /// Output lines and the final exit are delivered on `events` tagged with
    /// `generation`. The exit event is only sent after both output pumps
    /// have finished (or `stream_drain` elapsed), so no output is reported
    /// after the exit.
    ///
    /// # Errors
    ///
    /// Returns `SpawnError` if the process cannot be started or a pipe is
    /// missing.
    pub fn launch(
        command: &WorkerCommand,
        generation: u64,
        events: UnboundedSender<WorkerMessage>,
        timing: LaunchTiming,
    ) -> Result<Self, SpawnError> {
        let mut process = WorkerProcess::spawn(command)?;

        let stdin = process.take_stdin().ok_or(SpawnError::MissingPipe("stdin"))?;
        let stdout = process
            .take_stdout()
            .ok_or(SpawnError::MissingPipe("stdout"))?;
        let stderr = process
            .take_stderr()
            .ok_or(SpawnError::MissingPipe("stderr"))?;
        let pid = process.id();

        let readers = vec![
            tokio::spawn(pump_lines(
                stdout,
                StreamKind::Stdout,
                generation,
                events.clone(),
            )),
            tokio::spawn(pump_lines(
                stderr,
                StreamKind::Stderr,
                generation,
                events.clone(),
            )),
        ];

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_controls(stdin, control_rx));

        let kill = CancellationToken::new();
        let exited = CancellationToken::new();
        tokio::spawn(observe_exit(
            process,
            generation,
            events,
            readers,
            kill.clone(),
            exited.clone(),
            timing,
        ));

        tracing::info!(?pid, generation, program = command.program(), "Worker spawned");

        Ok(Self {
            generation,
            pid,
            control_tx,
            kill,
            exited,
        })
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Whether the exit observer has seen the process end.
    #[must_use]
    pub fn has_exited(&self) -> bool {
        self.exited.is_cancelled()
    }

    /// Queue a control token for the worker. Never blocks.
    ///
    /// Returns false if the writer has already stopped.
    pub fn send(&self, token: ControlToken) -> bool {
        self.control_tx.send(token).is_ok()
    }

    /// Release the worker: send it a cancel token and force termination if
    /// it has not exited after `grace`.
    ///
    /// The grace timer races the exit observer; whichever completes first
    /// wins. The returned task resolves once the process is gone, to true if
    /// termination was forced.
    pub fn abandon(self, grace: Duration) -> JoinHandle<bool> {
        if !self.send(ControlToken::Cancel) {
            tracing::debug!(generation = self.generation, "Control writer gone before cancel");
        }

        let Self {
            generation,
            kill,
            exited,
            ..
        } = self;

        tokio::spawn(async move {
            tokio::select! {
                () = exited.cancelled() => {
                    tracing::debug!(generation, "Worker exited within grace period");
                    false
                }
                () = tokio::time::sleep(grace) => {
                    tracing::warn!(generation, grace_ms = grace.as_millis(), "Grace period elapsed, forcing termination");
                    kill.cancel();
                    exited.cancelled().await;
                    true
                }
            }
        })
    }
}

async fn observe_exit(
    mut process: WorkerProcess,
    generation: u64,
    events: UnboundedSender<WorkerMessage>,
    readers: Vec<JoinHandle<()>>,
    kill: CancellationToken,
    exited: CancellationToken,
    timing: LaunchTiming,
) {
    let waited = tokio::select! {
        status = process.wait() => Some(status),
        () = kill.cancelled() => None,
    };

    let status = match waited {
        Some(status) => status,
        None => {
            if let Err(e) = process.graceful_terminate(timing.terminate_timeout).await {
                tracing::warn!(generation, error = %e, "Forced termination failed");
            }
            process.wait().await
        }
    };
    exited.cancel();

    for reader in readers {
        if tokio::time::timeout(timing.stream_drain, reader).await.is_err() {
            tracing::warn!(generation, "Output stream did not drain after exit");
        }
    }

    let event = match status {
        Ok(status) => {
            let outcome = ExitOutcome::from(status);
            tracing::info!(generation, code = ?outcome.code, signal = ?outcome.signal, "Worker exited");
            WorkerEvent::Exited(outcome)
        }
        Err(e) => {
            tracing::error!(generation, error = %e, "Failed to wait on worker");
            WorkerEvent::WaitFailed(e.to_string())
        }
    };
    let _ = events.send(WorkerMessage { generation, event });
}
