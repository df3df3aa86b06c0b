//! Supervisor owning the single worker process of a session.
//!
//! Connects the worker's output streams to the progress interpreter,
//! applies UI control requests and reports everything through a
//! [`Notifier`].

use std::path::PathBuf;
use std::time::Instant;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::ClipfetchConfig;
use crate::notify::{Notifier, UiCommand, UiEvent};
use crate::progress::{Phase, ProgressInterpreter, ProgressSnapshot, Signal};
use crate::supervisor::{Session, SessionStatus, StartRequest, StatusMachine};
use crate::worker::{
    ControlToken, ExitOutcome, LaunchTiming, SpawnError, StreamKind, WorkerCommand, WorkerEvent,
    WorkerHandle, WorkerMessage,
};

/// Error type for supervisor operations.
#[derive(thiserror::Error, Debug)]
pub enum SupervisorError {
    /// A worker is already active for this supervisor.
    #[error("Download already in progress")]
    AlreadyRunning,
    /// The start request failed validation.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    /// The destination folder could not be created.
    #[error("Failed to create destination {path}: {source}")]
    Destination {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The worker could not be launched.
    #[error("Failed to start worker: {0}")]
    Spawn(#[from] SpawnError),
}

/// How the most recent job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Cancelled,
    Failed { message: String },
}

/// Supervises one worker at a time.
///
/// All state is owned here and mutated only from the task driving
/// [`Supervisor::run`] (or the caller's own loop around
/// [`Supervisor::handle_message`]).
pub struct Supervisor<N: Notifier> {
    config: ClipfetchConfig,
    notifier: N,
    status: StatusMachine,
    session: Option<Session>,
    worker: Option<WorkerHandle>,
    interpreter: ProgressInterpreter,
    generation: u64,
    events_tx: UnboundedSender<WorkerMessage>,
    events_rx: UnboundedReceiver<WorkerMessage>,
    releases: Vec<JoinHandle<bool>>,
    last_outcome: Option<JobOutcome>,
}

impl<N: Notifier> Supervisor<N> {
    #[must_use]
    pub fn new(config: ClipfetchConfig, notifier: N) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let interpreter = ProgressInterpreter::new(config.timing.pause_debounce());
        Self {
            config,
            notifier,
            status: StatusMachine::new(),
            session: None,
            worker: None,
            interpreter,
            generation: 0,
            events_tx,
            events_rx,
            releases: Vec::new(),
            last_outcome: None,
        }
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status.status()
    }

    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    #[must_use]
    pub fn snapshot(&self) -> &ProgressSnapshot {
        self.interpreter.snapshot()
    }

    #[must_use]
    pub fn has_worker(&self) -> bool {
        self.worker.is_some()
    }

    #[must_use]
    pub fn worker_pid(&self) -> Option<u32> {
        self.worker.as_ref().and_then(WorkerHandle::pid)
    }

    #[must_use]
    pub fn last_outcome(&self) -> Option<&JobOutcome> {
        self.last_outcome.as_ref()
    }

    /// Start a job.
    ///
    /// A supervisor left in `Error` is reset first.
    ///
    /// # Errors
    ///
    /// - `AlreadyRunning` if a worker exists; nothing changes.
    /// - `InvalidRequest` / `Destination` if the request cannot be used;
    ///   nothing changes.
    /// - `Spawn` if the worker fails to launch; status becomes `Error` and
    ///   an error event is emitted.
    pub fn start(&mut self, request: StartRequest) -> Result<Uuid, SupervisorError> {
        if self.worker.is_some() {
            tracing::warn!(url = %request.url, "Rejecting start, worker already active");
            return Err(SupervisorError::AlreadyRunning);
        }
        request.validate().map_err(SupervisorError::InvalidRequest)?;
        std::fs::create_dir_all(&request.destination).map_err(|source| {
            SupervisorError::Destination {
                path: request.destination.clone(),
                source,
            }
        })?;

        if self.status() == SessionStatus::Error {
            self.reset();
        }

        let session = Session::new(&request);
        let command = WorkerCommand::from_config(&self.config.worker)
            .job(
                &session.url,
                session.quality.as_str(),
                &session.destination.to_string_lossy(),
            )
            .tools(&self.config.tools);
        let timing = LaunchTiming {
            terminate_timeout: self.config.timing.terminate_timeout(),
            stream_drain: self.config.timing.stream_drain(),
        };

        self.generation += 1;
        self.interpreter.reset();
        self.last_outcome = None;

        let worker =
            match WorkerHandle::launch(&command, self.generation, self.events_tx.clone(), timing) {
                Ok(worker) => worker,
                Err(e) => {
                    tracing::error!(error = %e, "Worker spawn failed");
                    let message = e.to_string();
                    self.interpreter.mark_failed();
                    self.status.transition(SessionStatus::Error);
                    self.last_outcome = Some(JobOutcome::Failed {
                        message: message.clone(),
                    });
                    self.emit(UiEvent::Error { message });
                    return Err(e.into());
                }
            };

        tracing::info!(
            session_id = %session.id,
            url = %session.url,
            quality = %session.quality,
            destination = %session.destination.display(),
            pid = ?worker.pid(),
            "Job started"
        );

        let id = session.id;
        self.emit(UiEvent::JobStarted {
            session_id: id,
            url: session.url.clone(),
            quality: session.quality,
            destination: session.destination.clone(),
        });
        self.worker = Some(worker);
        self.session = Some(session);
        self.status.transition(SessionStatus::Running);
        Ok(id)
    }

    /// Ask the worker to pause. No-op unless running.
    ///
    /// Status moves to `Paused` before the worker confirms. A finished job
    /// is already `Idle`, so pausing it is a no-op too.
    pub fn pause(&mut self) -> bool {
        if self.status() != SessionStatus::Running {
            return false;
        }
        let Some(worker) = &self.worker else {
            return false;
        };
        if !worker.send(ControlToken::Pause) {
            tracing::warn!("Worker input closed, pause not delivered");
        }
        self.interpreter.request_pause(Instant::now());
        self.status.transition(SessionStatus::Paused);
        self.emit(UiEvent::PausedImmediate);
        true
    }

    /// Ask the worker to resume. No-op unless paused.
    pub fn resume(&mut self) -> bool {
        if self.status() != SessionStatus::Paused {
            return false;
        }
        let Some(worker) = &self.worker else {
            return false;
        };
        if !worker.send(ControlToken::Resume) {
            tracing::warn!("Worker input closed, resume not delivered");
        }
        self.interpreter.request_resume();
        self.status.transition(SessionStatus::Running);
        self.emit(UiEvent::ResumedImmediate);
        true
    }

    /// Cancel the active job. No-op without a worker.
    ///
    /// The worker handle is released at once and status becomes `Idle`;
    /// termination is forced in the background if the worker ignores the
    /// cancel token for longer than the grace period. A job that already
    /// finished keeps its `Completed` outcome.
    pub fn cancel(&mut self) -> bool {
        let Some(worker) = self.worker.take() else {
            return false;
        };
        tracing::info!(generation = worker.generation(), pid = ?worker.pid(), "Cancelling job");
        self.release(worker);

        let completed = self.is_completed();
        self.interpreter.request_resume();
        self.status.transition(SessionStatus::Idle);
        self.session = None;
        if !completed {
            self.last_outcome = Some(JobOutcome::Cancelled);
            self.emit(UiEvent::Cancelled);
        }
        true
    }

    /// Acknowledge an error: `Error -> Idle`, clearing the snapshot.
    pub fn reset(&mut self) -> bool {
        if self.status() != SessionStatus::Error || self.worker.is_some() {
            return false;
        }
        self.status.transition(SessionStatus::Idle);
        self.interpreter.reset();
        self.session = None;
        true
    }

    /// Wait for every released worker to be gone.
    ///
    /// Returns how many of them had to be terminated forcibly.
    pub async fn wait_released(&mut self) -> usize {
        let mut forced = 0;
        for release in self.releases.drain(..) {
            if matches!(release.await, Ok(true)) {
                forced += 1;
            }
        }
        forced
    }

    /// Handle one message from a worker.
    ///
    /// Messages from any worker other than the current one are dropped.
    pub fn handle_message(&mut self, message: WorkerMessage) {
        let current = self.worker.as_ref().map(WorkerHandle::generation);
        if current != Some(message.generation) {
            tracing::trace!(
                generation = message.generation,
                current = ?current,
                "Dropping message from released worker"
            );
            return;
        }

        match message.event {
            WorkerEvent::Line {
                stream: StreamKind::Stdout,
                line,
            } => self.handle_output(line),
            WorkerEvent::Line {
                stream: StreamKind::Stderr,
                line,
            } => self.handle_error_output(&line),
            WorkerEvent::StreamFailed { stream, error } => {
                self.fail(format!("Failed to read worker {stream}: {error}"));
            }
            WorkerEvent::Exited(outcome) => self.handle_exit(outcome),
            WorkerEvent::WaitFailed(error) => {
                self.fail(format!("Failed to wait for worker: {error}"));
            }
        }
    }

    /// Wait for the next worker message and handle it.
    pub async fn step(&mut self) {
        if let Some(message) = self.events_rx.recv().await {
            self.handle_message(message);
        }
    }

    /// Apply a UI command. Returns false when the run loop should stop.
    pub fn handle_command(&mut self, command: UiCommand) -> bool {
        tracing::debug!(?command, "UI command");
        match command {
            UiCommand::Start(request) => match self.start(request) {
                Ok(_) | Err(SupervisorError::Spawn(_)) => {}
                Err(e) => self.emit(UiEvent::Rejected {
                    reason: e.to_string(),
                }),
            },
            UiCommand::Pause => {
                self.pause();
            }
            UiCommand::Resume => {
                self.resume();
            }
            UiCommand::Cancel => {
                self.cancel();
            }
            UiCommand::Reset => {
                self.reset();
            }
            UiCommand::Shutdown => {
                self.cancel();
                return false;
            }
        }
        true
    }

    /// Serve UI commands and worker output until shutdown or until the
    /// command channel closes.
    pub async fn run(&mut self, mut commands: UnboundedReceiver<UiCommand>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command) {
                            break;
                        }
                    }
                    None => {
                        self.cancel();
                        break;
                    }
                },
                Some(message) = self.events_rx.recv() => self.handle_message(message),
            }
        }
        tracing::info!("Supervisor stopped");
    }

    /// Run a single job to its end while serving UI commands.
    ///
    /// Returns once the worker has been released, whether it completed,
    /// failed or was cancelled. A closed command channel leaves the job
    /// running to completion.
    ///
    /// # Errors
    ///
    /// Returns the `start` error if the job could not be started.
    pub async fn run_job(
        &mut self,
        request: StartRequest,
        commands: &mut UnboundedReceiver<UiCommand>,
    ) -> Result<JobOutcome, SupervisorError> {
        self.start(request)?;
        let mut commands_open = true;

        while self.worker.is_some() {
            tokio::select! {
                command = commands.recv(), if commands_open => match command {
                    Some(command) => {
                        if !self.handle_command(command) {
                            break;
                        }
                    }
                    None => commands_open = false,
                },
                Some(message) = self.events_rx.recv() => self.handle_message(message),
            }
        }

        Ok(self
            .last_outcome
            .clone()
            .unwrap_or(JobOutcome::Cancelled))
    }

    fn handle_output(&mut self, line: String) {
        if line.trim().is_empty() {
            return;
        }
        let update = self.interpreter.observe(&line, Instant::now());
        self.emit(UiEvent::Output { line });
        let Some(update) = update else {
            return;
        };

        match update.signal {
            Some(Signal::Paused) => {
                self.status.transition(SessionStatus::Paused);
                self.emit(UiEvent::Paused);
            }
            Some(Signal::Resumed) => {
                self.status.transition(SessionStatus::Running);
                self.emit(UiEvent::Resumed);
            }
            _ => {}
        }

        self.emit(UiEvent::Progress {
            snapshot: self.interpreter.snapshot().clone(),
        });

        if update.phase == Some(Phase::Finished) {
            self.complete();
            self.interpreter.request_resume();
            self.status.transition(SessionStatus::Idle);
        }
    }

    fn handle_error_output(&mut self, line: &str) {
        let text = line.trim();
        if text.is_empty() {
            return;
        }
        if self.config.errors.stderr_is_fatal && !self.is_completed() {
            self.fail(text.to_string());
        } else {
            tracing::warn!(line = text, "Worker error output");
        }
    }

    fn handle_exit(&mut self, outcome: ExitOutcome) {
        let paused = self.status() == SessionStatus::Paused;
        if self.is_completed() {
            if !outcome.success() {
                tracing::warn!(exit = %outcome.describe(), "Worker exited abnormally after finishing");
            }
        } else if !outcome.success() && !paused {
            self.fail(outcome.describe());
            return;
        } else if outcome.success() && !paused {
            self.complete();
        } else {
            tracing::info!(exit = %outcome.describe(), "Worker exited while paused, treating as cancelled");
            self.last_outcome = Some(JobOutcome::Cancelled);
        }

        self.worker = None;
        self.interpreter.request_resume();
        self.status.transition(SessionStatus::Idle);
        self.session = None;
    }

    fn is_completed(&self) -> bool {
        self.session.as_ref().is_some_and(|session| session.completed)
    }

    /// Report `completed` once per session.
    fn complete(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.completed {
            return;
        }
        session.completed = true;
        tracing::info!(
            session_id = %session.id,
            elapsed_ms = session.elapsed().num_milliseconds(),
            "Job completed"
        );
        self.last_outcome = Some(JobOutcome::Completed);
        self.emit(UiEvent::Completed {
            filename: self.interpreter.snapshot().filename.clone(),
        });
    }

    /// Release the worker and enter `Error`.
    fn fail(&mut self, message: String) {
        tracing::error!(%message, "Job failed");
        if let Some(worker) = self.worker.take() {
            if !worker.has_exited() {
                self.release(worker);
            }
        }
        self.interpreter.mark_failed();
        self.status.transition(SessionStatus::Error);
        self.session = None;
        self.last_outcome = Some(JobOutcome::Failed {
            message: message.clone(),
        });
        self.emit(UiEvent::Error { message });
    }

    fn release(&mut self, worker: WorkerHandle) {
        self.releases.retain(|release| !release.is_finished());
        self.releases
            .push(worker.abandon(self.config.timing.cancel_grace()));
    }

    fn emit(&self, event: UiEvent) {
        let name = event.name();
        if let Err(e) = self.notifier.notify(event) {
            tracing::warn!(event = name, error = %e, "Failed to deliver event");
        }
    }
}
