//! Events sent to the UI and commands received from it.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::progress::ProgressSnapshot;
use crate::supervisor::{Quality, StartRequest};

/// Events emitted towards the UI, serialized with an `event` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum UiEvent {
    /// A worker was spawned for a new session.
    JobStarted {
        session_id: Uuid,
        url: String,
        quality: Quality,
        destination: PathBuf,
    },
    /// A non-empty line of worker output, verbatim.
    Output { line: String },
    /// The progress snapshot after an applied update.
    Progress { snapshot: ProgressSnapshot },
    /// The worker confirmed a pause.
    Paused,
    /// A pause was requested locally; the worker has not confirmed yet.
    PausedImmediate,
    /// The worker confirmed a resume.
    Resumed,
    /// A resume was requested locally; the worker has not confirmed yet.
    ResumedImmediate,
    /// The job finished successfully.
    Completed { filename: String },
    /// The job was cancelled and the worker released.
    Cancelled,
    /// The job failed.
    Error { message: String },
    /// A UI request was refused without any state change.
    Rejected { reason: String },
}

impl UiEvent {
    /// Returns true for events that end a job.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Cancelled | Self::Error { .. }
        )
    }

    /// Wire name of the event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::JobStarted { .. } => "job-started",
            Self::Output { .. } => "output",
            Self::Progress { .. } => "progress",
            Self::Paused => "paused",
            Self::PausedImmediate => "paused-immediate",
            Self::Resumed => "resumed",
            Self::ResumedImmediate => "resumed-immediate",
            Self::Completed { .. } => "completed",
            Self::Cancelled => "cancelled",
            Self::Error { .. } => "error",
            Self::Rejected { .. } => "rejected",
        }
    }
}

/// Requests accepted from the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum UiCommand {
    Start(StartRequest),
    Pause,
    Resume,
    Cancel,
    /// Acknowledge an error and return to idle.
    Reset,
    /// Cancel any active job and stop the run loop.
    Shutdown,
}

/// Error returned when a typed control word is not recognised.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("Unknown command: {0}")]
pub struct UnknownCommand(pub String);

impl FromStr for UiCommand {
    type Err = UnknownCommand;

    /// Parse a bare control word as typed on a terminal.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pause" | "p" => Ok(Self::Pause),
            "resume" | "r" => Ok(Self::Resume),
            "cancel" | "c" => Ok(Self::Cancel),
            "reset" => Ok(Self::Reset),
            "quit" | "exit" | "q" => Ok(Self::Shutdown),
            other => Err(UnknownCommand(other.to_string())),
        }
    }
}
