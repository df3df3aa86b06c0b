//! Session status state machine.

use serde::{Deserialize, Serialize};

/// Coarse, externally visible status of the current session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Error,
}

impl SessionStatus {
    /// Whether a worker is expected to be alive in this status.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }

    /// Whether moving from `self` to `to` is allowed.
    ///
    /// `Idle -> Error` covers a spawn failure during `start`.
    #[must_use]
    pub fn can_transition(self, to: Self) -> bool {
        use SessionStatus::{Error, Idle, Paused, Running};
        matches!(
            (self, to),
            (Idle, Running | Error)
                | (Running, Paused | Error | Idle)
                | (Paused, Running | Error | Idle)
                | (Error, Idle)
        )
    }
}

/// Holds the status and only accepts valid transitions.
#[derive(Debug, Clone, Default)]
pub struct StatusMachine {
    status: SessionStatus,
}

impl StatusMachine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Move to `to` if the transition is valid.
    ///
    /// Invalid transitions are ignored and reported as `false`.
    pub fn transition(&mut self, to: SessionStatus) -> bool {
        if !self.status.can_transition(to) {
            tracing::trace!(from = ?self.status, to = ?to, "Ignoring invalid status transition");
            return false;
        }
        tracing::debug!(from = ?self.status, to = ?to, "Status transition");
        self.status = to;
        true
    }
}
