//! Progress snapshot and partial updates.

use serde::{Deserialize, Serialize};

/// ETA shown while nothing is known.
pub const ETA_UNKNOWN: &str = "N/A";
/// ETA reported once transfer has stopped (merging, finished).
pub const ETA_ZERO: &str = "00:00";
/// Speed reported once transfer has stopped.
pub const SPEED_ZERO: &str = "0 KiB/s";

/// Fine-grained job phase derived from worker output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Waiting,
    Downloading,
    Paused,
    Merging,
    Finished,
    Error,
}

/// Fragment counters for segmented downloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragments {
    pub current: u32,
    pub total: u32,
}

impl Fragments {
    /// Counters with `current` capped at `total` when a total is known.
    #[must_use]
    pub fn clamped(self) -> Self {
        if self.total > 0 && self.current > self.total {
            Self {
                current: self.total,
                total: self.total,
            }
        } else {
            self
        }
    }
}

/// Marker an update carries when it came from a worker control or
/// lifecycle line rather than a progress line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Paused,
    Resumed,
    Merging,
    Finished,
}

/// Current progress of the active job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub filename: String,
    pub percent: f64,
    pub eta: String,
    pub speed: String,
    pub total_size: String,
    pub phase: Phase,
    pub fragments: Fragments,
    pub is_fragmenting: bool,
    pub is_merging: bool,
}

impl Default for ProgressSnapshot {
    fn default() -> Self {
        Self {
            filename: String::new(),
            percent: 0.0,
            eta: ETA_UNKNOWN.to_string(),
            speed: String::new(),
            total_size: String::new(),
            phase: Phase::Waiting,
            fragments: Fragments::default(),
            is_fragmenting: false,
            is_merging: false,
        }
    }
}

/// A partial change to a [`ProgressSnapshot`]. `None` fields are left as is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub filename: Option<String>,
    pub percent: Option<f64>,
    pub eta: Option<String>,
    pub speed: Option<String>,
    pub total_size: Option<String>,
    pub phase: Option<Phase>,
    pub fragments: Option<Fragments>,
    pub is_fragmenting: Option<bool>,
    pub is_merging: Option<bool>,
    pub signal: Option<Signal>,
}

impl ProgressUpdate {
    /// Overlay `other` on top of `self`; fields set in `other` win.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        Self {
            filename: other.filename.or(self.filename),
            percent: other.percent.or(self.percent),
            eta: other.eta.or(self.eta),
            speed: other.speed.or(self.speed),
            total_size: other.total_size.or(self.total_size),
            phase: other.phase.or(self.phase),
            fragments: other.fragments.or(self.fragments),
            is_fragmenting: other.is_fragmenting.or(self.is_fragmenting),
            is_merging: other.is_merging.or(self.is_merging),
            signal: other.signal.or(self.signal),
        }
    }

    /// Whether this update confirms a pause or resume from the worker.
    #[must_use]
    pub fn is_pause_control(&self) -> bool {
        matches!(self.signal, Some(Signal::Paused | Signal::Resumed))
    }
}

/// Clamp a percentage into `[0, 100]`; NaN becomes 0.
#[must_use]
pub fn clamp_percent(percent: f64) -> f64 {
    if percent.is_nan() {
        0.0
    } else {
        percent.clamp(0.0, 100.0)
    }
}

impl ProgressSnapshot {
    /// Shallow-merge `update` into the snapshot.
    ///
    /// While `paused` is set, the phase stays `Paused` unless the update is
    /// itself a worker pause/resume confirmation. Percent and fragment
    /// counters are clamped on the way in.
    pub fn apply(&mut self, update: &ProgressUpdate, paused: bool) {
        if let Some(filename) = &update.filename {
            self.filename.clone_from(filename);
        }
        if let Some(percent) = update.percent {
            self.percent = clamp_percent(percent);
        }
        if let Some(eta) = &update.eta {
            self.eta.clone_from(eta);
        }
        if let Some(speed) = &update.speed {
            self.speed.clone_from(speed);
        }
        if let Some(total_size) = &update.total_size {
            self.total_size.clone_from(total_size);
        }
        if let Some(fragments) = update.fragments {
            self.fragments = fragments.clamped();
        }
        if let Some(is_fragmenting) = update.is_fragmenting {
            self.is_fragmenting = is_fragmenting;
        }
        if let Some(is_merging) = update.is_merging {
            self.is_merging = is_merging;
        }
        if let Some(phase) = update.phase {
            self.phase = phase;
        }

        if paused && !update.is_pause_control() {
            self.phase = Phase::Paused;
        }
    }
}
