//! Stateful progress interpreter.
//!
//! Folds classified lines into a [`ProgressSnapshot`] and reconciles local
//! pause requests with what the worker reports.

use std::time::{Duration, Instant};

use super::{LineClassifier, Phase, ProgressSnapshot, ProgressUpdate, ScanState, Signal};

/// Default window after a pause request in which progress lines are dropped.
pub const DEFAULT_PAUSE_DEBOUNCE: Duration = Duration::from_millis(2000);

/// Local pause intent and the worker's confirmation, tracked separately.
///
/// The job counts as paused while either is set. The request timestamp
/// drives the debounce window; the confirmation comes from the worker's
/// pause marker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PauseState {
    requested_at: Option<Instant>,
    confirmed: bool,
}

impl PauseState {
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.requested_at.is_some() || self.confirmed
    }

    #[must_use]
    pub fn requested_at(&self) -> Option<Instant> {
        self.requested_at
    }

    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        self.confirmed
    }

    /// Whether `now` is still inside the debounce window of a local request.
    #[must_use]
    pub fn in_debounce(&self, now: Instant, window: Duration) -> bool {
        self.requested_at
            .is_some_and(|at| now.saturating_duration_since(at) < window)
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Turns worker output lines into progress snapshots.
#[derive(Debug, Clone)]
pub struct ProgressInterpreter {
    classifier: LineClassifier,
    scan: ScanState,
    pause: PauseState,
    debounce: Duration,
    snapshot: ProgressSnapshot,
}

impl Default for ProgressInterpreter {
    fn default() -> Self {
        Self::new(DEFAULT_PAUSE_DEBOUNCE)
    }
}

impl ProgressInterpreter {
    #[must_use]
    pub fn new(debounce: Duration) -> Self {
        Self {
            classifier: LineClassifier::new(),
            scan: ScanState::default(),
            pause: PauseState::default(),
            debounce,
            snapshot: ProgressSnapshot::default(),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> &ProgressSnapshot {
        &self.snapshot
    }

    #[must_use]
    pub fn pause_state(&self) -> PauseState {
        self.pause
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.pause.is_paused()
    }

    /// Record a local pause request made at `now`.
    pub fn request_pause(&mut self, now: Instant) {
        self.pause.requested_at = Some(now);
    }

    /// Record a local resume request. Clears both intent and confirmation.
    pub fn request_resume(&mut self) {
        self.pause.clear();
    }

    /// Classify `line` as of `now`, updating pause and fragment state.
    ///
    /// Numeric progress arriving within the debounce window of a local pause
    /// request is dropped: it was most likely buffered before the worker saw
    /// the pause. Pause and resume confirmations are never dropped.
    pub fn classify(&mut self, line: &str, now: Instant) -> Option<ProgressUpdate> {
        let update = self.classifier.classify(line, &mut self.scan)?;

        match update.signal {
            Some(Signal::Paused) => self.pause.confirmed = true,
            Some(Signal::Resumed) => self.pause.clear(),
            _ => {}
        }

        let is_numeric = update.percent.is_some() && update.signal.is_none();
        if is_numeric && self.pause.in_debounce(now, self.debounce) {
            tracing::trace!(line, "Dropping progress inside pause debounce window");
            return None;
        }

        Some(update)
    }

    /// Fold `update` into the snapshot.
    pub fn apply(&mut self, update: &ProgressUpdate) -> &ProgressSnapshot {
        self.snapshot.apply(update, self.pause.is_paused());
        &self.snapshot
    }

    /// Classify and apply in one step, returning the update when the
    /// snapshot changed.
    pub fn observe(&mut self, line: &str, now: Instant) -> Option<ProgressUpdate> {
        let update = self.classify(line, now)?;
        self.apply(&update);
        Some(update)
    }

    /// Mark the snapshot as failed. Other fields keep their last values.
    pub fn mark_failed(&mut self) {
        self.pause.clear();
        self.snapshot.phase = Phase::Error;
        self.snapshot.is_fragmenting = false;
        self.snapshot.is_merging = false;
    }

    /// Forget everything about the previous job.
    pub fn reset(&mut self) {
        self.scan = ScanState::default();
        self.pause.clear();
        self.snapshot = ProgressSnapshot::default();
    }
}
