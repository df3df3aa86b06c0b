//! Adapters forwarding supervisor events to the UI.

use std::io::Write;
use std::sync::Mutex;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::UiEvent;

/// Errors raised while delivering an event.
#[derive(thiserror::Error, Debug)]
pub enum NotifyError {
    /// The receiving side has gone away.
    #[error("Event channel closed")]
    ChannelClosed,
    /// The event could not be serialized.
    #[error("Failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),
    /// Writing the event failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Sink for UI events.
///
/// Implementations must preserve the order in which events are passed in.
pub trait Notifier: Send {
    /// Deliver a single event.
    ///
    /// # Errors
    ///
    /// Returns `NotifyError` if the event cannot be delivered.
    fn notify(&self, event: UiEvent) -> Result<(), NotifyError>;
}

impl<N: Notifier + Sync + ?Sized> Notifier for std::sync::Arc<N> {
    fn notify(&self, event: UiEvent) -> Result<(), NotifyError> {
        (**self).notify(event)
    }
}

impl<N: Notifier + ?Sized> Notifier for Box<N> {
    fn notify(&self, event: UiEvent) -> Result<(), NotifyError> {
        (**self).notify(event)
    }
}

/// Forwards events over an unbounded in-process channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: UnboundedSender<UiEvent>,
}

impl ChannelNotifier {
    #[must_use]
    pub fn new(tx: UnboundedSender<UiEvent>) -> Self {
        Self { tx }
    }

    /// Create a notifier together with the receiving end.
    #[must_use]
    pub fn channel() -> (Self, UnboundedReceiver<UiEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, event: UiEvent) -> Result<(), NotifyError> {
        self.tx.send(event).map_err(|_| NotifyError::ChannelClosed)
    }
}

/// Writes each event as one line of JSON.
#[derive(Debug)]
pub struct JsonLinesNotifier<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesNotifier<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Recover the inner writer.
    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl<W: Write + Send> Notifier for JsonLinesNotifier<W> {
    fn notify(&self, event: UiEvent) -> Result<(), NotifyError> {
        let mut line = serde_json::to_string(&event)?;
        line.push('\n');

        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        writer.write_all(line.as_bytes())?;
        writer.flush()?;
        Ok(())
    }
}

/// Records events in the log only. Useful when no UI is attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, event: UiEvent) -> Result<(), NotifyError> {
        match &event {
            UiEvent::Error { message } => tracing::error!(%message, "Job error"),
            UiEvent::Output { line } => tracing::trace!(%line, "Worker output"),
            UiEvent::Progress { snapshot } => tracing::debug!(
                percent = snapshot.percent,
                phase = ?snapshot.phase,
                eta = %snapshot.eta,
                speed = %snapshot.speed,
                "Progress"
            ),
            other => tracing::info!(event = other.name(), "Job event"),
        }
        Ok(())
    }
}
