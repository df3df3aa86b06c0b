//! Stream plumbing between the worker's pipes and the supervisor.
//!
//! Output pipes are read in chunks, reassembled into lines by a
//! [`LineBuffer`] per stream, and delivered in order over a channel.
//! Control tokens travel the other way through a dedicated writer task so
//! callers never block on the worker's stdin.

use std::fmt;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use super::{ControlToken, ExitOutcome, LineBuffer};

/// Read size for a single chunk from a worker pipe.
pub const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Which output pipe a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => f.write_str("stdout"),
            Self::Stderr => f.write_str("stderr"),
        }
    }
}

/// Something observed about a worker.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// A complete line of output.
    Line { stream: StreamKind, line: String },
    /// Reading a pipe failed.
    StreamFailed { stream: StreamKind, error: String },
    /// The process exited and both pipes have drained.
    Exited(ExitOutcome),
    /// Waiting on the process failed.
    WaitFailed(String),
}

/// A worker event tagged with the generation of the worker that produced it.
///
/// Every launch gets a fresh generation, so events from a worker the
/// supervisor has already released can be recognised and dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerMessage {
    pub generation: u64,
    pub event: WorkerEvent,
}

/// Read `reader` to EOF, forwarding every complete line.
///
/// The unterminated remainder is flushed as a final line at EOF. A read
/// error is forwarded as [`WorkerEvent::StreamFailed`] and ends the pump.
pub async fn pump_lines<R>(
    mut reader: R,
    stream: StreamKind,
    generation: u64,
    tx: UnboundedSender<WorkerMessage>,
) where
    R: AsyncRead + Unpin,
{
    let mut buffer = LineBuffer::new();
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];

    let send = |event: WorkerEvent| tx.send(WorkerMessage { generation, event }).is_ok();

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => {
                if let Some(line) = buffer.finish() {
                    send(WorkerEvent::Line { stream, line });
                }
                tracing::trace!(%stream, generation, "Stream reached EOF");
                return;
            }
            Ok(n) => {
                for line in buffer.feed_bytes(&chunk[..n]) {
                    if !send(WorkerEvent::Line { stream, line }) {
                        tracing::debug!(%stream, "Event channel closed, stopping reader");
                        return;
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => {
                tracing::warn!(%stream, error = %e, "Failed to read worker output");
                send(WorkerEvent::StreamFailed {
                    stream,
                    error: e.to_string(),
                });
                return;
            }
        }
    }
}

/// Write queued control tokens to the worker until the queue closes.
///
/// Dropping the sender closes the worker's stdin once every queued token
/// has been written.
pub async fn write_controls<W>(mut writer: W, mut rx: UnboundedReceiver<ControlToken>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(token) = rx.recv().await {
        let line = token.to_line();
        let result = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = result {
            tracing::warn!(%token, error = %e, "Failed to write control token");
            return;
        }
        tracing::debug!(%token, "Control token written");
    }
}
