//! Chunk-to-line reassembly for worker output streams.

/// Accumulates output chunks and yields complete lines.
///
/// Any trailing data not yet terminated by `\n` is held back and prefixed
/// to the next chunk, so the emitted lines are independent of where the
/// chunk boundaries fall. Buffering is done on bytes: a multi-byte
/// character split across two reads is reassembled before decoding, and
/// invalid UTF-8 is passed through lossily.
#[derive(Debug, Default, Clone)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a text chunk and return every line it completes, in order.
    ///
    /// Line separators are not included. A `\r` immediately before the
    /// separator is stripped as well.
    pub fn feed(&mut self, chunk: &str) -> Vec<String> {
        self.feed_bytes(chunk.as_bytes())
    }

    /// Feed a raw byte chunk as read from a pipe.
    pub fn feed_bytes(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let Some(last_newline) = self.pending.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };

        let rest = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, rest);

        complete[..last_newline]
            .split(|&b| b == b'\n')
            .map(decode_line)
            .collect()
    }

    /// Take the unterminated remainder, if any.
    ///
    /// Called once the stream has ended so the final line is not lost when
    /// the writer omitted the trailing separator.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(decode_line(&rest))
    }

    /// Bytes currently held back waiting for a separator.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Turn the bytes between two separators into a line.
///
/// Not byte-exact: a single trailing `\r` is dropped so CRLF output reads
/// like LF output, and invalid UTF-8 is replaced.
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}
