//! Newline framing for the worker's stdout stream.
//!
//! The worker writes one JSON document per line and nothing else marks the
//! end of a response, so the framer is the only thing standing between raw
//! pipe reads and response correlation. Reads may split a line anywhere
//! (including between `\r` and `\n`) or carry several lines at once.

/// Accumulates stdout chunks and yields complete, trimmed, non-empty lines.
#[derive(Debug, Default)]
pub struct LineFramer {
    /// Bytes received since the last `\n`. Never contains a `\n`.
    buffer: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return every line it completes, in order.
    ///
    /// Lines are trimmed of surrounding whitespace (which also removes a
    /// trailing `\r`); lines that are empty after trimming are discarded so
    /// they never consume a waiter. Invalid UTF-8 is replaced lossily.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            let raw = String::from_utf8_lossy(&self.buffer[start..end]);
            let line = raw.trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
            start = end + 1;
        }
        self.buffer.drain(..start);

        lines
    }

    /// Number of buffered bytes belonging to an unterminated line.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Discard the unterminated tail, returning it for diagnostics.
    ///
    /// Used when the stream ends: the protocol requires a terminator, so an
    /// unterminated tail is never treated as a response.
    pub fn take_pending(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let tail = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        Some(tail)
    }
}
