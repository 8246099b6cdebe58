// Line framing for the persistent node protocol
// Splits an accumulating byte buffer into newline-terminated JSON frames

use bytes::BytesMut;

use crate::model::Frame;

/// Longest line accepted from a node, terminator excluded
pub const MAX_FRAME_LENGTH: usize = 64 * 1024;

const READ_RESERVE: usize = 4 * 1024;

/// A line that could not be turned into a [`Frame`].
///
/// Both variants are recoverable: the offending line is dropped and decoding
/// continues with the next one.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("frame exceeds {0} bytes")]
    TooLong(usize),
}

/// Incremental frame decoder holding the partial-line buffer of one connection.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    max_length: usize,
    // Set after an oversized partial line was dropped, until its terminator shows up
    discarding: bool,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_length(MAX_FRAME_LENGTH)
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(READ_RESERVE),
            max_length,
            discarding: false,
        }
    }

    /// Buffer to read socket bytes into. Always has spare capacity.
    pub fn read_buffer(&mut self) -> &mut BytesMut {
        self.buffer.reserve(READ_RESERVE);
        &mut self.buffer
    }

    #[cfg(test)]
    fn extend_from_slice(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes received but not yet terminated by a newline
    #[cfg(test)]
    fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Pop the next complete line and parse it.
    ///
    /// Returns `None` once no complete line is buffered. Blank lines are
    /// skipped and a trailing `\r` is tolerated.
    pub fn next_frame(&mut self) -> Option<Result<Frame, FrameError>> {
        loop {
            let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') else {
                if self.buffer.len() > self.max_length {
                    self.buffer.clear();
                    if !self.discarding {
                        self.discarding = true;
                        return Some(Err(FrameError::TooLong(self.max_length)));
                    }
                }
                return None;
            };

            let line = self.buffer.split_to(pos + 1);
            if std::mem::take(&mut self.discarding) {
                continue;
            }

            let line = line.trim_ascii();
            if line.is_empty() {
                continue;
            }
            if line.len() > self.max_length {
                return Some(Err(FrameError::TooLong(self.max_length)));
            }

            return Some(serde_json::from_slice(line).map_err(FrameError::from));
        }
    }
}
