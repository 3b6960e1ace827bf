//! # framing
//!
//! Newline-delimited record splitter for the tag gateway byte stream.
//!
//! TCP reads arrive in arbitrary chunks: one read may hold several records, and
//! one record may span several reads. `LineFramer` carries the unterminated tail
//! between reads and yields each complete line, trimmed of surrounding
//! whitespace. Empty lines are yielded too; the ingest stage skips them.
//!
//! Carry-over is bounded by `max_line_bytes`. A line that grows past the bound
//! is discarded up to its terminating newline and reported once as
//! [`Frame::Overflow`], so a peer that never sends `\n` cannot grow the buffer
//! without limit.

use bytes::{Bytes, BytesMut};

/// Default upper bound on one record, including carry-over.
pub const DEFAULT_MAX_LINE_BYTES: usize = 16 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// One trimmed candidate record (may be empty)
    Record(Bytes),
    /// An over-long line was dropped; `discarded` counts its bytes
    Overflow { discarded: usize },
}

#[derive(Debug)]
pub struct LineFramer {
    buf: BytesMut,
    /// Bytes of `buf` already searched for a newline
    scanned: usize,
    max_line_bytes: usize,
    /// Set while skipping the remainder of an over-long line
    discarding: bool,
    discarded: usize,
}

impl LineFramer {
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            scanned: 0,
            max_line_bytes: max_line_bytes.max(1),
            discarding: false,
            discarded: 0,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Next complete frame, or `None` once only a partial line remains.
    pub fn next_frame(&mut self) -> Option<Frame> {
        let Some(offset) = self.buf[self.scanned..].iter().position(|&b| b == b'\n') else {
            self.scanned = self.buf.len();
            if self.buf.len() > self.max_line_bytes {
                self.discarded += self.buf.len();
                self.buf.clear();
                self.scanned = 0;
                self.discarding = true;
            }
            return None;
        };

        let newline = self.scanned + offset;
        let line = self.buf.split_to(newline + 1).freeze();
        self.scanned = 0;

        if self.discarding || newline > self.max_line_bytes {
            let discarded = self.discarded + line.len();
            self.discarding = false;
            self.discarded = 0;
            return Some(Frame::Overflow { discarded });
        }

        Some(Frame::Record(trim_ascii_whitespace(line.slice(..newline))))
    }

    /// Bytes of an unterminated record currently held (or being skipped).
    pub fn pending(&self) -> usize {
        self.buf.len() + self.discarded
    }

    /// Drop any partial record, e.g. when the peer disconnects. Returns the
    /// number of bytes thrown away.
    pub fn reset(&mut self) -> usize {
        let dropped = self.pending();
        self.buf.clear();
        self.scanned = 0;
        self.discarding = false;
        self.discarded = 0;
        dropped
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE_BYTES)
    }
}

fn trim_ascii_whitespace(line: Bytes) -> Bytes {
    let start = line.iter().position(|b| !b.is_ascii_whitespace());
    match start {
        None => Bytes::new(),
        Some(start) => {
            let end = line
                .iter()
                .rposition(|b| !b.is_ascii_whitespace())
                .map_or(line.len(), |i| i + 1);
            line.slice(start..end)
        }
    }
}
