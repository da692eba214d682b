//! Stream reassembler.
//!
//! Turns raw transport reads of any size and alignment back into the
//! records the peer wrote. The unterminated tail of each read is held in a
//! pending buffer and prefixed to the next read.

use super::{check_sentinel, SENTINEL, SEPARATOR};
use crate::error::ProtocolViolation;
use bytes::{Bytes, BytesMut};

/// Default cap on the bytes held back for one unterminated record.
pub const DEFAULT_MAX_RECORD_LEN: usize = 64 * 1024;

/// Reassembler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    /// Records may still arrive.
    Streaming,
    /// The sentinel has been seen; the stream is complete.
    Terminated,
}

/// Per-session frame reader.
#[derive(Debug)]
pub struct FrameReader {
    /// Bytes of the next record not yet terminated by a separator.
    pending: BytesMut,
    state: ReaderState,
    sentinel: Bytes,
    max_record_len: usize,
    /// Completed records, for diagnostics.
    records: u64,
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameReader {
    pub fn new() -> Self {
        Self::with_sentinel(SENTINEL)
    }

    /// Reader that recognises a custom end-of-stream token.
    ///
    /// # Panics
    /// Panics if `sentinel` is empty or contains the separator.
    pub fn with_sentinel(sentinel: impl AsRef<[u8]>) -> Self {
        let sentinel = sentinel.as_ref();
        check_sentinel(sentinel);
        Self {
            pending: BytesMut::new(),
            state: ReaderState::Streaming,
            sentinel: Bytes::copy_from_slice(sentinel),
            max_record_len: DEFAULT_MAX_RECORD_LEN,
            records: 0,
        }
    }

    /// Reject a stream once an unterminated record grows past `limit` bytes.
    pub fn with_max_record_len(mut self, limit: usize) -> Self {
        self.max_record_len = limit.max(1);
        self
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    pub fn is_terminated(&self) -> bool {
        self.state == ReaderState::Terminated
    }

    /// Number of bytes held back waiting for a separator.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Records completed so far.
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Feed one transport read and return the records it completed, in order.
    ///
    /// An empty `chunk` means the peer closed the transport. That is only
    /// legal once the sentinel has been seen.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<String>, ProtocolViolation> {
        if self.state == ReaderState::Terminated {
            return if chunk.is_empty() {
                Ok(Vec::new())
            } else {
                Err(ProtocolViolation::TrailingData(chunk.len()))
            };
        }
        if chunk.is_empty() {
            return Err(ProtocolViolation::PrematureClose {
                pending: self.pending.len(),
            });
        }

        // The pending buffer never holds a separator, so only the new bytes
        // need scanning on the first pass.
        let mut scan_from = self.pending.len();
        self.pending.extend_from_slice(chunk);

        let mut records = Vec::new();
        while let Some(offset) = self.pending[scan_from..]
            .iter()
            .position(|&b| b == SEPARATOR)
        {
            let mut line = self.pending.split_to(scan_from + offset + 1);
            line.truncate(line.len() - 1);
            records.push(decode(line)?);
            scan_from = 0;
        }

        if self.pending.ends_with(&self.sentinel) {
            let record_len = self.pending.len() - self.sentinel.len();
            self.pending.truncate(record_len);
            if !self.pending.is_empty() {
                let last = self.pending.split();
                records.push(decode(last)?);
            }
            self.state = ReaderState::Terminated;
        } else if self.pending.len() > self.max_record_len {
            return Err(ProtocolViolation::RecordTooLong {
                limit: self.max_record_len,
            });
        }

        self.records += records.len() as u64;
        Ok(records)
    }
}

fn decode(line: BytesMut) -> Result<String, ProtocolViolation> {
    Ok(String::from_utf8(line.to_vec())?)
}
