//! Newline-framed record protocol.
//!
//! Both directions of a session carry UTF-8 records separated by `\n`.
//! The sender ends the session with a sentinel token, either as its own
//! write or directly after the last record's bytes:
//!
//! ```text
//! client -> server:  <chain>\n<chain>\n...<chain>\n*
//! server -> client:  <chain> : <weight>\n...*
//! ```
//!
//! The transport may split or merge writes arbitrarily, so the reader
//! reassembles records across reads and recognises a sentinel that arrives
//! in pieces.

pub mod reader;
pub mod writer;

pub use reader::{FrameReader, ReaderState};
pub use writer::FrameWriter;

/// Record separator.
pub const SEPARATOR: u8 = b'\n';

/// End-of-stream marker. Outside the chain alphabet and absent from result lines.
pub const SENTINEL: &[u8] = SENTINEL_STR.as_bytes();
pub const SENTINEL_STR: &str = "*";

/// Whether `needle` occurs anywhere in `haystack`.
pub(crate) fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

fn check_sentinel(sentinel: &[u8]) {
    assert!(
        !sentinel.is_empty() && !sentinel.contains(&SEPARATOR),
        "sentinel must be non-empty and must not contain the separator"
    );
}
