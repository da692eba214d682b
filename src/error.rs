//! Error types shared by the client and the server.
//!
//! Record-level rejections are not errors; see [`crate::score::Rejection`].

use crate::config::ConfigError;
use std::io;
use std::string::FromUtf8Error;
use thiserror::Error;

/// Violations of the newline-framed record protocol.
#[derive(Error, Debug)]
pub enum ProtocolViolation {
    /// The peer closed the transport before sending the end-of-stream marker.
    #[error("peer closed the stream before the end-of-stream marker ({pending} bytes pending)")]
    PrematureClose { pending: usize },

    #[error("record is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] FromUtf8Error),

    /// Bytes arrived after the end-of-stream marker.
    #[error("{0} bytes received after the end-of-stream marker")]
    TrailingData(usize),

    /// An unterminated record outgrew the reader's limit.
    #[error("record exceeds {limit} bytes without a separator")]
    RecordTooLong { limit: usize },

    /// An outbound record contains the separator or the end-of-stream marker.
    #[error("record contains a reserved framing token: {0:?}")]
    ReservedToken(String),
}

/// Top-level error for sessions, the accept loop and the binary.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("storage error: {0}")]
    Storage(#[source] io::Error),

    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    /// A generation worker or the result receiver task died.
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
