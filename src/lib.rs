//! chainscore: stream generated text chains to a scoring server.
//!
//! - `chain` / `scheduler`: parallel chain generation with ordered output
//! - `frame`: newline-delimited framing with an end-of-stream sentinel
//! - `score`: the scoring rules
//! - `connection` / `server`: one scoring session per TCP connection
//! - `client`: full-duplex producer session
//! - `logging`: single-writer log aggregation fed by `tracing`

pub mod chain;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
pub mod logging;
pub mod scheduler;
pub mod score;
pub mod server;

pub use error::{Error, ProtocolViolation, Result};
