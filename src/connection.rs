//! Per-connection scoring loop.
//!
//! Reads raw chunks, reassembles chains, scores them and writes the valid
//! results back as one batch per read, until the client's sentinel arrives.
//! Reads and scoring are strictly sequential so results keep chain order.

use crate::error::Result;
use crate::frame::{FrameReader, FrameWriter};
use crate::score::{result_line, ChainScorer, Score, Scorer};
use bytes::BytesMut;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tracing::{trace, warn};

/// Default read size per transport read
pub const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024;

/// Counters for one finished session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub chains: u64,
    pub valid: u64,
    pub invalid: u64,
    pub elapsed: Duration,
}

/// Scores one connection's chain stream.
pub struct ConnectionHandler<S = ChainScorer> {
    reader: FrameReader,
    scorer: S,
    buffer_size: usize,
    sentinel: Option<Vec<u8>>,
}

impl ConnectionHandler<ChainScorer> {
    pub fn new(buffer_size: usize) -> Self {
        Self::with_parts(FrameReader::new(), ChainScorer, buffer_size)
    }
}

impl<S: Scorer> ConnectionHandler<S> {
    /// Handler built from an injected reader and scorer.
    pub fn with_parts(reader: FrameReader, scorer: S, buffer_size: usize) -> Self {
        Self {
            reader,
            scorer,
            buffer_size: buffer_size.max(1),
            sentinel: None,
        }
    }

    /// Sentinel written after the last result batch. Defaults to the
    /// protocol sentinel.
    pub fn with_reply_sentinel(mut self, sentinel: impl Into<Vec<u8>>) -> Self {
        self.sentinel = Some(sentinel.into());
        self
    }

    /// Run the session to completion on `stream`.
    ///
    /// Transport failures and protocol violations end this session only;
    /// the caller decides how to report them.
    pub async fn run<T>(mut self, stream: T) -> Result<SessionSummary>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let start = Instant::now();
        let (mut rx, tx) = tokio::io::split(stream);
        let mut writer = FrameWriter::new(tx);
        if let Some(sentinel) = self.sentinel.take() {
            writer = writer.with_sentinel(sentinel);
        }

        let mut buffer = BytesMut::with_capacity(self.buffer_size);
        let mut valid = 0u64;
        let mut invalid = 0u64;
        let mut results = Vec::new();

        while !self.reader.is_terminated() {
            buffer.clear();
            buffer.reserve(self.buffer_size);
            let n = rx.read_buf(&mut buffer).await?;
            trace!(bytes = n, "Read chunk");

            let chains = self.reader.feed(&buffer)?;
            results.clear();
            for chain in &chains {
                match self.scorer.score(chain) {
                    Score::Valid(weight) => {
                        results.push(result_line(chain, weight));
                        valid += 1;
                    }
                    Score::Invalid(reason) => {
                        warn!(%reason, chain = %chain, "Chain rejected");
                        invalid += 1;
                    }
                }
            }
            writer.write_batch(&results).await?;
        }

        writer.finish().await?;

        Ok(SessionSummary {
            chains: self.reader.records(),
            valid,
            invalid,
            elapsed: start.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, ProtocolViolation};
    use std::io;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_scores_and_omits_invalid() {
        let stream = Builder::new()
            .read(b"ab cd\naab cd\nxyz\n*")
            .write(b"ab cd : 6.00\n")
            .write(b"*")
            .build();

        let summary = ConnectionHandler::new(64).run(stream).await.unwrap();
        assert_eq!(summary.chains, 3);
        assert_eq!(summary.valid, 1);
        assert_eq!(summary.invalid, 2);
    }

    #[tokio::test]
    async fn test_records_split_across_reads() {
        let stream = Builder::new()
            .read(b"ab c")
            .read(b"d\n1 2")
            .write(b"ab cd : 6.00\n")
            .read(b"\n")
            .write(b"1 2 : 4.00\n")
            .read(b"*")
            .write(b"*")
            .build();

        let summary = ConnectionHandler::new(64).run(stream).await.unwrap();
        assert_eq!(summary.chains, 2);
        assert_eq!(summary.valid, 2);
    }

    #[tokio::test]
    async fn test_small_buffer_reassembles() {
        let stream = Builder::new()
            .read(b"ab cd\nx y\n*")
            .write(b"ab cd : 6.00\n")
            .write(b"x y : 3.00\n")
            .write(b"*")
            .build();

        // Three bytes per read: "ab ", "cd\n", "x y", "\n*"
        let summary = ConnectionHandler::new(3).run(stream).await.unwrap();
        assert_eq!(summary.valid, 2);
    }

    #[tokio::test]
    async fn test_premature_close_is_protocol_violation() {
        let stream = Builder::new()
            .read(b"ab cd\nef")
            .write(b"ab cd : 6.00\n")
            .build();

        let err = ConnectionHandler::new(64).run(stream).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolViolation::PrematureClose { pending: 2 })
        ));
    }

    #[tokio::test]
    async fn test_transport_error_aborts_session() {
        let stream = Builder::new()
            .read(b"ab cd\n")
            .write(b"ab cd : 6.00\n")
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();

        let err = ConnectionHandler::new(64).run(stream).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test]
    async fn test_runaway_record_ends_session() {
        let stream = Builder::new().read(b"ab cd\nxxxxxxxxxxxx").build();

        let handler = ConnectionHandler::with_parts(
            FrameReader::new().with_max_record_len(8),
            ChainScorer,
            64,
        );
        let err = handler.run(stream).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolViolation::RecordTooLong { limit: 8 })
        ));
    }

    struct Constant(f64);

    impl Scorer for Constant {
        fn score(&self, _chain: &str) -> Score {
            Score::Valid(self.0)
        }
    }

    #[tokio::test]
    async fn test_injected_scorer_and_sentinel() {
        let stream = Builder::new()
            .read(b"abcd\n<E")
            .write(b"abcd : 1.25\n")
            .read(b"ND>")
            .write(b"<END>")
            .build();

        let handler =
            ConnectionHandler::with_parts(FrameReader::with_sentinel("<END>"), Constant(1.25), 64)
                .with_reply_sentinel("<END>");
        let summary = handler.run(stream).await.unwrap();
        assert_eq!(summary.valid, 1);
    }
}
