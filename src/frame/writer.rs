//! Frame writer.
//!
//! Serializes batches of records as `record\n` onto the transport and
//! mirrors the same bytes to a storage sink. `finish` appends the sentinel
//! to the transport only.

use super::{check_sentinel, contains_subslice, SENTINEL, SEPARATOR};
use crate::error::{Error, ProtocolViolation, Result};
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt, Sink};

/// Writes framed batches to a transport and a storage sink.
pub struct FrameWriter<T, S = Sink> {
    transport: T,
    storage: S,
    sentinel: Bytes,
    /// Reused encode buffer.
    scratch: BytesMut,
    records: u64,
}

impl<T: AsyncWrite + Unpin> FrameWriter<T, Sink> {
    /// Writer without durable storage.
    pub fn new(transport: T) -> Self {
        Self::with_storage(transport, tokio::io::sink())
    }
}

impl<T, S> FrameWriter<T, S>
where
    T: AsyncWrite + Unpin,
    S: AsyncWrite + Unpin,
{
    pub fn with_storage(transport: T, storage: S) -> Self {
        Self {
            transport,
            storage,
            sentinel: Bytes::from_static(SENTINEL),
            scratch: BytesMut::new(),
            records: 0,
        }
    }

    /// Use a custom end-of-stream token.
    ///
    /// # Panics
    /// Panics if `sentinel` is empty or contains the separator.
    pub fn with_sentinel(mut self, sentinel: impl AsRef<[u8]>) -> Self {
        let sentinel = sentinel.as_ref();
        check_sentinel(sentinel);
        self.sentinel = Bytes::copy_from_slice(sentinel);
        self
    }

    /// Records written so far.
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Encode `batch` into `out`, rejecting records that would corrupt framing.
    ///
    /// Nothing is appended if any record is rejected.
    pub fn encode_batch<R: AsRef<str>>(
        &self,
        batch: &[R],
        out: &mut BytesMut,
    ) -> Result<(), ProtocolViolation> {
        let start = out.len();
        for record in batch {
            let bytes = record.as_ref().as_bytes();
            if bytes.contains(&SEPARATOR) || contains_subslice(bytes, &self.sentinel) {
                out.truncate(start);
                return Err(ProtocolViolation::ReservedToken(record.as_ref().to_string()));
            }
            out.extend_from_slice(bytes);
            out.extend_from_slice(&[SEPARATOR]);
        }
        Ok(())
    }

    /// Write one batch to storage and transport as a unit.
    pub async fn write_batch<R: AsRef<str>>(&mut self, batch: &[R]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.clear();
        let encoded = self.encode_batch(batch, &mut scratch);
        let result = match encoded {
            Ok(()) => self.write_encoded(&scratch).await,
            Err(e) => Err(e.into()),
        };
        self.scratch = scratch;
        result?;

        self.records += batch.len() as u64;
        Ok(())
    }

    async fn write_encoded(&mut self, bytes: &[u8]) -> Result<()> {
        self.storage.write_all(bytes).await.map_err(Error::Storage)?;
        self.transport.write_all(bytes).await?;
        Ok(())
    }

    /// Append the sentinel, flush both sinks and hand them back.
    pub async fn finish(mut self) -> Result<(T, S)> {
        self.transport.write_all(&self.sentinel).await?;
        self.transport.flush().await?;
        self.storage.flush().await.map_err(Error::Storage)?;
        Ok((self.transport, self.storage))
    }
}
