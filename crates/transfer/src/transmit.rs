//! Cancellable transmitters: chunked slice and whole-source variants.

use std::io::SeekFrom;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::monitor::TransferMonitor;
use crate::{buffer_size, TransferError};

// ---------------------------------------------------------------------------
// ChunkSlice
// ---------------------------------------------------------------------------

/// A bounded, retriable byte range `[start, start + len)` of a
/// seekable source, streamed to a sink with cancellation polling
/// between buffer writes.
///
/// Every [`transmit`](Self::transmit) seeks back to `start` first, so
/// a retry after any failure resends the slice in full — never from a
/// partially-sent offset. One transmit per slice at a time, enforced
/// by `&mut self`.
pub struct ChunkSlice<R> {
    reader: R,
    start: u64,
    len: u64,
    buffer: usize,
    content_type: String,
    name: String,
}

impl<R> ChunkSlice<R>
where
    R: AsyncRead + AsyncSeek + Unpin,
{
    /// Creates a slice of `len` bytes starting at absolute offset
    /// `start` of `reader`.
    pub fn new(
        reader: R,
        start: u64,
        len: u64,
        content_type: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            reader,
            start,
            len,
            buffer: buffer_size(),
            content_type: content_type.into(),
            name: name.into(),
        }
    }

    /// Overrides the transmit buffer size for this slice.
    ///
    /// Cancellation latency is bounded by one buffer's transmission,
    /// so latency-sensitive callers may want something smaller than
    /// the process-wide [`buffer_size`](crate::buffer_size).
    pub fn with_buffer(mut self, bytes: usize) -> Self {
        self.buffer = bytes.max(1);
        self
    }

    /// Streams the slice to `sink`.
    ///
    /// Stops after exactly `len` bytes or source EOF, whichever comes
    /// first, and returns the bytes actually sent. Cancellation
    /// surfaces as [`TransferError::Cancelled`], distinct from I/O
    /// failure; no `done` is signalled for a cancelled attempt.
    pub async fn transmit<W, M>(&mut self, sink: &mut W, monitor: &M) -> Result<u64, TransferError>
    where
        W: AsyncWrite + Unpin,
        M: TransferMonitor + ?Sized,
    {
        self.reader.seek(SeekFrom::Start(self.start)).await?;
        monitor.begin(&self.name, self.len);

        let mut buf = vec![0u8; self.buffer.min(self.len.max(1) as usize)];
        let mut remaining = self.len;
        let mut sent = 0u64;

        while remaining > 0 {
            if monitor.is_cancelled() {
                debug!(name = %self.name, sent, "chunk transmit cancelled");
                return Err(TransferError::Cancelled);
            }

            let want = remaining.min(buf.len() as u64) as usize;
            let n = self.reader.read(&mut buf[..want]).await?;
            if n == 0 {
                // Source shorter than the slice; the reported length
                // still claims `len` bytes.
                break;
            }

            sink.write_all(&buf[..n]).await?;
            monitor.worked(n as u64);
            sent += n as u64;
            remaining -= n as u64;
            trace!(name = %self.name, sent, remaining, "chunk buffer written");
        }

        sink.flush().await?;
        monitor.done();
        Ok(sent)
    }

    /// The slice length this chunk claims on the wire.
    ///
    /// Always the configured `len`, even when the source holds fewer
    /// bytes — callers deriving a content-length header from this
    /// value must ensure the source actually covers the slice.
    pub fn reported_len(&self) -> u64 {
        self.len
    }

    /// Absolute source offset of the slice's first byte.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// MIME content type of the slice.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Display name used in progress labels.
    pub fn name(&self) -> &str {
        &self.name
    }
}

// ---------------------------------------------------------------------------
// WholeSource
// ---------------------------------------------------------------------------

/// Non-chunked variant for whole-small-file transmission.
///
/// Identical cancellation and progress contract to [`ChunkSlice`], but
/// the entire source is one logical slice and the reader need not be
/// seekable — retries construct a fresh `WholeSource`.
pub struct WholeSource<R> {
    reader: R,
    len: u64,
    buffer: usize,
    content_type: String,
    name: String,
}

impl<R> WholeSource<R>
where
    R: AsyncRead + Unpin,
{
    /// Wraps `reader`, declared to hold `len` bytes.
    pub fn new(reader: R, len: u64, content_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            reader,
            len,
            buffer: buffer_size(),
            content_type: content_type.into(),
            name: name.into(),
        }
    }

    /// Overrides the transmit buffer size for this source.
    pub fn with_buffer(mut self, bytes: usize) -> Self {
        self.buffer = bytes.max(1);
        self
    }

    /// Streams the whole source to `sink`.
    ///
    /// A zero-length source is a true no-op: no buffer is allocated,
    /// no read is issued and the monitor is never touched.
    pub async fn transmit<W, M>(&mut self, sink: &mut W, monitor: &M) -> Result<u64, TransferError>
    where
        W: AsyncWrite + Unpin,
        M: TransferMonitor + ?Sized,
    {
        if self.len == 0 {
            return Ok(0);
        }

        monitor.begin(&self.name, self.len);

        let mut buf = vec![0u8; self.buffer.min(self.len as usize)];
        let mut sent = 0u64;

        loop {
            if monitor.is_cancelled() {
                debug!(name = %self.name, sent, "whole-source transmit cancelled");
                return Err(TransferError::Cancelled);
            }

            let n = self.reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }

            sink.write_all(&buf[..n]).await?;
            monitor.worked(n as u64);
            sent += n as u64;
        }

        sink.flush().await?;
        monitor.done();
        Ok(sent)
    }

    /// Declared length of the source.
    pub fn reported_len(&self) -> u64 {
        self.len
    }

    /// MIME content type of the source.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Display name used in progress labels.
    pub fn name(&self) -> &str {
        &self.name
    }
}
