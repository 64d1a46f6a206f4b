//! Upload pipeline: carve a file into slices and push them through
//! the bounded pool.
//!
//! One "send chunk" future per slice is submitted through a
//! [`CompletionLedger`] over a shared [`PermitGate`], so at most
//! `max_in_flight` chunks are on the wire at once regardless of file
//! size. Files no larger than one chunk take the non-chunked
//! [`WholeSource`] path.

use std::future::Future;
use std::io;
use std::path::Path;
use std::sync::Arc;

use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use uplift_pool::{CompletionLedger, PermitGate, PoolError, SubmitOutcome};

use crate::monitor::TransferMonitor;
use crate::transmit::{ChunkSlice, WholeSource};
use crate::{digest, TransferError, DEFAULT_CONTENT_TYPE};

/// Descriptor of one chunk handed to the transport.
#[derive(Debug, Clone)]
pub struct ChunkMeta {
    /// Zero-based chunk index within the file.
    pub index: u64,
    /// Absolute byte offset of the chunk's first byte.
    pub offset: u64,
    /// Chunk length in bytes (the last chunk may be short).
    pub len: u64,
    /// MIME content type of the upload.
    pub content_type: String,
    /// Display name, used in progress labels.
    pub name: String,
}

/// The engine's only view of the wire: a sink per chunk attempt.
pub trait ChunkTransport: Send + Sync + 'static {
    type Sink: AsyncWrite + Unpin + Send;

    /// Opens a sink that will receive the bytes of `chunk`.
    fn open(&self, chunk: &ChunkMeta) -> impl Future<Output = io::Result<Self::Sink>> + Send;
}

/// Upload tuning knobs.
#[derive(Debug, Clone)]
pub struct UploaderConfig {
    /// Target chunk size in bytes.
    pub chunk_size: u64,
    /// Maximum chunks on the wire at once.
    pub max_in_flight: usize,
    /// Content type stamped on every chunk.
    pub content_type: String,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            chunk_size: 4 * 1024 * 1024,
            max_in_flight: 4,
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
        }
    }
}

/// Result of a completed upload.
#[derive(Debug, Clone)]
pub struct UploadReport {
    /// Bytes actually transmitted.
    pub total_bytes: u64,
    /// Number of chunks sent (0 for an empty file).
    pub chunks: usize,
    /// Hex-encoded SHA-256 of the file content.
    pub checksum: String,
}

/// Uploads files chunk-by-chunk through a bounded pool.
///
/// The gate is shared across calls, so concurrent `upload_file`s on
/// the same `Uploader` still respect one global in-flight bound.
pub struct Uploader {
    config: UploaderConfig,
    gate: Arc<PermitGate>,
}

impl Uploader {
    /// Creates an uploader; fails if `max_in_flight` is zero.
    pub fn new(config: UploaderConfig) -> Result<Self, PoolError> {
        let gate = Arc::new(PermitGate::new(config.max_in_flight)?);
        Ok(Self { config, gate })
    }

    /// Uploads `path`, returning transmitted bytes, chunk count and
    /// the file's content digest.
    ///
    /// `cancel` covers submission and draining; pair it with a
    /// [`TokenMonitor`](crate::TokenMonitor) on the same token so
    /// in-flight transmissions stop too. Cancellation surfaces as
    /// [`TransferError::Cancelled`]; the first chunk failure aborts
    /// the upload.
    pub async fn upload_file<T, M>(
        &self,
        path: &Path,
        transport: Arc<T>,
        monitor: Arc<M>,
        cancel: &CancellationToken,
    ) -> Result<UploadReport, TransferError>
    where
        T: ChunkTransport,
        M: TransferMonitor + 'static,
    {
        let file_len = tokio::fs::metadata(path).await?.len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let mut file = tokio::fs::File::open(path).await?;
        let (checksum, hashed) = digest::checksum_reader(&mut file).await?;
        drop(file);
        debug!(name = %name, bytes = hashed, %checksum, "content hashed");

        if file_len == 0 {
            return Ok(UploadReport {
                total_bytes: 0,
                chunks: 0,
                checksum,
            });
        }

        if file_len <= self.config.chunk_size {
            return self
                .send_whole(path, file_len, name, checksum, transport, monitor)
                .await;
        }

        self.send_chunked(path, file_len, name, checksum, transport, monitor, cancel)
            .await
    }

    async fn send_whole<T, M>(
        &self,
        path: &Path,
        file_len: u64,
        name: String,
        checksum: String,
        transport: Arc<T>,
        monitor: Arc<M>,
    ) -> Result<UploadReport, TransferError>
    where
        T: ChunkTransport,
        M: TransferMonitor + 'static,
    {
        let meta = ChunkMeta {
            index: 0,
            offset: 0,
            len: file_len,
            content_type: self.config.content_type.clone(),
            name: name.clone(),
        };
        let mut sink = transport.open(&meta).await?;
        let reader = tokio::fs::File::open(path).await?;
        let mut whole = WholeSource::new(reader, file_len, meta.content_type, meta.name);
        let sent = whole.transmit(&mut sink, monitor.as_ref()).await?;

        info!(name = %name, bytes = sent, "whole-file upload complete");
        Ok(UploadReport {
            total_bytes: sent,
            chunks: 1,
            checksum,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn send_chunked<T, M>(
        &self,
        path: &Path,
        file_len: u64,
        name: String,
        checksum: String,
        transport: Arc<T>,
        monitor: Arc<M>,
        cancel: &CancellationToken,
    ) -> Result<UploadReport, TransferError>
    where
        T: ChunkTransport,
        M: TransferMonitor + 'static,
    {
        let chunk_size = self.config.chunk_size;
        let chunk_count = file_len.div_ceil(chunk_size);
        let ledger: CompletionLedger<u64, TransferError> =
            CompletionLedger::new(Arc::clone(&self.gate));

        for index in 0..chunk_count {
            let offset = index * chunk_size;
            let meta = ChunkMeta {
                index,
                offset,
                len: chunk_size.min(file_len - offset),
                content_type: self.config.content_type.clone(),
                name: name.clone(),
            };
            let transport = Arc::clone(&transport);
            let monitor = Arc::clone(&monitor);
            let path = path.to_path_buf();

            let outcome = ledger
                .submit(cancel, async move {
                    // Fresh reader per attempt; the slice owns its
                    // byte range, so no shared-stream discipline.
                    let reader = tokio::fs::File::open(&path).await?;
                    let mut sink = transport.open(&meta).await?;
                    let mut slice =
                        ChunkSlice::new(reader, meta.offset, meta.len, meta.content_type, meta.name);
                    slice.transmit(&mut sink, monitor.as_ref()).await
                })
                .await;

            match outcome {
                SubmitOutcome::Accepted => {}
                SubmitOutcome::Cancelled => {
                    // Let already-submitted chunks settle before
                    // reporting; their transmitters see the same
                    // cancellation through the monitor.
                    ledger.drain(&CancellationToken::new()).await;
                    return Err(TransferError::Cancelled);
                }
                SubmitOutcome::Rejected => {
                    ledger.drain(&CancellationToken::new()).await;
                    return Err(TransferError::Rejected(index));
                }
            }
        }

        let mut total_bytes = 0u64;
        let drained = ledger
            .drain_and_wait(cancel, |sent| total_bytes += sent, Err)
            .await;

        match drained {
            Ok(d) if d.remaining == 0 => {
                info!(name = %name, bytes = total_bytes, chunks = chunk_count, "chunked upload complete");
                Ok(UploadReport {
                    total_bytes,
                    chunks: chunk_count as usize,
                    checksum,
                })
            }
            Ok(_) => Err(TransferError::Cancelled),
            Err(failure) => Err(failure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::{NullMonitor, TokenMonitor};
    use crate::digest::checksum_bytes;
    use std::collections::HashMap;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::task::{Context, Poll};
    use tempfile::TempDir;

    /// In-memory sink that publishes its bytes keyed by chunk index
    /// when dropped.
    struct CaptureSink {
        index: u64,
        buf: Vec<u8>,
        store: Arc<Mutex<HashMap<u64, Vec<u8>>>>,
    }

    impl AsyncWrite for CaptureSink {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            data: &[u8],
        ) -> Poll<io::Result<usize>> {
            self.get_mut().buf.extend_from_slice(data);
            Poll::Ready(Ok(data.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    impl Drop for CaptureSink {
        fn drop(&mut self) {
            self.store
                .lock()
                .unwrap()
                .insert(self.index, std::mem::take(&mut self.buf));
        }
    }

    /// Transport writing every chunk into a shared map.
    #[derive(Default)]
    struct MemTransport {
        store: Arc<Mutex<HashMap<u64, Vec<u8>>>>,
    }

    impl ChunkTransport for MemTransport {
        type Sink = CaptureSink;

        fn open(&self, chunk: &ChunkMeta) -> impl Future<Output = io::Result<CaptureSink>> + Send {
            let sink = CaptureSink {
                index: chunk.index,
                buf: Vec::new(),
                store: Arc::clone(&self.store),
            };
            async move { Ok(sink) }
        }
    }

    /// Transport that fails to open one chunk.
    struct FailingTransport {
        fail_index: u64,
        inner: MemTransport,
    }

    impl ChunkTransport for FailingTransport {
        type Sink = CaptureSink;

        fn open(&self, chunk: &ChunkMeta) -> impl Future<Output = io::Result<CaptureSink>> + Send {
            let result = if chunk.index == self.fail_index {
                Err(io::Error::other("transport refused chunk"))
            } else {
                Ok(CaptureSink {
                    index: chunk.index,
                    buf: Vec::new(),
                    store: Arc::clone(&self.inner.store),
                })
            };
            async move { result }
        }
    }

    fn write_fixture(dir: &TempDir, name: &str, len: usize) -> (std::path::PathBuf, Vec<u8>) {
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let path = dir.path().join(name);
        std::fs::write(&path, &data).unwrap();
        (path, data)
    }

    fn reassemble(store: &Mutex<HashMap<u64, Vec<u8>>>) -> Vec<u8> {
        let store = store.lock().unwrap();
        let mut indices: Vec<_> = store.keys().copied().collect();
        indices.sort_unstable();
        indices
            .iter()
            .flat_map(|i| store[i].iter().copied())
            .collect()
    }

    #[tokio::test]
    async fn chunked_upload_round_trip() {
        let dir = TempDir::new().unwrap();
        let (path, data) = write_fixture(&dir, "big.bin", 10_000);

        let uploader = Uploader::new(UploaderConfig {
            chunk_size: 1024,
            max_in_flight: 3,
            ..Default::default()
        })
        .unwrap();
        let transport = Arc::new(MemTransport::default());
        let report = uploader
            .upload_file(
                &path,
                Arc::clone(&transport),
                Arc::new(NullMonitor),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.total_bytes, 10_000);
        assert_eq!(report.chunks, 10); // 9 full chunks + a short tail.
        assert_eq!(report.checksum, checksum_bytes(&data));
        assert_eq!(reassemble(&transport.store), data);
    }

    #[tokio::test]
    async fn small_file_takes_whole_source_path() {
        let dir = TempDir::new().unwrap();
        let (path, data) = write_fixture(&dir, "small.bin", 100);

        let uploader = Uploader::new(UploaderConfig {
            chunk_size: 1024,
            max_in_flight: 2,
            ..Default::default()
        })
        .unwrap();
        let transport = Arc::new(MemTransport::default());
        let report = uploader
            .upload_file(
                &path,
                Arc::clone(&transport),
                Arc::new(NullMonitor),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.chunks, 1);
        assert_eq!(report.total_bytes, 100);
        assert_eq!(reassemble(&transport.store), data);
    }

    #[tokio::test]
    async fn empty_file_uploads_nothing() {
        let dir = TempDir::new().unwrap();
        let (path, _) = write_fixture(&dir, "empty.bin", 0);

        let uploader = Uploader::new(UploaderConfig::default()).unwrap();
        let transport = Arc::new(MemTransport::default());
        let report = uploader
            .upload_file(
                &path,
                Arc::clone(&transport),
                Arc::new(NullMonitor),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.total_bytes, 0);
        assert_eq!(report.chunks, 0);
        assert_eq!(report.checksum, checksum_bytes(b""));
        assert!(transport.store.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancelled_before_submission() {
        let dir = TempDir::new().unwrap();
        let (path, _) = write_fixture(&dir, "big.bin", 10_000);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let monitor = Arc::new(TokenMonitor::new(cancel.clone()));

        let uploader = Uploader::new(UploaderConfig {
            chunk_size: 1024,
            max_in_flight: 2,
            ..Default::default()
        })
        .unwrap();
        let err = uploader
            .upload_file(&path, Arc::new(MemTransport::default()), monitor, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Cancelled));
    }

    #[tokio::test]
    async fn transport_failure_aborts_upload() {
        let dir = TempDir::new().unwrap();
        let (path, _) = write_fixture(&dir, "big.bin", 5_000);

        let uploader = Uploader::new(UploaderConfig {
            chunk_size: 1024,
            max_in_flight: 2,
            ..Default::default()
        })
        .unwrap();
        let transport = Arc::new(FailingTransport {
            fail_index: 3,
            inner: MemTransport::default(),
        });
        let err = uploader
            .upload_file(
                &path,
                transport,
                Arc::new(NullMonitor),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Io(_)));
    }

    #[test]
    fn zero_in_flight_rejected() {
        let config = UploaderConfig {
            max_in_flight: 0,
            ..Default::default()
        };
        assert!(Uploader::new(config).is_err());
    }
}
