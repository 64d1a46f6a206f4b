//! Cancellable chunked upload transmitters with progress tracking.
//!
//! A file is carved into fixed-size slices; each slice streams to a
//! transport sink while polling a [`TransferMonitor`] for cooperative
//! cancellation between buffer writes. A failed slice is resent in
//! full from its own byte 0, never from the point of interruption.
//! The [`uploader`] module drives the slices through the bounded pool
//! in `uplift-pool`.

mod digest;
mod monitor;
mod transmit;
mod uploader;

pub use digest::{checksum_bytes, checksum_reader};
pub use monitor::{NullMonitor, ProgressEvent, TokenMonitor, TransferMonitor};
pub use transmit::{ChunkSlice, WholeSource};
pub use uploader::{ChunkMeta, ChunkTransport, UploadReport, Uploader, UploaderConfig};

use std::sync::OnceLock;

/// Default transmit buffer size: 64 KiB.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Environment variable overriding the transmit buffer size, in bytes.
pub const BUFFER_SIZE_ENV: &str = "UPLIFT_TRANSFER_BUFFER";

/// Default content type for uploaded file content.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

static BUFFER_SIZE: OnceLock<usize> = OnceLock::new();

/// Transmit buffer size in bytes.
///
/// Read once from [`BUFFER_SIZE_ENV`]; a missing value silently uses
/// the default, a present-but-unusable value falls back with a logged
/// warning.
pub fn buffer_size() -> usize {
    *BUFFER_SIZE.get_or_init(|| parse_buffer_size(std::env::var(BUFFER_SIZE_ENV).ok().as_deref()))
}

fn parse_buffer_size(configured: Option<&str>) -> usize {
    let Some(raw) = configured else {
        return DEFAULT_BUFFER_SIZE;
    };
    match raw.trim().parse::<usize>() {
        Ok(n) if n > 0 => n,
        _ => {
            tracing::warn!(
                value = raw,
                default = DEFAULT_BUFFER_SIZE,
                "unusable {BUFFER_SIZE_ENV}; using default"
            );
            DEFAULT_BUFFER_SIZE
        }
    }
}

/// Errors produced by the transfer crate.
///
/// Cancellation is its own variant so callers can tell "user stopped
/// the upload" from a transport failure without string matching.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cancelled")]
    Cancelled,

    #[error("upload pool rejected chunk {0}")]
    Rejected(u64),
}
