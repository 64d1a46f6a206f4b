//! Progress and cancellation reporting for transmitters.
//!
//! The monitor is handed to [`transmit`](crate::ChunkSlice::transmit)
//! explicitly rather than looked up from ambient task-local state, so
//! the same worker task can serve transfers with different lifetimes.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Cancellation flag plus progress sink consumed during transmission.
///
/// `begin` is signalled at the start of every attempt — retries
/// included — and resets any progress carried over from a prior
/// attempt. `done` is only signalled when an attempt completes.
pub trait TransferMonitor: Send + Sync {
    /// A (re)transmission attempt of `total` bytes is starting.
    fn begin(&self, label: &str, total: u64);
    /// `bytes` more bytes were handed to the sink.
    fn worked(&self, bytes: u64);
    /// The attempt finished normally.
    fn done(&self);
    /// Polled between buffer writes; `true` aborts the attempt.
    fn is_cancelled(&self) -> bool;
}

/// Progress notification emitted by [`TokenMonitor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Begin { label: String, total: u64 },
    Worked { bytes: u64 },
    Done,
}

/// Standard monitor: a [`CancellationToken`] for the flag and an
/// optional event channel for observers (progress bars, logs).
///
/// The byte counter covers a single attempt at a time: every `begin`
/// resets it, so when one monitor is shared by several concurrent
/// transmitters, [`transmitted`](TokenMonitor::transmitted) is not
/// meaningful and observers should aggregate `Worked` events instead.
pub struct TokenMonitor {
    cancel: CancellationToken,
    events: Option<mpsc::UnboundedSender<ProgressEvent>>,
    transmitted: AtomicU64,
}

impl TokenMonitor {
    /// Creates a monitor driven by `cancel`, with no observers.
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            events: None,
            transmitted: AtomicU64::new(0),
        }
    }

    /// Creates a monitor that also forwards [`ProgressEvent`]s.
    pub fn with_events(
        cancel: CancellationToken,
        events: mpsc::UnboundedSender<ProgressEvent>,
    ) -> Self {
        Self {
            cancel,
            events: Some(events),
            transmitted: AtomicU64::new(0),
        }
    }

    /// Bytes reported by `worked` during the current attempt.
    pub fn transmitted(&self) -> u64 {
        self.transmitted.load(Ordering::Relaxed)
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.events {
            // Observers hanging up must not fail the transfer.
            let _ = tx.send(event);
        }
    }
}

impl TransferMonitor for TokenMonitor {
    fn begin(&self, label: &str, total: u64) {
        self.transmitted.store(0, Ordering::Relaxed);
        self.emit(ProgressEvent::Begin {
            label: label.to_string(),
            total,
        });
    }

    fn worked(&self, bytes: u64) {
        self.transmitted.fetch_add(bytes, Ordering::Relaxed);
        self.emit(ProgressEvent::Worked { bytes });
    }

    fn done(&self) {
        self.emit(ProgressEvent::Done);
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Monitor that never cancels and discards progress.
pub struct NullMonitor;

impl TransferMonitor for NullMonitor {
    fn begin(&self, _label: &str, _total: u64) {}
    fn worked(&self, _bytes: u64) {}
    fn done(&self) {}
    fn is_cancelled(&self) -> bool {
        false
    }
}
