//! Completion ledger: submit many, harvest all at once.
//!
//! Wraps a completion channel with a counter of submissions not yet
//! harvested, so a caller can say "wait for everything I submitted
//! since the last drain" without tracking join handles. Results come
//! back in completion order, not submission order.
//!
//! The completion receiver is private on purpose: bulk draining is the
//! only consumption path, which keeps the counter and the queue from
//! ever desynchronizing.

use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::gate::{PermitGate, SubmitOutcome};

/// Summary of one drain pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Drained {
    /// Completions harvested by this call.
    pub harvested: usize,
    /// Completions still outstanding when the call returned. Non-zero
    /// only when the drain was cancelled mid-wait; the next drain
    /// picks them up.
    pub remaining: usize,
}

/// Counts submissions through a [`PermitGate`] and harvests their
/// results in bulk.
///
/// The pending counter lives behind its own mutex, separate from the
/// completion channel's internals; it decrements as each result is
/// actually harvested, so a cancelled or aborted drain leaves an exact
/// remainder rather than discarding outstanding work.
pub struct CompletionLedger<T, E> {
    gate: Arc<PermitGate>,
    completed_tx: mpsc::UnboundedSender<Result<T, E>>,
    completed_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<T, E>>>,
    pending: Mutex<usize>,
}

impl<T, E> CompletionLedger<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Creates a ledger whose submissions are bounded by `gate`.
    pub fn new(gate: Arc<PermitGate>) -> Self {
        let (completed_tx, completed_rx) = mpsc::unbounded_channel();
        Self {
            gate,
            completed_tx,
            completed_rx: tokio::sync::Mutex::new(completed_rx),
            pending: Mutex::new(0),
        }
    }

    /// Submits `work` through the gate, routing its result into the
    /// ledger.
    ///
    /// The pending counter only grows when the gate accepts, so a
    /// rejected or cancelled submission never leaves a drain waiting
    /// for a result that will not arrive.
    pub async fn submit<F>(&self, cancel: &CancellationToken, work: F) -> SubmitOutcome
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
    {
        let completed_tx = self.completed_tx.clone();
        let outcome = self
            .gate
            .submit(cancel, async move {
                // The receiver outlives all tasks unless the ledger was
                // dropped, in which case nobody cares about the result.
                let _ = completed_tx.send(work.await);
            })
            .await;

        if outcome.is_accepted() {
            *self.pending.lock().unwrap() += 1;
        }
        outcome
    }

    /// Waits for every completion submitted since the last drain.
    ///
    /// Snapshots the pending count (K), then receives exactly K
    /// completions: `Ok` values go to `on_result`, failures to
    /// `on_failure`. A failure handler returning `Err` aborts the
    /// drain, which returns that error; completions not yet harvested
    /// stay counted for the next call.
    ///
    /// If `cancel` fires while waiting, the drain stops early and
    /// reports the remainder in [`Drained::remaining`] — nothing is
    /// lost, the next drain accounts for it.
    pub async fn drain_and_wait<P, H>(
        &self,
        cancel: &CancellationToken,
        mut on_result: P,
        mut on_failure: H,
    ) -> Result<Drained, E>
    where
        P: FnMut(T),
        H: FnMut(E) -> Result<(), E>,
    {
        // One drain at a time; submits stay concurrent. The snapshot
        // is taken under the drain lock, so a second drainer sees only
        // what the first one left behind.
        let mut completed_rx = self.completed_rx.lock().await;
        let target = *self.pending.lock().unwrap();
        if target == 0 {
            return Ok(Drained {
                harvested: 0,
                remaining: 0,
            });
        }
        let mut harvested = 0usize;

        while harvested < target {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let remaining = target - harvested;
                    warn!(harvested, remaining, "drain cancelled; remainder stays queued");
                    return Ok(Drained { harvested, remaining });
                }
                next = completed_rx.recv() => next,
            };

            // The sender lives in `self`, so the channel cannot close
            // while we hold `&self`.
            let Some(result) = next else { break };
            *self.pending.lock().unwrap() -= 1;
            harvested += 1;

            match result {
                Ok(value) => on_result(value),
                Err(failure) => {
                    if let Err(failure) = on_failure(failure) {
                        debug!(harvested, "drain aborted by failure handler");
                        return Err(failure);
                    }
                }
            }
        }

        Ok(Drained {
            harvested,
            remaining: target - harvested,
        })
    }

    /// Submissions accepted but not yet harvested.
    pub fn pending(&self) -> usize {
        *self.pending.lock().unwrap()
    }
}

impl<T, E> CompletionLedger<T, E>
where
    T: Send + 'static,
    E: Send + 'static + std::fmt::Display,
{
    /// Drains, discarding values and logging failures at `warn`.
    pub async fn drain(&self, cancel: &CancellationToken) -> Drained {
        let drained = self
            .drain_and_wait(cancel, |_| {}, |failure| {
                warn!(error = %failure, "submitted work failed");
                Ok(())
            })
            .await;
        match drained {
            Ok(d) => d,
            // The logging handler never aborts.
            Err(_) => unreachable!(),
        }
    }
}
