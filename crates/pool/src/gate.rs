//! Permit gate: a concurrency cap over task spawning.
//!
//! The tokio runtime accepts any number of spawned tasks; the gate
//! makes it behave as if it ran at most `bound` of ours at a time by
//! suspending the *submitting* task until a permit frees up. The bound
//! is the only coordination primitive — no per-task handles are
//! returned.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Outcome of a [`PermitGate::submit`] call.
///
/// Submission is not a void side effect: callers that need delivery
/// guarantees can see exactly which work never started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// A permit was acquired and the work was spawned.
    Accepted,
    /// The gate was closed before a permit could be acquired; the work
    /// was not spawned.
    Rejected,
    /// The caller's cancellation token fired while waiting for a
    /// permit; the work was not spawned.
    Cancelled,
}

impl SubmitOutcome {
    /// Returns `true` if the work was actually spawned.
    pub fn is_accepted(self) -> bool {
        matches!(self, SubmitOutcome::Accepted)
    }
}

/// Caps concurrent execution of submitted tasks at a fixed bound.
///
/// Cloneable via `Arc`; safe to submit from many tasks at once. At any
/// instant, permits issued minus permits released never exceeds the
/// bound: each spawned task owns its permit and releases it on drop,
/// whether it completed, errored, or panicked.
pub struct PermitGate {
    semaphore: Arc<Semaphore>,
    bound: usize,
}

impl PermitGate {
    /// Creates a gate allowing `bound` concurrently-executing tasks.
    pub fn new(bound: usize) -> Result<Self, crate::PoolError> {
        if bound == 0 {
            return Err(crate::PoolError::InvalidBound);
        }
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(bound)),
            bound,
        })
    }

    /// Waits for a permit, then spawns `work` on the runtime.
    ///
    /// If `cancel` fires first the work is abandoned — it is never
    /// spawned without a permit, so the bound holds even across
    /// cancelled submissions. A closed gate rejects without leaking
    /// a permit.
    pub async fn submit<F>(&self, cancel: &CancellationToken, work: F) -> SubmitOutcome
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("submission cancelled while waiting for a permit");
                return SubmitOutcome::Cancelled;
            }
            acquired = self.semaphore.clone().acquire_owned() => {
                match acquired {
                    Ok(p) => p,
                    Err(_) => {
                        warn!("gate closed; submission dropped");
                        return SubmitOutcome::Rejected;
                    }
                }
            }
        };

        tokio::spawn(async move {
            // Hold the permit for the task's whole lifetime; dropping
            // it releases the slot even if `work` panics.
            let _permit = permit;
            work.await;
        });
        SubmitOutcome::Accepted
    }

    /// Closes the gate. Future submissions are rejected; tasks already
    /// running finish normally.
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// The configured concurrency bound.
    pub fn bound(&self) -> usize {
        self.bound
    }

    /// Permits currently free.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}
