//! Bounded-concurrency task submission with bulk result harvesting.
//!
//! Two coordination wrappers over the tokio runtime:
//!
//! - [`PermitGate`] caps how many submitted tasks may execute at once.
//!   Submitters wait for a permit instead of queueing unbounded work.
//! - [`CompletionLedger`] counts submissions and harvests exactly that
//!   many completed results in one call, in completion order, without
//!   per-submission bookkeeping on the caller's side.
//!
//! The upload engine submits one "send chunk" future per file part
//! through a ledger built over a gate, then drains once all parts of a
//! change set are in.

mod gate;
mod ledger;

pub use gate::{PermitGate, SubmitOutcome};
pub use ledger::{CompletionLedger, Drained};

/// Errors produced when constructing pool primitives.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("concurrency bound must be at least 1")]
    InvalidBound,
}
