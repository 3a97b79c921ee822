//! Typed error taxonomy for the message pipeline.
//!
//! Call sites that aggregate across subsystems (service wiring, loop
//! drivers) still use `anyhow::Result`; this enum exists so that code
//! branching on error *kind* (the selector's fatal-sender check, the push
//! orchestrator's already-in-mpool suppression) matches on a variant
//! instead of re-deriving the classification from a string each time.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MessagerError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("routing failed for {addr}: {reason}")]
    Routing { addr: String, reason: String },

    #[error("gas estimation failed for sender state (fatal, aborting address {addr}): {detail}")]
    EstimationFatalSender { addr: String, detail: String },

    #[error("gas estimation failed (transient) for message {message_id}: {detail}")]
    EstimationTransient { message_id: String, detail: String },

    #[error("signing failed for message {message_id}: {detail}")]
    Signing { message_id: String, detail: String },

    #[error("chain rpc error: {0}")]
    ChainRpc(String),

    #[error("consistency violation: {0}")]
    Consistency(String),

    #[error("repository write failed, batch rolled back: {0}")]
    Store(String),

    #[error("message already in mpool")]
    AlreadyInMpool,
}

impl MessagerError {
    /// True for the subset of variants that are recoverable at the process
    /// level (everything except a store/consistency failure mid-transaction,
    /// which the caller should already have rolled back before this is
    /// observed).
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, MessagerError::Store(_))
    }
}

/// One error observed while processing a single message during a selector
/// cycle; recorded in [`crate::selector::SelectResult::errs`] and persisted
/// into the message's `return_value`.
#[derive(Debug, Clone)]
pub struct MessageError {
    pub message_id: String,
    pub phase: ErrorPhase,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPhase {
    GasEstimate,
    Sign,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_are_not_recoverable() {
        assert!(!MessagerError::Store("disk full".into()).is_recoverable());
        assert!(MessagerError::AlreadyInMpool.is_recoverable());
    }
}
