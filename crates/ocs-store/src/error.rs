//! Error types for the optimistic store.

use ocs_mutation::{MutationError, RebaseError};
use ocs_sequencer::OutOfSyncError;
use thiserror::Error;

/// Errors reported by a [`Backend`](crate::Backend).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Transaction {transaction} rejected: {reason}")]
    Rejected { transaction: String, reason: String },
}

/// Errors reported by a [`PatchCodec`](crate::PatchCodec).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("Effect computed from revision {expected:?} cannot be applied to revision {actual:?}")]
    BaseMismatch {
        expected: Option<String>,
        actual: Option<String>,
    },

    #[error("Malformed effect: {0}")]
    Malformed(String),
}

/// Errors surfaced by the store.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error(transparent)]
    Mutation(#[from] MutationError),

    #[error(transparent)]
    Rebase(#[from] RebaseError),

    #[error(transparent)]
    OutOfSync(#[from] OutOfSyncError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Connect failed: {0}")]
    Connect(#[source] BackendError),

    #[error("Fetch failed: {0}")]
    Fetch(#[source] BackendError),

    #[error("Submit failed: {0}")]
    Submit(#[source] BackendError),

    #[error("A submission is already in flight")]
    AlreadySubmitting,
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
