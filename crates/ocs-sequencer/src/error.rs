//! Error types for the sequencer.

use crate::event::{Base, MutationEvent};
use thiserror::Error;

/// Sequencer state at the time it gave up.
#[derive(Clone, Debug, PartialEq)]
pub struct OutOfSyncState {
    pub base: Base,
    pub buffered: Vec<MutationEvent>,
}

/// The remote stream cannot be turned back into a causal chain.
///
/// Fatal to the stream; recovery requires a fresh subscription and sync.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OutOfSyncError {
    #[error("Too many unchainable events buffered ({}) on base {}", .0.buffered.len(), .0.base)]
    MaxBufferExceeded(OutOfSyncState),

    #[error("Could not resolve event chain within deadline ({} buffered on base {})", .0.buffered.len(), .0.base)]
    DeadlineExceeded(OutOfSyncState),
}

impl OutOfSyncError {
    pub fn state(&self) -> &OutOfSyncState {
        match self {
            OutOfSyncError::MaxBufferExceeded(state) | OutOfSyncError::DeadlineExceeded(state) => {
                state
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, OutOfSyncError>;
