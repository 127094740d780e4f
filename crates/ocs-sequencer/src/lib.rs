//! # ocs-sequencer
//!
//! Causal sequencing of remote listener events for the Sardonyx optimistic store.
//!
//! Remote change notifications link into a chain by revision
//! (`previous_rev -> result_rev`). This crate buffers events that arrive out of
//! order, drops duplicates and already-applied events, and releases mutations
//! only once they chain onto the last applied revision.
//!
//! - [`Sequencer`]: the synchronous core, driven one event at a time
//! - [`sequenced`]: an async stream adapter with deadline handling

pub mod chain;
pub mod error;
pub mod event;
pub mod sequencer;
pub mod stream;

pub use chain::{discard_chain_to, to_ordered_chains};
pub use error::{OutOfSyncError, OutOfSyncState, Result};
pub use event::{Base, ListenerEvent, MutationEvent, Transition};
pub use sequencer::{Sequenced, Sequencer, SequencerConfig, SequencerConfigBuilder};
pub use stream::{sequenced, sleep_until};
