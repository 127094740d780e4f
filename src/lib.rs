//! # Sardonyx
//!
//! A locally editable, eventually consistent mirror of remote JSON documents.
//!
//! - [`patch`]: paths, node patch operations and the diff-match-patch codec
//! - [`mutation`]: document mutations, the executor and rebase
//! - [`sequencer`]: causal ordering of remote change notifications
//! - [`squash`]: outbox squashing and text-diff compaction
//! - [`store`]: the optimistic store itself
//!
//! The most common types are re-exported at the top level.

pub use ocs_mutation as mutation;
pub use ocs_patch as patch;
pub use ocs_sequencer as sequencer;
pub use ocs_squash as squash;
pub use ocs_store as store;

pub use ocs_mutation::{Document, DocumentState, Mutation, MutationGroup, TransactionId};
pub use ocs_patch::{NodePatch, Operation};
pub use ocs_store::{
    Backend, DocumentEvent, MemoryBackend, OptimisticStore, SnapshotCodec, StoreConfig,
    StoreConfigBuilder, StoreError,
};
