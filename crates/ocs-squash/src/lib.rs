//! # ocs-squash
//!
//! Outbox compaction for the Sardonyx optimistic store.
//!
//! Before staged mutations are submitted they pass through two rewrites that
//! keep their effect on the remote store unchanged:
//!
//! - Squashing: merge adjacent groups and patches, drop overwritten node patches
//! - Text-diff compaction: turn string `set`s into diff-match-patch deltas
//!   against the last known remote value, so concurrent edits to other parts
//!   of the same string survive
//!
//! ## Example
//!
//! ```rust
//! use ocs_mutation::{Mutation, MutationGroup};
//! use ocs_patch::{NodePatch, Operation};
//! use ocs_squash::Squasher;
//! use serde_json::json;
//!
//! let set = |v| NodePatch::at("title", Operation::Set { value: json!(v) }).unwrap();
//! let mut squasher = Squasher::new();
//! let outbox = squasher.squash(vec![
//!     MutationGroup::new(vec![Mutation::patch("a", vec![set("one")])]),
//!     MutationGroup::new(vec![Mutation::patch("a", vec![set("two")])]),
//! ]);
//! assert_eq!(outbox.len(), 1);
//! assert_eq!(squasher.stats().patches_dropped, 1);
//! ```

mod compact;
mod squash;

pub use compact::patched_ids;
pub use squash::{drop_superseded, merge_groups, merge_patches, SquashConfig, Squasher};

/// Counters accumulated by a [`Squasher`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SquashStats {
    /// Calls to [`Squasher::squash`].
    pub squash_runs: u64,

    /// Groups removed by concatenation.
    pub groups_merged: u64,

    /// Mutations removed by patch merging.
    pub mutations_merged: u64,

    /// Node patches removed because a later patch overwrote them.
    pub patches_dropped: u64,

    /// String `set`s rewritten as diff-match-patch deltas.
    pub dmp_rewrites: u64,
}
