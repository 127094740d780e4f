//! # ocs-mutation
//!
//! Document mutations for the Sardonyx optimistic store.
//!
//! This crate provides:
//! - Tri-valued document state (unknown / absent / present)
//! - Whole-document mutations, mutation groups and transactions
//! - The mutation executor producing created / updated / deleted / noop outcomes
//! - Rebase of staged mutation groups onto a new remote snapshot
//!
//! ## Example
//!
//! ```rust
//! use ocs_mutation::{rebase, DocumentState, Mutation, MutationGroup};
//! use serde_json::json;
//!
//! let remote = DocumentState::Absent;
//! let outbox = vec![MutationGroup::new(vec![Mutation::create(json!({"_id": "a"}))])];
//! let rebased = rebase("a", &remote, &remote, &outbox).unwrap();
//! assert!(rebased.local.is_present());
//! ```

pub mod document;
pub mod error;
pub mod executor;
pub mod mutation;
pub mod rebase;

pub use document::{document_id, revision, Document, DocumentState, ID_FIELD, REV_FIELD};
pub use error::{ErrorKind, MutationError, RebaseError, Result};
pub use executor::{apply_mutation, apply_to_map, next_document, MutationOutcome};
pub use mutation::{Mutation, MutationGroup, PatchOptions, Transaction, TransactionId};
pub use rebase::{apply_groups, rebase, Rebased};
