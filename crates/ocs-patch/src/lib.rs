//! # ocs-patch
//!
//! Path-addressed patch algebra for the Sardonyx optimistic store.
//!
//! This crate provides:
//! - **Paths**: property names, array indices and `_key` selectors
//! - **Operations**: pure value transforms (`set`, `insert`, `inc`, ...)
//! - **Patch engine**: copy-on-write application that preserves untouched subtrees
//! - **DMP codec**: diff-match-patch text deltas for compact string edits
//!
//! ## Example
//!
//! ```rust
//! use ocs_patch::{apply_patch, NodePatch, Operation};
//! use serde_json::json;
//!
//! let doc = json!({"title": "Hello"});
//! let patch = NodePatch::at("title", Operation::Set { value: json!("Hi") }).unwrap();
//! let next = apply_patch(&patch, &doc).unwrap();
//! assert_eq!(next["title"], "Hi");
//! ```

pub mod apply;
pub mod dmp;
pub mod error;
pub mod operation;
pub mod path;

pub use apply::{apply_patch, apply_patches, NodePatch};
pub use dmp::{DmpError, DmpPatch};
pub use error::{OperationError, PatchError, Result};
pub use operation::{Effect, Operation, Position};
pub use path::{ItemRef, Lookup, Path, PathSegment, KEY_FIELD};
