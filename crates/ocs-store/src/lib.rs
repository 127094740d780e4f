//! # ocs-store
//!
//! Optimistic document store for Sardonyx.
//!
//! Edits are applied to a local snapshot immediately and staged in an outbox.
//! Remote changes arrive on a per-document listener stream, are put back into
//! causal order by the sequencer, and every staged edit is rebased on top of
//! each new remote snapshot. Submitting compacts and sends the outbox; edits
//! made meanwhile are stashed and never lost.
//!
//! This crate provides:
//! - [`OptimisticStore`]: the `mutate` / `transaction` / `listen` / `optimize` /
//!   `submit` surface
//! - [`Machine`]: the pure per-document connection state machine
//! - [`Backend`] and [`PatchCodec`]: the collaborator seams
//! - [`MemoryBackend`] and [`SnapshotCodec`]: an in-process implementation
//!
//! ## Example
//!
//! ```rust
//! use futures::StreamExt;
//! use ocs_mutation::Mutation;
//! use ocs_store::{MemoryBackend, OptimisticStore, SnapshotCodec, StoreConfig};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let backend = MemoryBackend::new();
//! let store = OptimisticStore::new(backend.clone(), SnapshotCodec, StoreConfig::default());
//!
//! let mut events = store.listen("greeting");
//! store.mutate(vec![Mutation::create(json!({"_id": "greeting", "text": "hi"}))]).unwrap();
//! assert!(store.get_local("greeting").is_present());
//!
//! store.submit().await.unwrap();
//! assert!(backend.document("greeting").is_some());
//! # let _ = events.next().await;
//! # });
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod event;
pub mod machine;
pub mod memory;
mod pipeline;
pub mod retry;
pub mod store;
pub mod subscription;

pub use backend::{Backend, PatchCodec, RemoteMessage, RemoteStream, SubmitResult};
pub use config::{StoreConfig, StoreConfigBuilder};
pub use error::{BackendError, CodecError, Result, StoreError};
pub use event::{DocumentEvent, DocumentView};
pub use machine::{ConnectedState, ConnectionState, Effect, LoadedState, Machine, MachineEvent};
pub use memory::{FaultPlan, MemoryBackend, SnapshotCodec, SnapshotEffect};
pub use retry::RetryConfig;
pub use store::{OptimisticStore, WarnOnce};
pub use subscription::DocumentSubscription;
