//! Events delivered to document subscribers.

use crate::error::StoreError;
use crate::machine::ConnectionState;
use ocs_mutation::{DocumentState, Mutation, MutationGroup, RebaseError};
use ocs_sequencer::MutationEvent;

/// Remote and local state of a document after an event.
#[derive(Clone, Debug, PartialEq)]
pub struct DocumentView {
    pub remote: DocumentState,
    /// The remote state with every staged mutation replayed on top.
    pub local: DocumentState,
    /// Staged groups touching the document.
    pub outbox: Vec<MutationGroup>,
}

#[derive(Clone, Debug)]
pub enum DocumentEvent {
    /// A fresh snapshot was loaded.
    Sync { id: String, view: DocumentView },
    /// A local mutation was staged and applied optimistically.
    Optimistic {
        id: String,
        mutations: Vec<Mutation>,
        view: DocumentView,
    },
    /// A remote mutation was applied. `echo` is set for our own submissions.
    Remote {
        id: String,
        event: MutationEvent,
        echo: bool,
        view: DocumentView,
    },
    Status { id: String, state: ConnectionState },
    /// Staged mutations no longer apply on top of the remote state. The
    /// previous local state is kept until the conflict is resolved, for
    /// example with [`OptimisticStore::discard_staged`](crate::OptimisticStore::discard_staged).
    RebaseFailed { id: String, error: RebaseError },
    /// The remote stream was abandoned and will be re-established.
    OutOfSync { id: String, error: StoreError },
    Reconnect { id: String },
}

impl DocumentEvent {
    pub fn id(&self) -> &str {
        match self {
            DocumentEvent::Sync { id, .. }
            | DocumentEvent::Optimistic { id, .. }
            | DocumentEvent::Remote { id, .. }
            | DocumentEvent::Status { id, .. }
            | DocumentEvent::RebaseFailed { id, .. }
            | DocumentEvent::OutOfSync { id, .. }
            | DocumentEvent::Reconnect { id } => id,
        }
    }

    /// The view carried by the event, if any.
    pub fn view(&self) -> Option<&DocumentView> {
        match self {
            DocumentEvent::Sync { view, .. }
            | DocumentEvent::Optimistic { view, .. }
            | DocumentEvent::Remote { view, .. } => Some(view),
            DocumentEvent::Status { .. }
            | DocumentEvent::RebaseFailed { .. }
            | DocumentEvent::OutOfSync { .. }
            | DocumentEvent::Reconnect { .. } => None,
        }
    }
}
