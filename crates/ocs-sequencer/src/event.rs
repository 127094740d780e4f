//! Remote listener events.

use ocs_mutation::{revision, Document};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// How a remote mutation changed the document's existence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Transition {
    Appear,
    Update,
    Disappear,
}

/// A remote change notification for one document.
///
/// Events form a causal chain: `event.previous_rev == prior.result_rev`.
/// `previous_rev` is `None` when the document did not exist before.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationEvent {
    pub id: String,
    pub previous_rev: Option<String>,
    pub result_rev: String,
    pub transition: Transition,
    /// Transaction that produced this change, used to recognise our own echoes.
    #[serde(default)]
    pub transaction_id: Option<String>,
    /// Opaque delta consumed by the patch codec.
    pub effect: Value,
}

/// An event on the remote listener stream of a document.
#[derive(Clone, Debug, PartialEq)]
pub enum ListenerEvent {
    /// Full snapshot. Resets all sequencing state.
    Sync { document: Option<Document> },
    Mutation(MutationEvent),
    /// Transport discontinuity.
    Reconnect,
}

/// Last causally applied position in a document's history.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Base {
    /// No snapshot has been seen yet.
    #[default]
    AwaitingSync,
    /// The document does not exist.
    Absent,
    Revision(String),
}

impl Base {
    /// Base position of a snapshot.
    pub fn of_snapshot(document: Option<&Document>) -> Self {
        match document.and_then(revision) {
            Some(rev) => Base::Revision(rev.to_string()),
            None => Base::Absent,
        }
    }

    /// Whether `event` directly follows this base.
    pub fn is_followed_by(&self, event: &MutationEvent) -> bool {
        match (self, event.previous_rev.as_deref()) {
            (Base::Absent, None) => true,
            (Base::Revision(rev), Some(previous)) => rev == previous,
            _ => false,
        }
    }

    pub fn revision(&self) -> Option<&str> {
        match self {
            Base::Revision(rev) => Some(rev),
            Base::AwaitingSync | Base::Absent => None,
        }
    }

    /// Base after applying `event`.
    pub fn after(event: &MutationEvent) -> Self {
        match event.transition {
            Transition::Disappear => Base::Absent,
            Transition::Appear | Transition::Update => Base::Revision(event.result_rev.clone()),
        }
    }
}

impl fmt::Display for Base {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Base::AwaitingSync => write!(f, "<awaiting sync>"),
            Base::Absent => write!(f, "<absent>"),
            Base::Revision(rev) => write!(f, "{}", rev),
        }
    }
}
