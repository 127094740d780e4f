//! Collaborators the store talks to: the remote backend and the patch codec.

use crate::error::{BackendError, CodecError};
use async_trait::async_trait;
use futures::Stream;
use ocs_mutation::{Document, Transaction, TransactionId};
use ocs_sequencer::MutationEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;

/// A message on a document's remote change stream.
#[derive(Clone, Debug, PartialEq)]
pub enum RemoteMessage {
    /// The subscription is live. Sent first, and again after a reconnect.
    Welcome,
    Mutation(MutationEvent),
    /// The transport dropped and came back; events may have been lost.
    Reconnect,
}

/// Stream of remote messages for one document.
pub type RemoteStream = Pin<Box<dyn Stream<Item = RemoteMessage> + Send>>;

/// Outcome of one committed transaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResult {
    pub transaction_id: TransactionId,
    /// Documents the transaction changed.
    pub document_ids: Vec<String>,
}

/// The authoritative remote store.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Subscribe to changes of a document.
    async fn observe(&self, id: &str) -> Result<RemoteStream, BackendError>;

    /// Fetch the current snapshot of a document, `None` when it does not exist.
    async fn fetch(&self, id: &str) -> Result<Option<Document>, BackendError>;

    /// Commit transactions in order.
    async fn submit(&self, transactions: Vec<Transaction>)
        -> Result<Vec<SubmitResult>, BackendError>;
}

/// Applies the opaque effect of a remote mutation event to a snapshot.
pub trait PatchCodec: Send + Sync + 'static {
    /// Compute the document after `effect`, `None` when it was deleted.
    ///
    /// Must fail when `effect` was not computed from `base_revision`.
    fn apply(
        &self,
        base: Option<&Document>,
        base_revision: Option<&str>,
        effect: &Value,
    ) -> Result<Option<Document>, CodecError>;
}
