//! In-process backend for tests and simulation.
//!
//! [`MemoryBackend`] is an authoritative document map. Every committed
//! transaction produces one [`MutationEvent`] per changed document, fanned out
//! to all observers over a broadcast channel. Revisions are short SHA-256
//! digests of the previous revision and the transaction id.
//!
//! Failures can be scripted with [`MemoryBackend::fail_connects`],
//! [`MemoryBackend::fail_fetches`] and [`MemoryBackend::fail_submits`], and
//! transport discontinuities with [`MemoryBackend::inject_reconnect`].

use crate::backend::{Backend, PatchCodec, RemoteMessage, RemoteStream, SubmitResult};
use crate::error::{BackendError, CodecError};
use async_stream::stream;
use async_trait::async_trait;
use chrono::Utc;
use ocs_mutation::{apply_to_map, document::with_revision, revision, Document, Transaction};
use ocs_sequencer::{MutationEvent, Transition};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, trace};

const CREATED_AT: &str = "_createdAt";
const UPDATED_AT: &str = "_updatedAt";

#[derive(Clone, Debug)]
enum Broadcast {
    Mutation(MutationEvent),
    Reconnect,
}

/// Scripted failures, consumed one per call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FaultPlan {
    pub connect: u32,
    pub fetch: u32,
    pub submit: u32,
}

fn take(counter: &mut u32) -> bool {
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

#[derive(Default)]
struct MemoryState {
    documents: HashMap<String, Document>,
    faults: FaultPlan,
    commits: u64,
}

/// Shared in-memory backend. Clones share the same documents.
#[derive(Clone)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
    events: broadcast::Sender<Broadcast>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            events,
        }
    }

    /// Backend seeded with documents, each given an initial revision.
    pub fn with_documents(documents: impl IntoIterator<Item = Document>) -> Self {
        let backend = Self::new();
        {
            let mut state = backend.state.lock();
            for doc in documents {
                let Some(id) = ocs_mutation::document_id(&doc).map(str::to_string) else {
                    continue;
                };
                let rev = next_revision(None, &id);
                state.documents.insert(id, with_revision(doc, Some(&rev)));
            }
        }
        backend
    }

    pub fn document(&self, id: &str) -> Option<Document> {
        self.state.lock().documents.get(id).cloned()
    }

    pub fn documents(&self) -> HashMap<String, Document> {
        self.state.lock().documents.clone()
    }

    /// Number of committed transactions.
    pub fn commits(&self) -> u64 {
        self.state.lock().commits
    }

    /// Number of live observer streams.
    pub fn observers(&self) -> usize {
        self.events.receiver_count()
    }

    pub fn fail_connects(&self, count: u32) {
        self.state.lock().faults.connect = count;
    }

    pub fn fail_fetches(&self, count: u32) {
        self.state.lock().faults.fetch = count;
    }

    pub fn fail_submits(&self, count: u32) {
        self.state.lock().faults.submit = count;
    }

    /// Tell every observer the transport dropped.
    pub fn inject_reconnect(&self) {
        let _ = self.events.send(Broadcast::Reconnect);
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn observe(&self, id: &str) -> Result<RemoteStream, BackendError> {
        if take(&mut self.state.lock().faults.connect) {
            return Err(BackendError::ConnectionFailed(format!(
                "scripted connect failure for {}",
                id
            )));
        }

        let mut rx = self.events.subscribe();
        let id = id.to_string();
        Ok(Box::pin(stream! {
            yield RemoteMessage::Welcome;
            loop {
                match rx.recv().await {
                    Ok(Broadcast::Mutation(event)) => {
                        if event.id == id {
                            yield RemoteMessage::Mutation(event);
                        }
                    }
                    Ok(Broadcast::Reconnect) | Err(RecvError::Lagged(_)) => {
                        yield RemoteMessage::Reconnect;
                        yield RemoteMessage::Welcome;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }))
    }

    async fn fetch(&self, id: &str) -> Result<Option<Document>, BackendError> {
        let mut state = self.state.lock();
        if take(&mut state.faults.fetch) {
            return Err(BackendError::Unavailable(format!(
                "scripted fetch failure for {}",
                id
            )));
        }
        Ok(state.documents.get(id).cloned())
    }

    async fn submit(
        &self,
        transactions: Vec<Transaction>,
    ) -> Result<Vec<SubmitResult>, BackendError> {
        let (results, events) = {
            let mut state = self.state.lock();
            if take(&mut state.faults.submit) {
                return Err(BackendError::Unavailable(
                    "scripted submit failure".to_string(),
                ));
            }

            let mut documents = state.documents.clone();
            let mut results = Vec::with_capacity(transactions.len());
            let mut events = Vec::new();
            for tx in &transactions {
                let (result, tx_events) = commit(&mut documents, tx)?;
                results.push(result);
                events.extend(tx_events);
            }
            state.documents = documents;
            state.commits += transactions.len() as u64;
            (results, events)
        };

        debug!(
            transactions = results.len(),
            events = events.len(),
            "committed transactions"
        );
        for event in events {
            let _ = self.events.send(Broadcast::Mutation(event));
        }
        Ok(results)
    }
}

/// Apply one transaction to `documents`, returning its result and events.
fn commit(
    documents: &mut HashMap<String, Document>,
    tx: &Transaction,
) -> Result<(SubmitResult, Vec<MutationEvent>), BackendError> {
    let ids: Vec<String> = tx.document_ids().into_iter().map(str::to_string).collect();
    let before: Vec<Option<Document>> = ids.iter().map(|id| documents.get(id).cloned()).collect();

    apply_to_map(documents, &tx.mutations).map_err(|e| BackendError::Rejected {
        transaction: tx.id.to_string(),
        reason: e.to_string(),
    })?;

    let now = Utc::now().to_rfc3339();
    let mut changed = Vec::new();
    let mut events = Vec::new();
    for (id, before) in ids.into_iter().zip(before) {
        let after = documents.get(&id).cloned();
        if after == before {
            continue;
        }

        let previous_rev = before.as_ref().and_then(revision).map(str::to_string);
        let result_rev = next_revision(previous_rev.as_deref(), tx.id.as_str());
        let (after, transition) = match (&before, after) {
            (_, None) => (None, Transition::Disappear),
            (None, Some(doc)) => (Some(stamp(doc, &result_rev, &now, true)), Transition::Appear),
            (Some(_), Some(doc)) => (Some(stamp(doc, &result_rev, &now, false)), Transition::Update),
        };
        if let Some(doc) = &after {
            documents.insert(id.clone(), doc.clone());
        }
        trace!(id = %id, rev = %result_rev, ?transition, "document changed");

        events.push(MutationEvent {
            id: id.clone(),
            previous_rev: previous_rev.clone(),
            result_rev,
            transition,
            transaction_id: Some(tx.id.to_string()),
            effect: json!({ "baseRevision": previous_rev, "document": after }),
        });
        changed.push(id);
    }

    Ok((
        SubmitResult {
            transaction_id: tx.id.clone(),
            document_ids: changed,
        },
        events,
    ))
}

fn stamp(doc: Document, rev: &str, now: &str, created: bool) -> Document {
    let mut doc = with_revision(doc, Some(rev));
    if let Value::Object(map) = &mut doc {
        if created && !map.contains_key(CREATED_AT) {
            map.insert(CREATED_AT.to_string(), Value::String(now.to_string()));
        }
        map.insert(UPDATED_AT.to_string(), Value::String(now.to_string()));
    }
    doc
}

fn next_revision(previous: Option<&str>, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(previous.unwrap_or_default().as_bytes());
    hasher.update(salt.as_bytes());
    hasher
        .finalize()
        .iter()
        .take(8)
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Effect payload produced by [`MemoryBackend`]: the full next document and
/// the revision it was computed from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotEffect {
    pub base_revision: Option<String>,
    pub document: Option<Document>,
}

/// [`PatchCodec`] for [`SnapshotEffect`] payloads.
#[derive(Clone, Copy, Debug, Default)]
pub struct SnapshotCodec;

impl PatchCodec for SnapshotCodec {
    fn apply(
        &self,
        _base: Option<&Document>,
        base_revision: Option<&str>,
        effect: &Value,
    ) -> Result<Option<Document>, CodecError> {
        let effect: SnapshotEffect = serde_json::from_value(effect.clone())
            .map_err(|e| CodecError::Malformed(e.to_string()))?;
        if effect.base_revision.as_deref() != base_revision {
            return Err(CodecError::BaseMismatch {
                expected: effect.base_revision,
                actual: base_revision.map(str::to_string),
            });
        }
        Ok(effect.document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use ocs_mutation::Mutation;

    fn tx(mutations: Vec<Mutation>) -> Transaction {
        Transaction::new(mutations)
    }

    #[tokio::test]
    async fn test_submit_emits_chained_events() {
        let backend = MemoryBackend::new();
        let mut stream = backend.observe("a").await.unwrap();
        assert_eq!(stream.next().await, Some(RemoteMessage::Welcome));

        backend
            .submit(vec![tx(vec![Mutation::create(json!({"_id": "a", "n": 1}))])])
            .await
            .unwrap();
        backend
            .submit(vec![tx(vec![Mutation::delete("a")])])
            .await
            .unwrap();

        let Some(RemoteMessage::Mutation(first)) = stream.next().await else {
            panic!("expected mutation");
        };
        let Some(RemoteMessage::Mutation(second)) = stream.next().await else {
            panic!("expected mutation");
        };
        assert_eq!(first.transition, Transition::Appear);
        assert_eq!(first.previous_rev, None);
        assert_eq!(second.transition, Transition::Disappear);
        assert_eq!(second.previous_rev, Some(first.result_rev.clone()));
        assert_eq!(backend.document("a"), None);
        assert_eq!(backend.commits(), 2);
    }

    #[tokio::test]
    async fn test_rejected_batch_commits_nothing() {
        let backend = MemoryBackend::with_documents(vec![json!({"_id": "a"})]);
        let result = backend
            .submit(vec![
                tx(vec![Mutation::create(json!({"_id": "b"}))]),
                tx(vec![Mutation::create(json!({"_id": "a"}))]),
            ])
            .await;
        assert!(matches!(result, Err(BackendError::Rejected { .. })));
        assert_eq!(backend.document("b"), None);
        assert_eq!(backend.commits(), 0);
    }

    #[tokio::test]
    async fn test_scripted_faults() {
        let backend = MemoryBackend::new();
        backend.fail_connects(1);
        backend.fail_fetches(1);
        assert!(backend.observe("a").await.is_err());
        assert!(backend.observe("a").await.is_ok());
        assert!(backend.fetch("a").await.is_err());
        assert_eq!(backend.fetch("a").await, Ok(None));
    }

    #[tokio::test]
    async fn test_reconnect_is_followed_by_welcome() {
        let backend = MemoryBackend::new();
        let mut stream = backend.observe("a").await.unwrap();
        assert_eq!(stream.next().await, Some(RemoteMessage::Welcome));
        backend.inject_reconnect();
        assert_eq!(stream.next().await, Some(RemoteMessage::Reconnect));
        assert_eq!(stream.next().await, Some(RemoteMessage::Welcome));
    }

    #[test]
    fn test_snapshot_codec_checks_base() {
        let effect = json!({"baseRevision": "r1", "document": {"_id": "a"}});
        assert_eq!(
            SnapshotCodec.apply(None, Some("r1"), &effect),
            Ok(Some(json!({"_id": "a"})))
        );
        assert!(matches!(
            SnapshotCodec.apply(None, Some("r0"), &effect),
            Err(CodecError::BaseMismatch { .. })
        ));
        assert!(matches!(
            SnapshotCodec.apply(None, None, &json!(42)),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn test_revisions_are_distinct() {
        let a = next_revision(None, "tx1");
        let b = next_revision(Some(&a), "tx2");
        assert_eq!(a.len(), 16);
        assert_ne!(a, b);
        assert_eq!(a, next_revision(None, "tx1"));
    }
}
