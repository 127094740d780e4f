//! The optimistic store.
//!
//! Per document the store keeps the remote snapshot, the local (rebased)
//! view and a connection state machine. Staged mutations live in one
//! store-wide outbox; a document's local view is its remote snapshot with
//! every staged mutation for it replayed on top:
//!
//! ```text
//! local = rebase(remote, in-flight(pending) ++ outbox ++ stash)
//! ```
//!
//! - **in-flight**: submitted groups whose echo has not been seen yet
//! - **outbox**: staged groups not yet submitted
//! - **stash**: groups staged while a submission is in flight
//!
//! All state sits behind one lock and is only changed by synchronous
//! reducers. The per-document pipelines do the I/O and feed results back
//! through the same reducers.

use crate::backend::{Backend, PatchCodec, SubmitResult};
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::event::{DocumentEvent, DocumentView};
use crate::machine::{ConnectedState, ConnectionState, LoadedState, Machine, MachineEvent};
use crate::pipeline::{self, Command, PipelineHandle};
use crate::subscription::DocumentSubscription;
use ocs_mutation::{
    rebase, DocumentState, Mutation, MutationError, MutationGroup, Transaction, TransactionId,
};
use ocs_sequencer::{ListenerEvent, MutationEvent};
use ocs_squash::{patched_ids, SquashStats, Squasher};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// A diagnostic that fires at most once per store.
#[derive(Debug, Default)]
pub struct WarnOnce {
    fired: AtomicBool,
}

impl WarnOnce {
    /// Returns `true` the first time it is called.
    pub fn first(&self) -> bool {
        !self.fired.swap(true, Ordering::Relaxed)
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Relaxed)
    }
}

pub(crate) struct DocumentEntry {
    pub(crate) remote: DocumentState,
    pub(crate) local: DocumentState,
    /// Submitted transactions not yet echoed back for this document.
    pub(crate) pending: HashSet<TransactionId>,
    pub(crate) machine: Machine,
    events: broadcast::Sender<DocumentEvent>,
    subscribers: usize,
    /// Bumped on every subscribe; a stale teardown sees a different value.
    generation: u64,
    pipeline: Option<PipelineHandle>,
}

impl DocumentEntry {
    fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            remote: DocumentState::Unknown,
            local: DocumentState::Unknown,
            pending: HashSet::new(),
            machine: Machine::new(),
            events,
            subscribers: 0,
            generation: 0,
            pipeline: None,
        }
    }
}

pub(crate) struct StoreState {
    documents: HashMap<String, DocumentEntry>,
    outbox: Vec<MutationGroup>,
    stash: Vec<MutationGroup>,
    inflight: Vec<MutationGroup>,
    /// Transactions the backend confirmed, awaiting their echo.
    committed: HashSet<TransactionId>,
    submitting: bool,
    squasher: Squasher,
    event_capacity: usize,
}

impl StoreState {
    fn new(event_capacity: usize) -> Self {
        Self {
            documents: HashMap::new(),
            outbox: Vec::new(),
            stash: Vec::new(),
            inflight: Vec::new(),
            committed: HashSet::new(),
            submitting: false,
            squasher: Squasher::new(),
            event_capacity,
        }
    }

    fn entry(&mut self, id: &str) -> &mut DocumentEntry {
        let capacity = self.event_capacity;
        self.documents
            .entry(id.to_string())
            .or_insert_with(|| DocumentEntry::new(capacity))
    }

    fn remote(&self, id: &str) -> DocumentState {
        self.documents
            .get(id)
            .map(|e| e.remote.clone())
            .unwrap_or_default()
    }

    /// Groups replayed on top of the remote snapshot of `id`, in order.
    fn staged_for(&self, id: &str) -> Vec<MutationGroup> {
        let pending = self.documents.get(id).map(|e| &e.pending);
        let inflight = self.inflight.iter().filter(|g| match (&g.id, pending) {
            (Some(tx), Some(pending)) => pending.contains(tx),
            _ => false,
        });
        inflight
            .chain(self.outbox.iter())
            .chain(self.stash.iter())
            .filter(|g| g.touches(id))
            .cloned()
            .collect()
    }

    fn has_staged(&self, id: &str) -> bool {
        self.outbox
            .iter()
            .chain(self.stash.iter())
            .any(|g| g.touches(id))
    }

    fn view(&self, id: &str) -> DocumentView {
        let (remote, local) = self
            .documents
            .get(id)
            .map(|e| (e.remote.clone(), e.local.clone()))
            .unwrap_or_default();
        DocumentView {
            remote,
            local,
            outbox: self
                .outbox
                .iter()
                .chain(self.stash.iter())
                .filter(|g| g.touches(id))
                .cloned()
                .collect(),
        }
    }

    fn emit(&self, id: &str, event: DocumentEvent) {
        if let Some(entry) = self.documents.get(id) {
            let _ = entry.events.send(event);
        }
    }

    /// Feed `event` to the machine of `id` and route its effects.
    pub(crate) fn dispatch(&mut self, id: &str, event: MachineEvent) {
        let Some(entry) = self.documents.get_mut(id) else {
            return;
        };
        let (next, effects) = entry.machine.handle(event);
        let changed = next.state() != entry.machine.state();
        entry.machine = next;

        if let Some(pipeline) = &entry.pipeline {
            for effect in effects {
                pipeline.send(Command::Run(effect));
            }
        }
        if changed {
            let state = entry.machine.state().clone();
            debug!(id = %id, state = %state, "connection state changed");
            let _ = entry.events.send(DocumentEvent::Status {
                id: id.to_string(),
                state,
            });
        }
    }

    /// Recompute the local view of `id` after its remote changed from
    /// `old_remote`, then publish `make_event`.
    fn rebase_and_publish(
        &mut self,
        id: &str,
        old_remote: &DocumentState,
        make_event: impl FnOnce(DocumentView) -> DocumentEvent,
    ) {
        let groups = self.staged_for(id);
        let Some(entry) = self.documents.get_mut(id) else {
            return;
        };
        match rebase(id, old_remote, &entry.remote, &groups) {
            Ok(rebased) => entry.local = rebased.local,
            Err(error) => {
                warn!(id = %id, error = %error, "staged mutations no longer apply");
                let _ = entry.events.send(DocumentEvent::RebaseFailed {
                    id: id.to_string(),
                    error,
                });
            }
        }
        let view = self.view(id);
        self.emit(id, make_event(view));
    }

    fn refresh_local(&mut self, id: &str) {
        let groups = self.staged_for(id);
        if let Some(entry) = self.documents.get_mut(id) {
            if let Ok(rebased) = rebase(id, &entry.remote, &entry.remote, &groups) {
                entry.local = rebased.local;
            }
        }
    }

    /// Drop in-flight groups that no document is waiting for.
    fn prune_inflight(&mut self) {
        let waiting: HashSet<&TransactionId> = self
            .documents
            .values()
            .flat_map(|e| e.pending.iter())
            .collect();
        let (keep, done): (Vec<_>, Vec<_>) = std::mem::take(&mut self.inflight)
            .into_iter()
            .partition(|g| g.id.as_ref().is_some_and(|tx| waiting.contains(tx)));
        for group in done {
            if let Some(tx) = &group.id {
                self.committed.remove(tx);
            }
        }
        self.inflight = keep;
    }

    /// Stop waiting for the echo of the transaction behind `event`.
    fn take_pending(&mut self, id: &str, event: &MutationEvent) -> bool {
        let Some(tx) = event.transaction_id.as_deref() else {
            return false;
        };
        let tx = TransactionId::from_string(tx);
        let removed = self
            .documents
            .get_mut(id)
            .is_some_and(|e| e.pending.remove(&tx));
        if removed {
            self.prune_inflight();
        }
        removed
    }

    /// Events the sequencer dropped may still be echoes we are waiting for.
    pub(crate) fn forget_discarded(&mut self, id: &str, discarded: &[MutationEvent]) {
        let mut changed = false;
        for event in discarded {
            changed |= self.take_pending(id, event);
        }
        if changed {
            self.refresh_local(id);
        }
    }

    /// Apply one sequenced listener event to the document `id`.
    pub(crate) fn apply_remote(
        &mut self,
        id: &str,
        event: ListenerEvent,
        codec: &dyn PatchCodec,
    ) -> Result<()> {
        match event {
            ListenerEvent::Sync { document } => {
                let committed = self.committed.clone();
                let entry = self.entry(id);
                entry.pending.retain(|tx| !committed.contains(tx));
                let old = std::mem::replace(&mut entry.remote, DocumentState::known(document));
                self.prune_inflight();
                self.rebase_and_publish(id, &old, |view| DocumentEvent::Sync {
                    id: id.to_string(),
                    view,
                });
                let dirty = self.has_staged(id);
                self.dispatch(id, MachineEvent::Loaded { dirty });
            }
            ListenerEvent::Mutation(event) => {
                let entry = self.entry(id);
                let next = codec.apply(
                    entry.remote.document(),
                    entry.remote.revision(),
                    &event.effect,
                )?;
                let old = std::mem::replace(&mut entry.remote, DocumentState::known(next));
                let echo = self.take_pending(id, &event);
                self.rebase_and_publish(id, &old, |view| DocumentEvent::Remote {
                    id: id.to_string(),
                    event,
                    echo,
                    view,
                });
            }
            ListenerEvent::Reconnect => {
                self.emit(
                    id,
                    DocumentEvent::Reconnect {
                        id: id.to_string(),
                    },
                );
                self.dispatch(id, MachineEvent::Reconnect);
            }
        }
        Ok(())
    }

    /// Report a broken remote stream and start over.
    pub(crate) fn out_of_sync(&mut self, id: &str, error: StoreError) {
        warn!(id = %id, error = %error, "remote stream out of sync, resubscribing");
        self.emit(
            id,
            DocumentEvent::OutOfSync {
                id: id.to_string(),
                error,
            },
        );
        self.dispatch(id, MachineEvent::OutOfSync);
    }

    /// Documents whose machine is waiting on a submission.
    fn submitting_documents(&self) -> Vec<String> {
        self.documents
            .iter()
            .filter(|(_, e)| {
                matches!(
                    e.machine.state(),
                    ConnectionState::Connected(ConnectedState::Loaded(
                        LoadedState::Submitting
                    ))
                )
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn teardown(&mut self, id: &str, generation: u64) {
        let Some(entry) = self.documents.get(id) else {
            return;
        };
        if entry.subscribers > 0 || entry.generation != generation {
            return;
        }
        debug!(id = %id, "tearing down document listener");
        self.dispatch(id, MachineEvent::Disconnect);
        if let Some(entry) = self.documents.get_mut(id) {
            entry.pipeline = None;
        }
        self.forget_idle(id);
    }

    /// Drop the entry of `id` once nothing refers to it any more.
    fn forget_idle(&mut self, id: &str) {
        let staged = self.has_staged(id);
        let idle = self.documents.get(id).is_some_and(|e| {
            e.subscribers == 0 && e.pipeline.is_none() && e.pending.is_empty() && !staged
        });
        if idle {
            self.documents.remove(id);
        }
    }
}

pub(crate) struct Inner {
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) codec: Arc<dyn PatchCodec>,
    pub(crate) config: StoreConfig,
    pub(crate) state: Mutex<StoreState>,
    warn_once: WarnOnce,
}

/// Handle to an optimistic document store. Clones share the same store.
///
/// Subscribing with [`listen`](Self::listen) must happen inside a Tokio
/// runtime; each subscribed document runs a background pipeline task.
#[derive(Clone)]
pub struct OptimisticStore {
    pub(crate) inner: Arc<Inner>,
}

impl OptimisticStore {
    pub fn new(
        backend: impl Backend,
        codec: impl PatchCodec,
        config: StoreConfig,
    ) -> Self {
        Self::with_backend(Arc::new(backend), Arc::new(codec), config)
    }

    pub fn with_backend(
        backend: Arc<dyn Backend>,
        codec: Arc<dyn PatchCodec>,
        config: StoreConfig,
    ) -> Self {
        let state = Mutex::new(StoreState::new(config.event_capacity));
        Self {
            inner: Arc::new(Inner {
                backend,
                codec,
                config,
                state,
                warn_once: WarnOnce::default(),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<Inner>) -> Self {
        Self { inner }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Stage mutations as a non-transactional group and apply them locally.
    pub fn mutate(&self, mutations: Vec<Mutation>) -> Result<()> {
        self.stage(MutationGroup::new(mutations))
    }

    /// Stage mutations as one atomic transaction.
    pub fn transaction(&self, mutations: Vec<Mutation>) -> Result<TransactionId> {
        self.transaction_with_id(TransactionId::new(), mutations)
    }

    pub fn transaction_with_id(
        &self,
        id: TransactionId,
        mutations: Vec<Mutation>,
    ) -> Result<TransactionId> {
        self.stage(MutationGroup::transactional_with_id(id.clone(), mutations))?;
        Ok(id)
    }

    fn stage(&self, group: MutationGroup) -> Result<()> {
        let mut ids: Vec<String> = Vec::new();
        for mutation in &group.mutations {
            let id = mutation.document_id().ok_or(MutationError::MissingId)?;
            if !ids.iter().any(|i| i == id) {
                ids.push(id.to_string());
            }
        }

        let mut state = self.inner.state.lock();

        // Validate against every affected document before staging anything.
        // A document whose remote is still unknown only fails on conflicts
        // that no snapshot could resolve.
        let mut locals = Vec::with_capacity(ids.len());
        for id in &ids {
            let remote = state.remote(id);
            let mut groups = state.staged_for(id);
            groups.push(group.clone());
            let rebased = rebase(id, &remote, &remote, &groups)?;
            locals.push(rebased.local);
        }

        if state.submitting {
            state.stash.push(group.clone());
        } else {
            state.outbox.push(group.clone());
        }

        for (id, local) in ids.iter().zip(locals) {
            let entry = state.entry(id);
            if entry.subscribers == 0 && self.inner.warn_once.first() {
                warn!(
                    id = %id,
                    "mutating a document without an active subscription; its remote state is unknown"
                );
            }
            entry.local = local;
            let view = state.view(id);
            state.emit(
                id,
                DocumentEvent::Optimistic {
                    id: id.clone(),
                    mutations: group.mutations_for(id).cloned().collect(),
                    view,
                },
            );
            state.dispatch(id, MachineEvent::Mutated);
        }
        Ok(())
    }

    /// Subscribe to a document.
    ///
    /// The first subscriber starts the document's pipeline. The returned
    /// stream first yields the current connection status.
    pub fn listen(&self, id: impl Into<String>) -> DocumentSubscription {
        let id = id.into();
        let mut state = self.inner.state.lock();
        let entry = state.entry(&id);
        entry.subscribers += 1;
        entry.generation += 1;
        if entry.pipeline.is_none() {
            entry.pipeline = Some(pipeline::spawn(
                Arc::downgrade(&self.inner),
                id.clone(),
                &self.inner.config,
            ));
            state.dispatch(&id, MachineEvent::Connect);
        }

        let entry = state.entry(&id);
        let receiver = entry.events.subscribe();
        let initial = DocumentEvent::Status {
            id: id.clone(),
            state: entry.machine.state().clone(),
        };
        drop(state);
        DocumentSubscription::new(self.clone(), id, receiver, initial)
    }

    /// Called when a subscription is dropped.
    pub(crate) fn release(&self, id: &str) {
        let generation = {
            let mut state = self.inner.state.lock();
            let Some(entry) = state.documents.get_mut(id) else {
                return;
            };
            entry.subscribers = entry.subscribers.saturating_sub(1);
            if entry.subscribers > 0 {
                return;
            }
            entry.generation
        };

        let keep_alive = self.inner.config.keep_alive();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let inner: Weak<Inner> = Arc::downgrade(&self.inner);
                let id = id.to_string();
                handle.spawn(async move {
                    tokio::time::sleep(keep_alive).await;
                    if let Some(inner) = inner.upgrade() {
                        inner.state.lock().teardown(&id, generation);
                    }
                });
            }
            Err(_) => self.inner.state.lock().teardown(id, generation),
        }
    }

    /// Squash the outbox in place.
    pub fn optimize(&self) -> SquashStats {
        let mut state = self.inner.state.lock();
        let outbox = std::mem::take(&mut state.outbox);
        state.outbox = state.squasher.squash(outbox);
        state.squasher.stats().clone()
    }

    /// Submit the outbox.
    ///
    /// Each staged group becomes one transaction. String `set`s are compacted
    /// into diff-match-patch deltas against the current remote snapshot. Edits
    /// staged while the submission is in flight are stashed and rejoin the
    /// outbox once it settles. On failure the submitted groups return to the
    /// front of the outbox.
    pub async fn submit(&self) -> Result<Vec<SubmitResult>> {
        let (transactions, touched) = {
            let mut state = self.inner.state.lock();
            if state.submitting {
                return Err(StoreError::AlreadySubmitting);
            }
            if state.outbox.is_empty() {
                for id in state.submitting_documents() {
                    let dirty = state.has_staged(&id);
                    state.dispatch(&id, MachineEvent::Submitted { dirty });
                }
                return Ok(Vec::new());
            }

            let groups: Vec<MutationGroup> = std::mem::take(&mut state.outbox)
                .into_iter()
                .map(|mut group| {
                    group.id.get_or_insert_with(TransactionId::new);
                    group
                })
                .collect();

            let mut touched: Vec<String> = Vec::new();
            for group in &groups {
                for id in group.mutations.iter().filter_map(Mutation::document_id) {
                    if !touched.iter().any(|t| t == id) {
                        touched.push(id.to_string());
                    }
                }
            }

            // Only documents with nothing else in flight have a usable baseline.
            let mut baseline = HashMap::new();
            for id in &touched {
                let entry = state.entry(id);
                if entry.pending.is_empty() {
                    if let Some(doc) = entry.remote.document() {
                        baseline.insert(id.clone(), doc.clone());
                    }
                }
            }
            for group in &groups {
                let Some(tx) = &group.id else { continue };
                for id in &touched {
                    if group.touches(id) {
                        state.entry(id).pending.insert(tx.clone());
                    }
                }
            }

            let transactions: Vec<Transaction> = groups
                .iter()
                .map(|g| Transaction {
                    id: g.id.clone().unwrap_or_default(),
                    mutations: g.mutations.clone(),
                })
                .collect();
            let patched: HashSet<String> =
                patched_ids(&transactions).into_iter().map(str::to_string).collect();
            baseline.retain(|id, _| patched.contains(id));
            let transactions = state.squasher.compact_dmp(transactions, &baseline);

            state.inflight.extend(groups);
            state.submitting = true;
            for id in &touched {
                state.dispatch(id, MachineEvent::Submit);
            }
            (transactions, touched)
        };

        info!(
            transactions = transactions.len(),
            documents = touched.len(),
            "submitting outbox"
        );
        let tx_ids: HashSet<TransactionId> = transactions.iter().map(|t| t.id.clone()).collect();
        let result = self.inner.backend.submit(transactions).await;

        let mut state = self.inner.state.lock();
        state.submitting = false;
        let mut notify = touched.clone();
        for id in state.submitting_documents() {
            if !notify.contains(&id) {
                notify.push(id);
            }
        }

        match result {
            Ok(results) => {
                state.committed.extend(tx_ids.iter().cloned());
                // Documents nobody listens to will never see their echo.
                for entry in state.documents.values_mut() {
                    if entry.pipeline.is_none() {
                        entry.pending.retain(|tx| !tx_ids.contains(tx));
                    }
                }
                state.prune_inflight();
                let stash = std::mem::take(&mut state.stash);
                state.outbox.extend(stash);
                for id in &notify {
                    state.refresh_local(id);
                    let dirty = state.has_staged(id);
                    state.dispatch(id, MachineEvent::Submitted { dirty });
                    state.forget_idle(id);
                }
                debug!(committed = results.len(), "submission settled");
                Ok(results)
            }
            Err(error) => {
                warn!(error = %error, "submission failed, outbox restored");
                for entry in state.documents.values_mut() {
                    entry.pending.retain(|tx| !tx_ids.contains(tx));
                }
                let (failed, keep): (Vec<_>, Vec<_>) = std::mem::take(&mut state.inflight)
                    .into_iter()
                    .partition(|g| g.id.as_ref().is_some_and(|tx| tx_ids.contains(tx)));
                state.inflight = keep;
                let rest = std::mem::take(&mut state.outbox);
                let stash = std::mem::take(&mut state.stash);
                state.outbox = failed.into_iter().chain(rest).chain(stash).collect();
                for id in &notify {
                    state.refresh_local(id);
                    state.dispatch(id, MachineEvent::SubmitFailed);
                }
                Err(StoreError::Submit(error))
            }
        }
    }

    /// The local (optimistic) state of a document.
    pub fn get_local(&self, id: &str) -> DocumentState {
        self.inner
            .state
            .lock()
            .documents
            .get(id)
            .map(|e| e.local.clone())
            .unwrap_or_default()
    }

    /// The last known remote state of a document.
    pub fn get_remote(&self, id: &str) -> DocumentState {
        self.inner.state.lock().remote(id)
    }

    /// Staged groups not yet submitted, including stashed ones.
    pub fn outbox(&self) -> Vec<MutationGroup> {
        let state = self.inner.state.lock();
        state.outbox.iter().chain(state.stash.iter()).cloned().collect()
    }

    pub fn status(&self, id: &str) -> ConnectionState {
        self.inner
            .state
            .lock()
            .documents
            .get(id)
            .map(|e| e.machine.state().clone())
            .unwrap_or_default()
    }

    /// Retry a failed connect, load or submission now, resetting its backoff.
    pub fn retry(&self, id: &str) {
        self.inner
            .state
            .lock()
            .dispatch(id, MachineEvent::Retry { manual: true });
    }

    /// Drop every staged mutation for `id`. Returns how many were dropped.
    pub fn discard_staged(&self, id: &str) -> usize {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        let mut dropped = 0;
        for groups in [&mut state.outbox, &mut state.stash] {
            for group in groups.iter_mut() {
                let before = group.mutations.len();
                group.mutations.retain(|m| m.document_id() != Some(id));
                dropped += before - group.mutations.len();
            }
            groups.retain(|g| !g.mutations.is_empty());
        }
        if dropped > 0 {
            info!(id = %id, dropped, "discarded staged mutations");
            let remote = state.remote(id);
            state.entry(id);
            state.rebase_and_publish(id, &remote, |view| DocumentEvent::Optimistic {
                id: id.to_string(),
                mutations: Vec::new(),
                view,
            });
            state.forget_idle(id);
        }
        dropped
    }

    /// Counters of the outbox squasher.
    pub fn squash_stats(&self) -> SquashStats {
        self.inner.state.lock().squasher.stats().clone()
    }

    /// Number of documents the store currently holds state for.
    pub fn tracked_documents(&self) -> usize {
        self.inner.state.lock().documents.len()
    }

    /// Whether the unsubscribed-mutation diagnostic has fired.
    pub fn warned_unobserved(&self) -> bool {
        self.inner.warn_once.has_fired()
    }
}
