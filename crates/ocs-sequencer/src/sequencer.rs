//! Listener Event Sequencer
//!
//! Remote mutation events for a document may arrive out of order, with gaps,
//! or more than once. The sequencer turns that stream back into a causal
//! sequence before anything is applied.
//!
//! ## State
//!
//! - **base**: the last causally applied revision, or "absent" if the document
//!   does not exist. Set by `sync` events.
//! - **buffer**: mutation events that cannot be chained onto `base` yet.
//!
//! ## Protocol
//!
//! 1. **On sync**:
//!    ```text
//!    base := revision(snapshot)
//!    buffer := ∅
//!    emit sync
//!    ```
//!
//! 2. **On mutation e**:
//!    ```text
//!    buffer := buffer ∪ {e}
//!    repeat:
//!        chains := to_ordered_chains(buffer)
//!        drop from each chain the prefix ending at base   // already applied
//!        if some chain c starts with c[0].previous_rev = base:
//!            emit c; base := after(last(c)); buffer := buffer \ c
//!        else break
//!    ```
//!
//!    An event whose `result_rev` was already applied is dropped, and its
//!    `previous_rev` counts as applied too. Buffered events leading up to it
//!    are history behind the snapshot and are dropped the same way.
//!
//! 3. **On reconnect**: emit unchanged.
//!
//! ## Failure policy
//!
//! Only the last `max_applied_history` applied revisions are remembered for
//! duplicate detection; older ones are forgotten as the chain moves on.
//!
//! A buffer larger than `max_buffer_size` raises `MaxBufferExceeded`. A
//! non-empty buffer that makes no progress for `resolve_chain_deadline_ms`
//! raises `DeadlineExceeded`. Both are fatal until the next `sync`.

use crate::chain::{discard_chain_to, to_ordered_chains};
use crate::error::{OutOfSyncError, OutOfSyncState, Result};
use crate::event::{Base, ListenerEvent, MutationEvent};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Configuration for the sequencer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerConfig {
    /// Maximum number of buffered, unchainable events.
    pub max_buffer_size: usize,
    /// How long a non-empty buffer may go without progress (in milliseconds).
    pub resolve_chain_deadline_ms: u64,
    /// How many applied revisions are remembered to recognise duplicates.
    pub max_applied_history: usize,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            max_buffer_size: 20,
            resolve_chain_deadline_ms: 30_000,
            max_applied_history: 256,
        }
    }
}

impl SequencerConfig {
    pub fn resolve_chain_deadline(&self) -> Duration {
        Duration::from_millis(self.resolve_chain_deadline_ms)
    }
}

/// Builder for sequencer configuration.
pub struct SequencerConfigBuilder {
    config: SequencerConfig,
}

impl SequencerConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SequencerConfig::default(),
        }
    }

    pub fn max_buffer_size(mut self, size: usize) -> Self {
        self.config.max_buffer_size = size;
        self
    }

    pub fn resolve_chain_deadline(mut self, ms: u64) -> Self {
        self.config.resolve_chain_deadline_ms = ms;
        self
    }

    pub fn max_applied_history(mut self, count: usize) -> Self {
        self.config.max_applied_history = count;
        self
    }

    pub fn build(self) -> SequencerConfig {
        self.config
    }
}

impl Default for SequencerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Events released by one [`Sequencer::push`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Sequenced {
    /// Events to deliver, in causal order.
    pub emit: Vec<ListenerEvent>,
    /// Mutation events dropped as already applied, duplicated, or cleared by
    /// a sync.
    pub discarded: Vec<MutationEvent>,
}

/// Recently applied revisions, oldest forgotten first.
#[derive(Debug)]
struct AppliedRevisions {
    set: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl AppliedRevisions {
    fn new(capacity: usize) -> Self {
        Self {
            set: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn contains(&self, rev: &str) -> bool {
        self.set.contains(rev)
    }

    fn insert(&mut self, rev: String) {
        if !self.set.insert(rev.clone()) {
            return;
        }
        self.order.push_back(rev);
        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.set.remove(&old);
            }
        }
    }

    fn clear(&mut self) {
        self.set.clear();
        self.order.clear();
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

/// Reorders mutation events of a single document into a causal chain.
#[derive(Debug)]
pub struct Sequencer {
    config: SequencerConfig,
    base: Base,
    buffer: Vec<MutationEvent>,
    /// Recently applied revisions, for duplicate detection.
    applied: AppliedRevisions,
    buffered_since: Option<Instant>,
}

impl Sequencer {
    pub fn new(config: SequencerConfig) -> Self {
        let applied = AppliedRevisions::new(config.max_applied_history);
        Self {
            config,
            base: Base::AwaitingSync,
            buffer: Vec::new(),
            applied,
            buffered_since: None,
        }
    }

    /// Number of applied revisions currently remembered.
    pub fn applied_revisions(&self) -> usize {
        self.applied.len()
    }

    pub fn base(&self) -> &Base {
        &self.base
    }

    pub fn buffered(&self) -> &[MutationEvent] {
        &self.buffer
    }

    /// Feed one event. Returns the events that became deliverable.
    pub fn push(&mut self, event: ListenerEvent, now: Instant) -> Result<Sequenced> {
        match event {
            ListenerEvent::Sync { document } => {
                self.base = Base::of_snapshot(document.as_ref());
                let discarded = std::mem::take(&mut self.buffer);
                self.applied.clear();
                if let Some(rev) = self.base.revision() {
                    self.applied.insert(rev.to_string());
                }
                self.buffered_since = None;
                trace!(base = %self.base, "sequencer synced");
                Ok(Sequenced {
                    emit: vec![ListenerEvent::Sync { document }],
                    discarded,
                })
            }
            ListenerEvent::Reconnect => Ok(Sequenced {
                emit: vec![ListenerEvent::Reconnect],
                discarded: Vec::new(),
            }),
            ListenerEvent::Mutation(event) => self.push_mutation(event, now),
        }
    }

    fn push_mutation(&mut self, event: MutationEvent, now: Instant) -> Result<Sequenced> {
        let mut out = Sequenced::default();

        if self.applied.contains(&event.result_rev) {
            debug!(id = %event.id, rev = %event.result_rev, "dropping already applied mutation event");
            // Its predecessor is older than an applied revision.
            if let Some(previous) = &event.previous_rev {
                self.applied.insert(previous.clone());
            }
            out.discarded.push(event);
            self.prune_applied(&mut out);
            return Ok(out);
        }
        if self.buffer.iter().any(|e| e.result_rev == event.result_rev) {
            debug!(id = %event.id, rev = %event.result_rev, "dropping duplicate mutation event");
            out.discarded.push(event);
            return Ok(out);
        }

        self.buffer.push(event);
        if self.buffered_since.is_none() {
            self.buffered_since = Some(now);
        }

        if self.base != Base::AwaitingSync {
            while self.resolve_once(&mut out) {}
        }

        if self.buffer.is_empty() {
            self.buffered_since = None;
        } else if !out.emit.is_empty() {
            self.buffered_since = Some(now);
        }

        if self.buffer.len() > self.config.max_buffer_size {
            return Err(OutOfSyncError::MaxBufferExceeded(self.state()));
        }
        Ok(out)
    }

    /// Emit at most one applicable chain. Returns whether anything changed.
    fn resolve_once(&mut self, out: &mut Sequenced) -> bool {
        let base_rev = self.base.revision().map(str::to_string);
        let mut stale: Vec<String> = Vec::new();
        let mut applicable: Option<Vec<MutationEvent>> = None;

        for chain in to_ordered_chains(&self.buffer) {
            let (discarded, rest) = discard_chain_to(&chain, base_rev.as_deref());
            stale.extend(discarded.iter().map(|e| e.result_rev.clone()));
            if applicable.is_none() {
                if let Some(first) = rest.first() {
                    if self.base.is_followed_by(first) {
                        applicable = Some(rest.into_iter().cloned().collect());
                    }
                }
            }
        }

        if !stale.is_empty() {
            let (dropped, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.buffer)
                .into_iter()
                .partition(|e| stale.contains(&e.result_rev));
            for e in &dropped {
                debug!(id = %e.id, rev = %e.result_rev, base = %self.base, "dropping already applied mutation event");
            }
            self.buffer = kept;
            out.discarded.extend(dropped);
        }

        let Some(chain) = applicable else {
            return !stale.is_empty();
        };

        for event in &chain {
            self.base = Base::after(event);
            self.applied.insert(event.result_rev.clone());
        }
        self.buffer
            .retain(|e| !chain.iter().any(|c| c.result_rev == e.result_rev));
        trace!(count = chain.len(), base = %self.base, "emitting mutation chain");
        out.emit
            .extend(chain.into_iter().map(ListenerEvent::Mutation));
        true
    }

    /// Drop buffered events that produced an applied revision, marking their
    /// predecessors applied in turn.
    fn prune_applied(&mut self, out: &mut Sequenced) {
        loop {
            let (stale, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.buffer)
                .into_iter()
                .partition(|e| self.applied.contains(&e.result_rev));
            self.buffer = kept;
            if stale.is_empty() {
                break;
            }
            for event in stale {
                debug!(id = %event.id, rev = %event.result_rev, "dropping already applied mutation event");
                if let Some(previous) = &event.previous_rev {
                    self.applied.insert(previous.clone());
                }
                out.discarded.push(event);
            }
        }
        if self.buffer.is_empty() {
            self.buffered_since = None;
        }
    }

    /// Fail if the buffer has been stuck longer than the deadline.
    pub fn check_deadline(&self, now: Instant) -> Result<()> {
        match self.deadline() {
            Some(deadline) if now >= deadline => {
                Err(OutOfSyncError::DeadlineExceeded(self.state()))
            }
            _ => Ok(()),
        }
    }

    /// When the current buffer will exceed its deadline, if anything is buffered.
    pub fn deadline(&self) -> Option<Instant> {
        if self.buffer.is_empty() {
            return None;
        }
        self.buffered_since
            .map(|since| since + self.config.resolve_chain_deadline())
    }

    fn state(&self) -> OutOfSyncState {
        OutOfSyncState {
            base: self.base.clone(),
            buffered: self.buffer.clone(),
        }
    }
}
