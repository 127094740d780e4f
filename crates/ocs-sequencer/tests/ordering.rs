//! Causal ordering tests for the listener event sequencer.
//!
//! - Any arrival order of a causal chain after `sync` is delivered in chain order
//! - Stale and duplicate events are never delivered
//! - The async adapter surfaces buffer and deadline failures and then ends

use futures::channel::mpsc;
use futures::StreamExt;
use ocs_sequencer::{
    sequenced, ListenerEvent, MutationEvent, OutOfSyncError, Sequencer, SequencerConfig,
    SequencerConfigBuilder, Transition,
};
use proptest::prelude::*;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

fn rev(i: usize) -> String {
    format!("r{}", i)
}

fn mutation(prev: &str, next: &str) -> ListenerEvent {
    ListenerEvent::Mutation(MutationEvent {
        id: "doc".into(),
        previous_rev: Some(prev.into()),
        result_rev: next.into(),
        transition: Transition::Update,
        transaction_id: None,
        effect: Value::Null,
    })
}

fn sync(rev: &str) -> ListenerEvent {
    ListenerEvent::Sync {
        document: Some(json!({"_id": "doc", "_rev": rev})),
    }
}

fn result_revs(events: &[ListenerEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            ListenerEvent::Mutation(m) => Some(m.result_rev.clone()),
            _ => None,
        })
        .collect()
}

fn shuffled_chain() -> impl Strategy<Value = (usize, Vec<ListenerEvent>)> {
    (1usize..12).prop_flat_map(|len| {
        let events: Vec<ListenerEvent> = (0..len).map(|i| mutation(&rev(i), &rev(i + 1))).collect();
        (Just(len), Just(events).prop_shuffle())
    })
}

proptest! {
    #[test]
    fn any_arrival_order_is_delivered_causally((len, events) in shuffled_chain()) {
        let mut seq = Sequencer::new(SequencerConfig::default());
        let now = Instant::now();
        seq.push(sync(&rev(0)), now).unwrap();

        let mut delivered = Vec::new();
        for event in events {
            delivered.extend(seq.push(event, now).unwrap().emit);
        }
        let expected: Vec<String> = (1..=len).map(rev).collect();
        prop_assert_eq!(result_revs(&delivered), expected);
        prop_assert!(seq.buffered().is_empty());
    }

    #[test]
    fn duplicates_are_delivered_once((len, events) in shuffled_chain()) {
        let mut seq = Sequencer::new(SequencerConfig::default());
        let now = Instant::now();
        seq.push(sync(&rev(0)), now).unwrap();

        let mut delivered = Vec::new();
        for event in events.iter().chain(events.iter()).cloned() {
            delivered.extend(seq.push(event, now).unwrap().emit);
        }
        prop_assert_eq!(result_revs(&delivered).len(), len);
    }
}

#[test]
fn out_of_order_chain_is_delivered_in_order() {
    let mut seq = Sequencer::new(SequencerConfig::default());
    let now = Instant::now();
    let mut delivered = Vec::new();
    for event in [
        sync("one"),
        mutation("one", "two"),
        mutation("four", "five"),
        mutation("three", "four"),
        mutation("two", "three"),
    ] {
        delivered.extend(seq.push(event, now).unwrap().emit);
    }
    assert!(matches!(delivered[0], ListenerEvent::Sync { .. }));
    assert_eq!(result_revs(&delivered), vec!["two", "three", "four", "five"]);
}

#[test]
fn stale_mutation_after_sync_is_dropped() {
    let mut seq = Sequencer::new(SequencerConfig::default());
    let now = Instant::now();
    seq.push(sync("one"), now).unwrap();
    let out = seq.push(mutation("zero", "one"), now).unwrap();
    assert!(out.emit.is_empty());
}

#[test]
fn sync_resets_buffer() {
    let mut seq = Sequencer::new(SequencerConfig::default());
    let now = Instant::now();
    seq.push(sync("one"), now).unwrap();
    seq.push(mutation("three", "four"), now).unwrap();
    assert_eq!(seq.buffered().len(), 1);
    seq.push(sync("three"), now).unwrap();
    assert!(seq.buffered().is_empty());
    let out = seq.push(mutation("three", "four"), now).unwrap();
    assert_eq!(result_revs(&out.emit), vec!["four"]);
}

#[tokio::test(start_paused = true)]
async fn stream_reports_deadline_exceeded() {
    let config = SequencerConfigBuilder::new().resolve_chain_deadline(5_000).build();
    let (tx, rx) = mpsc::unbounded();
    let mut out = Box::pin(sequenced(rx, config));

    tx.unbounded_send(sync("one")).unwrap();
    tx.unbounded_send(mutation("two", "three")).unwrap();

    let first = out.next().await.unwrap();
    assert!(matches!(assert_ok!(first), ListenerEvent::Sync { .. }));

    let started = Instant::now();
    let err = assert_err!(out.next().await.unwrap());
    assert!(matches!(err, OutOfSyncError::DeadlineExceeded(_)));
    assert!(Instant::now() - started >= Duration::from_millis(5_000));

    assert!(out.next().await.is_none());
    drop(tx);
}

#[tokio::test(start_paused = true)]
async fn stream_delivers_in_order_and_ends_with_input() {
    let (tx, rx) = mpsc::unbounded();
    let mut out = Box::pin(sequenced(rx, SequencerConfig::default()));

    for event in [sync("a"), mutation("b", "c"), mutation("a", "b"), ListenerEvent::Reconnect] {
        tx.unbounded_send(event).unwrap();
    }
    drop(tx);

    let mut delivered = Vec::new();
    while let Some(event) = out.next().await {
        delivered.push(assert_ok!(event));
    }
    assert_eq!(result_revs(&delivered), vec!["b", "c"]);
    assert_eq!(delivered.last(), Some(&ListenerEvent::Reconnect));
}

#[tokio::test]
async fn stream_reports_max_buffer_exceeded() {
    let config = SequencerConfigBuilder::new().max_buffer_size(1).build();
    let events = futures::stream::iter(vec![
        sync("one"),
        mutation("x", "y"),
        mutation("p", "q"),
        mutation("one", "two"),
    ]);
    let results: Vec<_> = sequenced(events, config).collect().await;
    assert_eq!(results.len(), 2);
    assert!(matches!(
        results[1],
        Err(OutOfSyncError::MaxBufferExceeded(_))
    ));
}
