//! Chain reconstruction over buffered mutation events.

use crate::event::MutationEvent;
use std::collections::HashSet;

/// Split `events` into maximal causally ordered chains.
///
/// A chain starts at an event whose `previous_rev` is not produced by any other
/// event in the set and follows `previous_rev == result_rev` links. When two
/// events claim the same predecessor the one that arrived first wins; the other
/// is left out of every chain. Chains are returned in order of their first
/// event's arrival.
pub fn to_ordered_chains(events: &[MutationEvent]) -> Vec<Vec<&MutationEvent>> {
    let produced: HashSet<&str> = events.iter().map(|e| e.result_rev.as_str()).collect();
    let mut used = vec![false; events.len()];
    let mut chains = Vec::new();

    for (head, event) in events.iter().enumerate() {
        let is_head = match event.previous_rev.as_deref() {
            None => true,
            Some(previous) => !produced.contains(previous),
        };
        if !is_head || used[head] {
            continue;
        }

        let mut chain = Vec::new();
        let mut cursor = Some(head);
        while let Some(index) = cursor {
            used[index] = true;
            let current = &events[index];
            chain.push(current);
            cursor = events.iter().enumerate().position(|(j, next)| {
                !used[j] && next.previous_rev.as_deref() == Some(current.result_rev.as_str())
            });
        }
        chains.push(chain);
    }
    chains
}

/// Split a chain at the event producing `revision`.
///
/// Returns `(discarded, applicable)` where `discarded` runs up to and including
/// that event. If no event produced `revision` nothing is discarded.
pub fn discard_chain_to<'a>(
    chain: &[&'a MutationEvent],
    revision: Option<&str>,
) -> (Vec<&'a MutationEvent>, Vec<&'a MutationEvent>) {
    let cut = revision.and_then(|rev| chain.iter().position(|e| e.result_rev == rev));
    match cut {
        Some(index) => (chain[..=index].to_vec(), chain[index + 1..].to_vec()),
        None => (Vec::new(), chain.to_vec()),
    }
}
