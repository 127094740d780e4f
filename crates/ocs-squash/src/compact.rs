//! Text-diff compaction of outgoing transactions.
//!
//! A `set` of a string value at a path that holds a string in the known remote
//! baseline is rewritten into a `diffMatchPatch` delta against that baseline.
//! The rewrite only happens while the path is still untouched by earlier
//! staged patches in the same submission, and never after the document was
//! created, replaced or deleted in it, so a delta is never computed against a
//! stale baseline.

use crate::squash::Squasher;
use ocs_mutation::{Document, Mutation, Transaction};
use ocs_patch::dmp;
use ocs_patch::{NodePatch, Operation, Path};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::trace;

#[derive(Default)]
struct DocumentTrack {
    replaced: bool,
    touched: Vec<Path>,
}

impl Squasher {
    /// Rewrite string `set`s into diff-match-patch deltas against `baseline`.
    ///
    /// `baseline` maps document ids to their current remote documents. Ids
    /// missing from the map are never rewritten.
    pub fn compact_dmp(
        &mut self,
        transactions: Vec<Transaction>,
        baseline: &HashMap<String, Document>,
    ) -> Vec<Transaction> {
        let mut tracks: HashMap<String, DocumentTrack> = HashMap::new();
        let mut rewrites = 0u64;

        let transactions = transactions
            .into_iter()
            .map(|tx| Transaction {
                id: tx.id,
                mutations: tx
                    .mutations
                    .into_iter()
                    .map(|mutation| {
                        compact_mutation(mutation, baseline, &mut tracks, &mut rewrites)
                    })
                    .collect(),
            })
            .collect();

        self.stats_mut().dmp_rewrites += rewrites;
        transactions
    }
}

fn compact_mutation(
    mutation: Mutation,
    baseline: &HashMap<String, Document>,
    tracks: &mut HashMap<String, DocumentTrack>,
    rewrites: &mut u64,
) -> Mutation {
    match mutation {
        Mutation::Patch {
            id,
            patches,
            options,
        } => {
            let track = tracks.entry(id.clone()).or_default();
            let base = baseline.get(&id).filter(|_| !track.replaced);
            let patches = patches
                .into_iter()
                .map(|patch| {
                    let patch = match base {
                        Some(base) if is_untouched(&track.touched, &patch.path) => {
                            match to_dmp(patch, base) {
                                Ok(rewritten) => {
                                    *rewrites += 1;
                                    rewritten
                                }
                                Err(original) => original,
                            }
                        }
                        _ => patch,
                    };
                    track.touched.push(patch.footprint().into_owned());
                    patch
                })
                .collect();
            Mutation::Patch {
                id,
                patches,
                options,
            }
        }
        other => {
            if let Some(id) = other.document_id() {
                tracks.entry(id.to_string()).or_default().replaced = true;
            }
            other
        }
    }
}

fn is_untouched(touched: &[Path], path: &Path) -> bool {
    !touched.iter().any(|t| t.may_overlap(path))
}

/// Rewrite a string `set` into a delta, or hand the patch back unchanged.
fn to_dmp(patch: NodePatch, base: &Document) -> Result<NodePatch, NodePatch> {
    let target = match &patch.op {
        Operation::Set {
            value: Value::String(target),
        } => target,
        _ => return Err(patch),
    };
    let source = match patch.path.get(base) {
        Some(Value::String(source)) if source != target => source,
        _ => return Err(patch),
    };

    let delta = dmp::patch_to_text(&dmp::make_patch(source, target));
    trace!(path = %patch.path, bytes = delta.len(), "rewrote set as diffMatchPatch");
    Ok(NodePatch::new(
        patch.path.clone(),
        Operation::DiffMatchPatch { patch: delta },
    ))
}

/// Ids of the documents `transactions` patch, i.e. the baselines worth looking up.
pub fn patched_ids(transactions: &[Transaction]) -> HashSet<&str> {
    transactions
        .iter()
        .flat_map(|tx| tx.mutations.iter())
        .filter(|m| matches!(m, Mutation::Patch { .. }))
        .filter_map(Mutation::document_id)
        .collect()
}
