//! Structural squashing of staged mutation groups.
//!
//! Squashing rewrites the outbox into fewer, smaller groups without changing
//! the document state it produces:
//!
//! 1. Adjacent non-transactional groups are concatenated. Transactional
//!    groups are kept as they are and act as barriers.
//! 2. Adjacent patch mutations on the same document are merged when their
//!    revision preconditions agree.
//! 3. Inside a merged patch, a node patch that is fully overwritten by a later
//!    `set`/`unset` on the same path, with nothing in between touching that
//!    path, is dropped.

use crate::SquashStats;
use ocs_mutation::{Mutation, MutationGroup};
use ocs_patch::{NodePatch, Operation, PathSegment};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Configuration for the squasher.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SquashConfig {
    /// Concatenate adjacent non-transactional groups.
    pub merge_groups: bool,
    /// Merge adjacent patches on the same document.
    pub merge_patches: bool,
    /// Drop node patches that a later patch overwrites.
    pub drop_superseded: bool,
}

impl Default for SquashConfig {
    fn default() -> Self {
        Self {
            merge_groups: true,
            merge_patches: true,
            drop_superseded: true,
        }
    }
}

/// Rewrites staged groups into an equivalent, smaller outbox.
#[derive(Clone, Debug, Default)]
pub struct Squasher {
    config: SquashConfig,
    stats: SquashStats,
}

impl Squasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: SquashConfig) -> Self {
        Self {
            config,
            stats: SquashStats::default(),
        }
    }

    pub fn config(&self) -> &SquashConfig {
        &self.config
    }

    pub fn stats(&self) -> &SquashStats {
        &self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut SquashStats {
        &mut self.stats
    }

    /// Squash `outbox`, preserving its effect and the order of transactions.
    pub fn squash(&mut self, outbox: Vec<MutationGroup>) -> Vec<MutationGroup> {
        let groups_before = outbox.len();
        let mutations_before: usize = outbox.iter().map(|g| g.mutations.len()).sum();

        let mut groups = if self.config.merge_groups {
            merge_groups(outbox)
        } else {
            outbox
        };

        if self.config.merge_patches {
            for group in &mut groups {
                group.mutations = merge_patches(std::mem::take(&mut group.mutations));
            }
        }

        let mut dropped = 0;
        if self.config.drop_superseded {
            for group in &mut groups {
                for mutation in &mut group.mutations {
                    if let Mutation::Patch { patches, .. } = mutation {
                        let before = patches.len();
                        *patches = drop_superseded(std::mem::take(patches));
                        dropped += before - patches.len();
                    }
                }
            }
        }

        let mutations_after: usize = groups.iter().map(|g| g.mutations.len()).sum();
        self.stats.squash_runs += 1;
        self.stats.groups_merged += (groups_before - groups.len()) as u64;
        self.stats.mutations_merged += (mutations_before - mutations_after) as u64;
        self.stats.patches_dropped += dropped as u64;
        debug!(
            groups_before,
            groups_after = groups.len(),
            mutations_before,
            mutations_after,
            patches_dropped = dropped,
            "squashed outbox"
        );
        groups
    }
}

/// Concatenate runs of adjacent non-transactional groups.
pub fn merge_groups(outbox: Vec<MutationGroup>) -> Vec<MutationGroup> {
    let mut out: Vec<MutationGroup> = Vec::with_capacity(outbox.len());
    for group in outbox {
        match out.last_mut() {
            Some(last) if !last.is_transactional() && !group.is_transactional() => {
                last.mutations.extend(group.mutations);
            }
            _ => out.push(group),
        }
    }
    out
}

/// Merge adjacent patch mutations on the same document.
pub fn merge_patches(mutations: Vec<Mutation>) -> Vec<Mutation> {
    let mut out: Vec<Mutation> = Vec::with_capacity(mutations.len());
    for mutation in mutations {
        if let (
            Some(Mutation::Patch {
                id: last_id,
                patches: last_patches,
                options: last_options,
            }),
            Mutation::Patch {
                id,
                patches,
                options,
            },
        ) = (out.last_mut(), &mutation)
        {
            let compatible =
                options.if_revision.is_none() || options.if_revision == last_options.if_revision;
            if last_id == id && compatible {
                last_patches.extend(patches.iter().cloned());
                continue;
            }
        }
        out.push(mutation);
    }
    out
}

/// Remove node patches whose effect a later patch fully overwrites.
pub fn drop_superseded(patches: Vec<NodePatch>) -> Vec<NodePatch> {
    let keep: Vec<bool> = (0..patches.len())
        .map(|i| !is_superseded(&patches, i))
        .collect();
    patches
        .into_iter()
        .zip(keep)
        .filter_map(|(patch, keep)| keep.then_some(patch))
        .collect()
}

fn is_superseded(patches: &[NodePatch], i: usize) -> bool {
    let patch = &patches[i];
    let Some(last) = patch.path.last() else {
        return false;
    };
    let droppable = match patch.op {
        Operation::Set { .. } | Operation::SetIfMissing { .. } => {
            !matches!(last, PathSegment::Keyed(_))
        }
        Operation::Unset => matches!(last, PathSegment::Property(_)),
        _ => false,
    };
    if !droppable {
        return false;
    }

    let footprint = patch.footprint();
    for later in &patches[i + 1..] {
        let overwrites = later.path == patch.path
            && matches!(later.op, Operation::Set { .. } | Operation::Unset);
        if overwrites {
            return true;
        }
        if later.footprint().may_overlap(&footprint) {
            return false;
        }
    }
    false
}
