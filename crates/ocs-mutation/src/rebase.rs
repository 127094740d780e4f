//! Rebase of staged mutations onto a new remote state.
//!
//! The local view of a document is the remote snapshot with every staged
//! mutation for that document replayed on top, in order. Whenever the remote
//! snapshot changes the local view is recomputed from scratch. A staged
//! mutation that no longer applies (for example a `create` for a document that
//! now exists remotely) fails the whole rebase, so the conflict reaches the
//! caller instead of silently dropping the edit.

use crate::document::DocumentState;
use crate::error::RebaseError;
use crate::executor::next_document;
use crate::mutation::{Mutation, MutationGroup};

/// Outcome of a successful rebase.
#[derive(Clone, Debug, PartialEq)]
pub struct Rebased {
    /// Staged groups, unchanged.
    pub outbox: Vec<MutationGroup>,
    /// Remote state with the staged mutations for the document applied.
    pub local: DocumentState,
}

/// Recompute the local view of `id` from `new_remote` and the staged `outbox`.
///
/// `_old_remote` is accepted so callers always thread the previous snapshot
/// through; conflict detection currently works from `new_remote` alone.
///
/// An unknown remote with no staged mutations for `id` stays unknown. With
/// staged mutations it is provisionally treated as absent, so optimistic
/// creates show up before the first snapshot arrives. A failure that rests on
/// that assumption (a patch on a document that may well exist) is not a
/// conflict: the local view stays unknown until the snapshot arrives or a
/// staged `create`, `createOrReplace` or `delete` pins the document down.
pub fn rebase(
    id: &str,
    _old_remote: &DocumentState,
    new_remote: &DocumentState,
    outbox: &[MutationGroup],
) -> Result<Rebased, RebaseError> {
    let mut touched = false;
    let mut current = new_remote.document().cloned();
    let mut assumed = !new_remote.is_known();
    let mut unresolved = false;

    for (group_index, group) in outbox.iter().enumerate() {
        for (mutation_index, mutation) in group.mutations.iter().enumerate() {
            if mutation.document_id() != Some(id) {
                continue;
            }
            touched = true;
            if unresolved && !pins_document(mutation) {
                continue;
            }
            match next_document(current.as_ref(), mutation) {
                Ok(next) => {
                    current = next;
                    if pins_document(mutation) {
                        assumed = false;
                        unresolved = false;
                    }
                }
                Err(source) if assumed && source.depends_on_remote() => {
                    current = None;
                    unresolved = true;
                }
                Err(source) => {
                    return Err(RebaseError {
                        id: id.to_string(),
                        group_index,
                        mutation_index,
                        source,
                    })
                }
            }
        }
    }

    let local = if !touched {
        new_remote.clone()
    } else if unresolved {
        DocumentState::Unknown
    } else {
        DocumentState::known(current)
    };
    Ok(Rebased {
        outbox: outbox.to_vec(),
        local,
    })
}

/// Mutations whose success fixes the document state whatever the remote holds.
fn pins_document(mutation: &Mutation) -> bool {
    matches!(
        mutation,
        Mutation::Create { .. } | Mutation::CreateOrReplace { .. } | Mutation::Delete { .. }
    )
}

/// Apply staged groups for `id` to a state without recording an outbox.
pub fn apply_groups(
    id: &str,
    base: &DocumentState,
    groups: &[MutationGroup],
) -> Result<DocumentState, RebaseError> {
    rebase(id, base, base, groups).map(|rebased| rebased.local)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::mutation::Mutation;
    use ocs_patch::{NodePatch, Operation};
    use serde_json::json;

    #[test]
    fn test_rebase_unchanged_remote() {
        let remote = DocumentState::Present(json!({"_id": "x", "_rev": "r1", "n": 1}));
        let outbox = vec![MutationGroup::new(vec![Mutation::patch(
            "x",
            vec![NodePatch::at("n", Operation::Inc { amount: 1.into() }).unwrap()],
        )])];
        let rebased = rebase("x", &remote, &remote, &outbox).unwrap();
        assert_eq!(rebased.outbox, outbox);
        assert_eq!(
            rebased.local,
            DocumentState::Present(json!({"_id": "x", "_rev": "r1", "n": 2}))
        );
    }

    #[test]
    fn test_rebase_conflicting_create() {
        let outbox = vec![MutationGroup::new(vec![Mutation::create(json!({"_id": "x"}))])];
        let err = rebase(
            "x",
            &DocumentState::Unknown,
            &DocumentState::Present(json!({"_id": "x"})),
            &outbox,
        )
        .unwrap_err();
        assert_eq!(err.source.kind(), ErrorKind::AlreadyExists);
        assert_eq!(err.group_index, 0);
    }

    #[test]
    fn test_rebase_ignores_other_documents() {
        let outbox = vec![MutationGroup::transactional(vec![
            Mutation::create(json!({"_id": "other"})),
            Mutation::delete("x"),
        ])];
        let remote = DocumentState::Present(json!({"_id": "x"}));
        assert_eq!(rebase("x", &remote, &remote, &outbox).unwrap().local, DocumentState::Absent);
        assert_eq!(
            rebase("y", &remote, &DocumentState::Unknown, &outbox).unwrap().local,
            DocumentState::Unknown
        );
    }

    #[test]
    fn test_patch_before_snapshot_stays_unknown() {
        let outbox = vec![MutationGroup::new(vec![Mutation::patch(
            "x",
            vec![NodePatch::at("n", Operation::Inc { amount: 1.into() }).unwrap()],
        )])];
        let local = apply_groups("x", &DocumentState::Unknown, &outbox).unwrap();
        assert_eq!(local, DocumentState::Unknown);

        // Once the snapshot arrives the patch is checked for real.
        let remote = DocumentState::Present(json!({"_id": "x", "n": 1}));
        assert_eq!(
            rebase("x", &DocumentState::Unknown, &remote, &outbox).unwrap().local,
            DocumentState::Present(json!({"_id": "x", "n": 2}))
        );
        let err = rebase("x", &DocumentState::Unknown, &DocumentState::Absent, &outbox).unwrap_err();
        assert_eq!(err.source.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_replace_pins_unknown_document() {
        let outbox = vec![MutationGroup::new(vec![
            Mutation::patch(
                "x",
                vec![NodePatch::at("n", Operation::Inc { amount: 1.into() }).unwrap()],
            ),
            Mutation::create_or_replace(json!({"_id": "x", "n": 7})),
        ])];
        let local = apply_groups("x", &DocumentState::Unknown, &outbox).unwrap();
        assert_eq!(local, DocumentState::Present(json!({"_id": "x", "n": 7})));
    }

    #[test]
    fn test_double_create_before_snapshot_conflicts() {
        let outbox = vec![
            MutationGroup::new(vec![Mutation::create(json!({"_id": "x"}))]),
            MutationGroup::new(vec![Mutation::create(json!({"_id": "x"}))]),
        ];
        let err = apply_groups("x", &DocumentState::Unknown, &outbox).unwrap_err();
        assert_eq!(err.source.kind(), ErrorKind::AlreadyExists);
        assert_eq!(err.group_index, 1);
    }

    #[test]
    fn test_optimistic_create_before_snapshot() {
        let outbox = vec![MutationGroup::new(vec![Mutation::create(json!({"_id": "x"}))])];
        let local = apply_groups("x", &DocumentState::Unknown, &outbox).unwrap();
        assert_eq!(local, DocumentState::Present(json!({"_id": "x"})));
    }
}
