//! Rebase behaviour against the executor.
//!
//! Rebasing onto an unchanged remote must produce exactly what replaying the
//! staged mutations would, and must leave the outbox untouched.

use ocs_mutation::{
    apply_mutation, rebase, DocumentState, ErrorKind, Mutation, MutationGroup, MutationOutcome,
};
use ocs_patch::{NodePatch, Operation, Path};
use proptest::prelude::*;
use serde_json::{json, Value};

fn mutation_strategy() -> impl Strategy<Value = Mutation> {
    let field = "[a-c]";
    prop_oneof![
        (field, 0i64..10).prop_map(|(f, v)| Mutation::patch(
            "x",
            vec![NodePatch::new(Path::root().child_key(f), Operation::Set { value: json!(v) })]
        )),
        field.prop_map(|f| Mutation::patch(
            "x",
            vec![NodePatch::new(Path::root().child_key(f), Operation::Unset)]
        )),
        (0i64..10).prop_map(|v| Mutation::create_or_replace(json!({"_id": "x", "a": v}))),
        Just(Mutation::create_if_not_exists(json!({"_id": "x"}))),
        Just(Mutation::delete("x")),
        Just(Mutation::delete("unrelated")),
    ]
}

fn outbox_strategy() -> impl Strategy<Value = Vec<MutationGroup>> {
    prop::collection::vec(
        (prop::collection::vec(mutation_strategy(), 1..4), any::<bool>()).prop_map(
            |(mutations, transactional)| {
                if transactional {
                    MutationGroup::transactional(mutations)
                } else {
                    MutationGroup::new(mutations)
                }
            },
        ),
        0..5,
    )
}

fn replay(remote: Option<Value>, outbox: &[MutationGroup]) -> Result<Option<Value>, ErrorKind> {
    let mut current = remote;
    for mutation in outbox
        .iter()
        .flat_map(|g| g.mutations.iter())
        .filter(|m| m.document_id() == Some("x"))
    {
        current = match apply_mutation(current.as_ref(), mutation).map_err(|e| e.kind())? {
            MutationOutcome::Created(doc) | MutationOutcome::Updated(doc) => Some(doc),
            MutationOutcome::Deleted => None,
            MutationOutcome::Noop => current,
        };
    }
    Ok(current)
}

proptest! {
    #[test]
    fn rebase_on_unchanged_remote_replays_outbox(
        present in any::<bool>(),
        outbox in outbox_strategy()
    ) {
        let remote = if present {
            DocumentState::Present(json!({"_id": "x", "_rev": "r1", "a": 0}))
        } else {
            DocumentState::Absent
        };
        let expected = replay(remote.document().cloned(), &outbox);
        match rebase("x", &remote, &remote, &outbox) {
            Ok(rebased) => {
                prop_assert_eq!(&rebased.outbox, &outbox);
                prop_assert_eq!(Ok(rebased.local.into_document()), expected);
            }
            Err(err) => prop_assert_eq!(Err(err.source.kind()), expected),
        }
    }
}

#[test]
fn staged_create_conflicts_with_new_remote() {
    let outbox = vec![MutationGroup::new(vec![Mutation::create(json!({"_id": "x"}))])];
    let err = rebase(
        "x",
        &DocumentState::Unknown,
        &DocumentState::Present(json!({"_id": "x"})),
        &outbox,
    )
    .unwrap_err();
    assert_eq!(err.source.kind(), ErrorKind::AlreadyExists);
    assert_eq!(err.id, "x");
}

#[test]
fn local_keeps_remote_revision() {
    let remote = DocumentState::Present(json!({"_id": "x", "_rev": "r7", "title": "a"}));
    let outbox = vec![
        MutationGroup::new(vec![Mutation::create_or_replace(json!({"_id": "x", "title": "b"}))]),
        MutationGroup::new(vec![Mutation::patch(
            "x",
            vec![NodePatch::at("title", Operation::Set { value: json!("c") }).unwrap()],
        )]),
    ];
    let rebased = rebase("x", &remote, &remote, &outbox).unwrap();
    assert_eq!(rebased.local.revision(), Some("r7"));
    assert_eq!(rebased.local.document().unwrap()["title"], "c");
}
