//! Squashing must not change what the outbox does.
//!
//! - Replaying a squashed outbox yields the same documents as the original
//! - Text-diff compaction against the remote baseline reaches the same value,
//!   including on array paths addressed from either end

use ocs_mutation::{apply_groups, DocumentState, Mutation, MutationGroup, Transaction};
use ocs_patch::{ItemRef, NodePatch, Operation, Position};
use ocs_squash::{patched_ids, Squasher};
use proptest::prelude::*;
use serde_json::{json, Value};
use std::collections::HashMap;

fn arb_field_patch() -> impl Strategy<Value = NodePatch> {
    let field = prop::sample::select(vec!["title", "body", "count", "meta.tag"]);
    (field, 0u8..5, 0i64..10).prop_map(|(field, kind, n)| {
        let op = match kind {
            0 => Operation::Set { value: json!(n) },
            1 => Operation::Set {
                value: json!(format!("text {}", n)),
            },
            2 => Operation::Unset,
            3 => Operation::SetIfMissing { value: json!(n) },
            _ => Operation::Set {
                value: json!({"tag": n}),
            },
        };
        NodePatch::at(field, op).unwrap()
    })
}

fn arb_item_path() -> impl Strategy<Value = String> {
    let selector = prop::sample::select(vec![
        "[0]",
        "[1]",
        "[2]",
        "[-1]",
        "[-2]",
        r#"[_key=="a"]"#,
        r#"[_key=="b"]"#,
    ]);
    let field = prop::sample::select(vec!["", ".t", "._key"]);
    (selector, field).prop_map(|(selector, field)| format!("items{}{}", selector, field))
}

fn arb_array_patch() -> impl Strategy<Value = NodePatch> {
    let element = (arb_item_path(), 0u8..6, 0i64..4).prop_map(|(path, kind, n)| {
        let key = ["a", "b", "c", "d"][n as usize];
        let op = match kind {
            0 => Operation::Set { value: json!(n) },
            1 => Operation::Set {
                value: json!(format!("text {}", n)),
            },
            2 => Operation::Unset,
            3 => Operation::SetIfMissing { value: json!(n) },
            4 => Operation::Inc { amount: 1.into() },
            _ => Operation::Set {
                value: json!({"_key": key, "t": n}),
            },
        };
        NodePatch::at(&path, op).unwrap()
    });
    let structural = (any::<bool>(), -3i64..3, 0usize..3).prop_map(|(insert, at, len)| {
        let op = if insert {
            Operation::Insert {
                items: vec![json!({"_key": "n", "t": "new"})],
                position: if at % 2 == 0 {
                    Position::Before
                } else {
                    Position::After
                },
                reference: ItemRef::Index(at),
            }
        } else {
            Operation::Truncate {
                start: len,
                end: Some(len + 1),
            }
        };
        NodePatch::at("items", op).unwrap()
    });
    prop_oneof![4 => element, 1 => structural]
}

fn arb_patch() -> impl Strategy<Value = NodePatch> {
    prop_oneof![arb_field_patch(), arb_array_patch()]
}

fn base_document(id: &str) -> Value {
    json!({
        "_id": id,
        "title": "start",
        "meta": {"tag": 0},
        "items": [
            {"_key": "a", "t": "first"},
            {"_key": "b", "t": "second"},
            {"_key": "c", "t": "third"},
        ],
    })
}

fn arb_group() -> impl Strategy<Value = MutationGroup> {
    let mutation = (
        prop::sample::select(vec!["a", "b"]),
        prop::collection::vec(arb_patch(), 1..4),
    )
        .prop_map(|(id, patches)| Mutation::patch(id, patches));
    (prop::collection::vec(mutation, 1..4), any::<bool>()).prop_map(|(mutations, tx)| {
        if tx {
            MutationGroup::transactional(mutations)
        } else {
            MutationGroup::new(mutations)
        }
    })
}

fn replay(id: &str, outbox: &[MutationGroup]) -> Option<Value> {
    apply_groups(id, &DocumentState::Present(base_document(id)), outbox)
        .ok()
        .and_then(|state| state.into_document())
}

proptest! {
    #[test]
    fn squash_preserves_effect(outbox in prop::collection::vec(arb_group(), 0..6)) {
        let squashed = Squasher::new().squash(outbox.clone());
        prop_assert!(squashed.len() <= outbox.len());
        for id in ["a", "b"] {
            prop_assert_eq!(replay(id, &squashed), replay(id, &outbox));
        }
    }

    #[test]
    fn dmp_compaction_preserves_effect(patches in prop::collection::vec(arb_patch(), 1..8)) {
        let remote = base_document("a");
        let mut baseline = HashMap::new();
        baseline.insert("a".to_string(), remote.clone());

        let tx = Transaction::new(vec![Mutation::patch("a", patches.clone())]);
        let out = Squasher::new().compact_dmp(vec![tx], &baseline);

        let original = [MutationGroup::new(vec![Mutation::patch("a", patches)])];
        let compacted = [MutationGroup::new(out[0].mutations.clone())];
        let state = DocumentState::Present(remote);
        prop_assert_eq!(
            apply_groups("a", &state, &compacted).ok(),
            apply_groups("a", &state, &original).ok()
        );
    }

    #[test]
    fn dmp_compaction_reaches_target(
        base in "[a-z\n ]{0,40}",
        target in "[a-z\n ]{0,40}",
    ) {
        let remote = json!({"_id": "a", "foo": base});
        let mut baseline = HashMap::new();
        baseline.insert("a".to_string(), remote.clone());

        let set = NodePatch::at("foo", Operation::Set { value: json!(target.clone()) }).unwrap();
        let tx = Transaction::new(vec![Mutation::patch("a", vec![set])]);
        let out = Squasher::new().compact_dmp(vec![tx], &baseline);

        let group = MutationGroup::new(out[0].mutations.clone());
        let local = apply_groups("a", &DocumentState::Present(remote), &[group]).unwrap();
        prop_assert_eq!(local.into_document().unwrap()["foo"].clone(), json!(target));
    }
}

#[test]
fn staged_line_edit_becomes_delta() {
    let remote = json!({"_id": "a", "foo": "bar\nbaz"});
    let mut baseline = HashMap::new();
    baseline.insert("a".to_string(), remote);

    let set = NodePatch::at("foo", Operation::Set { value: json!("bar\nbat") }).unwrap();
    let txs = vec![Transaction::new(vec![Mutation::patch("a", vec![set])])];
    assert_eq!(patched_ids(&txs).into_iter().collect::<Vec<_>>(), vec!["a"]);

    let out = Squasher::new().compact_dmp(txs, &baseline);
    match &out[0].mutations[0] {
        Mutation::Patch { patches, .. } => assert_eq!(
            patches[0].op,
            Operation::DiffMatchPatch {
                patch: "@@ -3,5 +3,5 @@\n r%0Aba\n-z\n+t\n".to_string()
            }
        ),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn concurrent_edit_survives_delta() {
    let remote = json!({"_id": "a", "foo": "hello world"});
    let mut baseline = HashMap::new();
    baseline.insert("a".to_string(), remote);

    let set = NodePatch::at("foo", Operation::Set { value: json!("hello brave world") }).unwrap();
    let txs = vec![Transaction::new(vec![Mutation::patch("a", vec![set])])];
    let out = Squasher::new().compact_dmp(txs, &baseline);

    // Someone else appended meanwhile; the delta still lands.
    let moved = json!({"_id": "a", "foo": "hello world!!"});
    let group = MutationGroup::new(out[0].mutations.clone());
    let local = apply_groups("a", &DocumentState::Present(moved), &[group]).unwrap();
    assert_eq!(local.into_document().unwrap()["foo"], "hello brave world!!");
}
