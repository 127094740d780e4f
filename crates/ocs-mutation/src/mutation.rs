//! Mutations, mutation groups and transactions.

use crate::document::{document_id, Document};
use ocs_patch::NodePatch;
use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Options for patch mutations.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchOptions {
    /// Only apply if the document is currently at this revision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_revision: Option<String>,
}

/// A whole-document change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Mutation {
    /// Create; fails if the document exists.
    Create { document: Document },
    /// Create unless the document exists.
    CreateIfNotExists { document: Document },
    /// Create, or replace whatever exists.
    CreateOrReplace { document: Document },
    /// Delete; a no-op if absent.
    Delete { id: String },
    /// Apply node patches to an existing document.
    Patch {
        id: String,
        patches: Vec<NodePatch>,
        #[serde(default)]
        options: PatchOptions,
    },
}

impl Mutation {
    pub fn create(document: Document) -> Self {
        Mutation::Create { document }
    }

    pub fn create_if_not_exists(document: Document) -> Self {
        Mutation::CreateIfNotExists { document }
    }

    pub fn create_or_replace(document: Document) -> Self {
        Mutation::CreateOrReplace { document }
    }

    pub fn delete(id: impl Into<String>) -> Self {
        Mutation::Delete { id: id.into() }
    }

    pub fn patch(id: impl Into<String>, patches: Vec<NodePatch>) -> Self {
        Mutation::Patch {
            id: id.into(),
            patches,
            options: PatchOptions::default(),
        }
    }

    /// A patch that only applies at the given revision.
    pub fn patch_if_revision(
        id: impl Into<String>,
        patches: Vec<NodePatch>,
        revision: impl Into<String>,
    ) -> Self {
        Mutation::Patch {
            id: id.into(),
            patches,
            options: PatchOptions {
                if_revision: Some(revision.into()),
            },
        }
    }

    /// The id of the document this mutation targets.
    ///
    /// `None` for creates whose document carries no `_id`.
    pub fn document_id(&self) -> Option<&str> {
        match self {
            Mutation::Create { document }
            | Mutation::CreateIfNotExists { document }
            | Mutation::CreateOrReplace { document } => document_id(document),
            Mutation::Delete { id } | Mutation::Patch { id, .. } => Some(id.as_str()),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Mutation::Create { .. } => "create",
            Mutation::CreateIfNotExists { .. } => "createIfNotExists",
            Mutation::CreateOrReplace { .. } => "createOrReplace",
            Mutation::Delete { .. } => "delete",
            Mutation::Patch { .. } => "patch",
        }
    }
}

/// Unique identifier for a transaction.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }

    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An ordered batch of staged mutations.
///
/// Non-transactional groups may be merged with their neighbours before
/// submission. Transactional groups are submitted as one atomic unit and are
/// never merged.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MutationGroup {
    pub transaction: bool,
    /// Caller-provided transaction id; generated on submit when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<TransactionId>,
    pub mutations: Vec<Mutation>,
}

impl MutationGroup {
    pub fn new(mutations: Vec<Mutation>) -> Self {
        Self {
            transaction: false,
            id: None,
            mutations,
        }
    }

    pub fn transactional(mutations: Vec<Mutation>) -> Self {
        Self {
            transaction: true,
            id: None,
            mutations,
        }
    }

    pub fn transactional_with_id(id: TransactionId, mutations: Vec<Mutation>) -> Self {
        Self {
            transaction: true,
            id: Some(id),
            mutations,
        }
    }

    pub fn is_transactional(&self) -> bool {
        self.transaction
    }

    /// Whether any mutation in the group targets `id`.
    pub fn touches(&self, id: &str) -> bool {
        self.mutations.iter().any(|m| m.document_id() == Some(id))
    }

    /// Mutations in this group targeting `id`, in order.
    pub fn mutations_for<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Mutation> + 'a {
        self.mutations
            .iter()
            .filter(move |m| m.document_id() == Some(id))
    }
}

/// A submitted unit of work.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub mutations: Vec<Mutation>,
}

impl Transaction {
    pub fn new(mutations: Vec<Mutation>) -> Self {
        Self {
            id: TransactionId::new(),
            mutations,
        }
    }

    /// Document ids touched by this transaction, in first-seen order.
    pub fn document_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = Vec::new();
        for id in self.mutations.iter().filter_map(Mutation::document_id) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_document_id() {
        assert_eq!(Mutation::create(json!({"_id": "a"})).document_id(), Some("a"));
        assert_eq!(Mutation::create(json!({"title": "x"})).document_id(), None);
        assert_eq!(Mutation::delete("b").document_id(), Some("b"));
    }

    #[test]
    fn test_transaction_ids_unique() {
        assert_ne!(TransactionId::new(), TransactionId::new());
    }

    #[test]
    fn test_group_filters_by_document() {
        let group = MutationGroup::new(vec![
            Mutation::create(json!({"_id": "a"})),
            Mutation::delete("b"),
            Mutation::delete("a"),
        ]);
        assert!(group.touches("a"));
        assert!(!group.touches("c"));
        assert_eq!(group.mutations_for("a").count(), 2);
    }

    #[test]
    fn test_mutation_serde() {
        let m = Mutation::patch_if_revision("a", vec![], "r1");
        let encoded = serde_json::to_value(&m).unwrap();
        assert_eq!(
            encoded,
            json!({"type": "patch", "id": "a", "patches": [], "options": {"ifRevision": "r1"}})
        );
        let decoded: Mutation =
            serde_json::from_value(json!({"type": "patch", "id": "a", "patches": []})).unwrap();
        assert_eq!(decoded, Mutation::patch("a", vec![]));
    }
}
