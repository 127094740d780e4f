//! Mutation executor.
//!
//! Applies whole-document mutations against the current state of a single
//! document ([`apply_mutation`]) or against a map of documents
//! ([`apply_to_map`]). The executor never assigns revisions: `_rev` only
//! changes through confirmed remote transactions.

use crate::document::{document_id, revision, with_revision, Document};
use crate::error::{MutationError, Result};
use crate::mutation::Mutation;
use ocs_patch::apply_patches;
use std::borrow::Cow;
use std::collections::HashMap;

/// Result of a successfully applied mutation.
#[derive(Clone, Debug, PartialEq)]
pub enum MutationOutcome {
    Created(Document),
    Updated(Document),
    Deleted,
    Noop,
}

impl MutationOutcome {
    pub fn is_noop(&self) -> bool {
        matches!(self, MutationOutcome::Noop)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            MutationOutcome::Created(_) => "created",
            MutationOutcome::Updated(_) => "updated",
            MutationOutcome::Deleted => "deleted",
            MutationOutcome::Noop => "noop",
        }
    }
}

/// Apply a mutation to the current document (`None` if absent).
pub fn apply_mutation(current: Option<&Document>, mutation: &Mutation) -> Result<MutationOutcome> {
    match mutation {
        Mutation::Create { document } => {
            let id = require_id(document)?;
            if current.is_some() {
                return Err(MutationError::AlreadyExists { id: id.to_string() });
            }
            Ok(MutationOutcome::Created(with_revision(document.clone(), None)))
        }
        Mutation::CreateIfNotExists { document } => {
            require_id(document)?;
            Ok(match current {
                Some(_) => MutationOutcome::Noop,
                None => MutationOutcome::Created(with_revision(document.clone(), None)),
            })
        }
        Mutation::CreateOrReplace { document } => {
            require_id(document)?;
            Ok(match current {
                Some(existing) => {
                    MutationOutcome::Updated(with_revision(document.clone(), revision(existing)))
                }
                None => MutationOutcome::Created(with_revision(document.clone(), None)),
            })
        }
        Mutation::Delete { .. } => Ok(match current {
            Some(_) => MutationOutcome::Deleted,
            None => MutationOutcome::Noop,
        }),
        Mutation::Patch {
            id,
            patches,
            options,
        } => {
            let existing = current.ok_or_else(|| MutationError::DocumentNotFound { id: id.clone() })?;
            if let Some(expected) = &options.if_revision {
                let actual = revision(existing);
                if actual != Some(expected.as_str()) {
                    return Err(MutationError::RevisionMismatch {
                        id: id.clone(),
                        expected: expected.clone(),
                        actual: actual.map(str::to_string),
                    });
                }
            }
            let next = apply_patches(patches, existing).map_err(|source| MutationError::Patch {
                id: id.clone(),
                source,
            })?;
            match next {
                Cow::Borrowed(_) => Ok(MutationOutcome::Noop),
                Cow::Owned(next) => {
                    if document_id(&next) != document_id(existing) {
                        return Err(MutationError::IdChanged { id: id.clone() });
                    }
                    if revision(&next) != revision(existing) {
                        return Err(MutationError::RevisionChanged { id: id.clone() });
                    }
                    Ok(MutationOutcome::Updated(next))
                }
            }
        }
    }
}

fn require_id(document: &Document) -> Result<&str> {
    document_id(document).ok_or(MutationError::MissingId)
}

/// Apply a mutation and fold the outcome into the next document state.
pub fn next_document(current: Option<&Document>, mutation: &Mutation) -> Result<Option<Document>> {
    Ok(match apply_mutation(current, mutation)? {
        MutationOutcome::Created(doc) | MutationOutcome::Updated(doc) => Some(doc),
        MutationOutcome::Deleted => None,
        MutationOutcome::Noop => current.cloned(),
    })
}

/// Apply mutations to a document map, all or nothing.
///
/// On error the map is left untouched.
pub fn apply_to_map(
    documents: &mut HashMap<String, Document>,
    mutations: &[Mutation],
) -> Result<Vec<MutationOutcome>> {
    let mut staged: HashMap<String, Option<Document>> = HashMap::new();
    let mut outcomes = Vec::with_capacity(mutations.len());

    for mutation in mutations {
        let id = mutation
            .document_id()
            .ok_or(MutationError::MissingId)?
            .to_string();
        let current = match staged.get(&id) {
            Some(doc) => doc.as_ref(),
            None => documents.get(&id),
        };
        let outcome = apply_mutation(current, mutation)?;
        match &outcome {
            MutationOutcome::Created(doc) | MutationOutcome::Updated(doc) => {
                staged.insert(id, Some(doc.clone()));
            }
            MutationOutcome::Deleted => {
                staged.insert(id, None);
            }
            MutationOutcome::Noop => {}
        }
        outcomes.push(outcome);
    }

    for (id, doc) in staged {
        match doc {
            Some(doc) => documents.insert(id, doc),
            None => documents.remove(&id),
        };
    }
    Ok(outcomes)
}
