//! Error types for mutations and rebase.

use ocs_patch::PatchError;
use thiserror::Error;

/// Coarse classification of mutation failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    AlreadyExists,
    NotFound,
    RevisionMismatch,
    Structural,
    InvalidOperation,
    InvalidDocument,
}

/// Errors that can occur while applying a mutation to a document.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MutationError {
    #[error("Document already exists: {id}")]
    AlreadyExists { id: String },

    #[error("Document not found: {id}")]
    DocumentNotFound { id: String },

    #[error("Revision mismatch on {id}: expected {expected}, found {}", .actual.as_deref().unwrap_or("none"))]
    RevisionMismatch {
        id: String,
        expected: String,
        actual: Option<String>,
    },

    #[error("Document is missing an _id")]
    MissingId,

    #[error("Cannot change _id of {id}")]
    IdChanged { id: String },

    #[error("Cannot change _rev of {id} locally")]
    RevisionChanged { id: String },

    #[error("Patch failed on {id}: {source}")]
    Patch {
        id: String,
        #[source]
        source: PatchError,
    },
}

impl MutationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MutationError::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            MutationError::DocumentNotFound { .. } => ErrorKind::NotFound,
            MutationError::RevisionMismatch { .. } => ErrorKind::RevisionMismatch,
            MutationError::MissingId
            | MutationError::IdChanged { .. }
            | MutationError::RevisionChanged { .. } => ErrorKind::InvalidDocument,
            MutationError::Patch { source, .. } if source.is_structural() => ErrorKind::Structural,
            MutationError::Patch { .. } => ErrorKind::InvalidOperation,
        }
    }

    /// Whether the failure may go away once the real remote document is known.
    pub fn depends_on_remote(&self) -> bool {
        !matches!(
            self.kind(),
            ErrorKind::AlreadyExists | ErrorKind::InvalidDocument
        )
    }
}

/// A staged group no longer applies on top of the new remote state.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Rebase of {id} failed at staged group {group_index}: {source}")]
pub struct RebaseError {
    pub id: String,
    pub group_index: usize,
    pub mutation_index: usize,
    #[source]
    pub source: MutationError,
}

pub type Result<T> = std::result::Result<T, MutationError>;
