//! Error types for patch application.

use crate::dmp::DmpError;
use thiserror::Error;

/// Errors raised by a single operation against the value it targets.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OperationError {
    #[error("expected {expected} value, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("no matching element to {action}")]
    NoMatchingElement { action: String },

    #[error("numeric result out of range")]
    Overflow,

    #[error("diff-match-patch failed: {0}")]
    Dmp(#[from] DmpError),
}

/// Errors that can occur while applying patches to a document.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PatchError {
    /// The value's shape does not match the path element used to descend into it.
    #[error("Cannot apply operation of type \"{op}\" to path {path} on {found} value")]
    Structural {
        op: &'static str,
        path: String,
        found: &'static str,
    },

    #[error("Operation \"{op}\" failed at path {path}: {source}")]
    Operation {
        op: &'static str,
        path: String,
        #[source]
        source: OperationError,
    },

    #[error("Invalid path \"{input}\": {reason}")]
    InvalidPath { input: String, reason: String },
}

impl PatchError {
    /// Whether this is a shape mismatch rather than an operation contract failure.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            PatchError::Structural { .. }
                | PatchError::Operation {
                    source: OperationError::TypeMismatch { .. },
                    ..
                }
        )
    }
}

pub type Result<T> = std::result::Result<T, PatchError>;
