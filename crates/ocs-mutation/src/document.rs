//! Documents and the tri-valued document state.

use serde_json::Value;

pub const ID_FIELD: &str = "_id";
pub const TYPE_FIELD: &str = "_type";
pub const REV_FIELD: &str = "_rev";
pub const CREATED_AT_FIELD: &str = "_createdAt";
pub const UPDATED_AT_FIELD: &str = "_updatedAt";

/// Documents are untyped JSON trees.
pub type Document = Value;

/// What is known about a document.
///
/// `Unknown` (never resolved) and `Absent` (known not to exist) are distinct:
/// an unknown document has not been loaded yet, an absent one was deleted or
/// never created.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum DocumentState {
    #[default]
    Unknown,
    Absent,
    Present(Document),
}

impl DocumentState {
    /// Known state from an optional document.
    pub fn known(doc: Option<Document>) -> Self {
        match doc {
            Some(doc) => DocumentState::Present(doc),
            None => DocumentState::Absent,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, DocumentState::Unknown)
    }

    pub fn is_present(&self) -> bool {
        matches!(self, DocumentState::Present(_))
    }

    /// The document, if present. Unknown and absent both yield `None`.
    pub fn document(&self) -> Option<&Document> {
        match self {
            DocumentState::Present(doc) => Some(doc),
            DocumentState::Unknown | DocumentState::Absent => None,
        }
    }

    pub fn into_document(self) -> Option<Document> {
        match self {
            DocumentState::Present(doc) => Some(doc),
            DocumentState::Unknown | DocumentState::Absent => None,
        }
    }

    /// Revision of the present document.
    pub fn revision(&self) -> Option<&str> {
        self.document().and_then(revision)
    }
}

/// The `_id` of a document.
pub fn document_id(doc: &Document) -> Option<&str> {
    doc.get(ID_FIELD).and_then(Value::as_str)
}

/// The `_rev` of a document.
pub fn revision(doc: &Document) -> Option<&str> {
    doc.get(REV_FIELD).and_then(Value::as_str)
}

/// Copy of `doc` with its `_rev` replaced (or removed when `rev` is `None`).
pub fn with_revision(mut doc: Document, rev: Option<&str>) -> Document {
    if let Value::Object(map) = &mut doc {
        match rev {
            Some(rev) => {
                map.insert(REV_FIELD.to_string(), Value::String(rev.to_string()));
            }
            None => {
                map.remove(REV_FIELD);
            }
        }
    }
    doc
}
