//! Copy-on-write patch application.
//!
//! [`apply_patch`] descends the document along the patch path and applies the
//! operation at the end. Only containers on the touched spine are cloned: when
//! the operation reports no change the original reference is returned as
//! [`Cow::Borrowed`], so callers can detect a no-op without comparing values.

use crate::error::{PatchError, Result};
use crate::operation::{type_name, Effect, Operation};
use crate::path::{Path, PathSegment, KEY_FIELD};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;

/// An operation bound to the path it applies at.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodePatch {
    pub path: Path,
    pub op: Operation,
}

impl NodePatch {
    pub fn new(path: Path, op: Operation) -> Self {
        Self { path, op }
    }

    /// The path whose value this patch may change, or whose resolution it
    /// may move.
    ///
    /// Unsetting an array element shifts its siblings, so its footprint is the
    /// whole array. Writing an element's `_key` moves keyed selectors, so its
    /// footprint is the whole element.
    pub fn footprint(&self) -> Cow<'_, Path> {
        match (&self.op, self.path.last()) {
            (Operation::Unset, Some(last)) if last.is_array_selector() => {
                Cow::Owned(self.path.parent().unwrap_or_default())
            }
            (_, Some(PathSegment::Property(key))) if key == KEY_FIELD => {
                Cow::Owned(self.path.parent().unwrap_or_default())
            }
            _ => Cow::Borrowed(&self.path),
        }
    }

    /// Build a patch from a path string. See [`Path::parse`].
    pub fn at(path: &str, op: Operation) -> Result<Self> {
        Ok(Self {
            path: Path::parse(path)?,
            op,
        })
    }
}

enum Outcome {
    Unchanged,
    Changed(Value),
    Removed,
}

/// Apply a single patch. Returns the input reference when nothing changed.
pub fn apply_patch<'a>(patch: &NodePatch, doc: &'a Value) -> Result<Cow<'a, Value>> {
    match descend(patch, doc, patch.path.segments())? {
        Outcome::Unchanged => Ok(Cow::Borrowed(doc)),
        Outcome::Changed(value) => Ok(Cow::Owned(value)),
        Outcome::Removed => Err(structural(patch, doc)),
    }
}

/// Apply patches in order; each patch sees the result of the previous ones.
pub fn apply_patches<'a>(patches: &[NodePatch], doc: &'a Value) -> Result<Cow<'a, Value>> {
    let mut current = Cow::Borrowed(doc);
    for patch in patches {
        let next = match apply_patch(patch, &current)? {
            Cow::Borrowed(_) => None,
            Cow::Owned(value) => Some(value),
        };
        if let Some(value) = next {
            current = Cow::Owned(value);
        }
    }
    Ok(current)
}

fn structural(patch: &NodePatch, found: &Value) -> PatchError {
    PatchError::Structural {
        op: patch.op.kind(),
        path: patch.path.to_string(),
        found: type_name(Some(found)),
    }
}

fn run(patch: &NodePatch, current: Option<&Value>) -> Result<Outcome> {
    let effect = patch
        .op
        .apply(current)
        .map_err(|source| PatchError::Operation {
            op: patch.op.kind(),
            path: patch.path.to_string(),
            source,
        })?;
    Ok(match effect {
        Effect::Noop => Outcome::Unchanged,
        Effect::Replace(value) => Outcome::Changed(value),
        Effect::Remove => Outcome::Removed,
    })
}

fn descend(patch: &NodePatch, value: &Value, segments: &[PathSegment]) -> Result<Outcome> {
    let Some((segment, rest)) = segments.split_first() else {
        return run(patch, Some(value));
    };

    match (segment, value) {
        (PathSegment::Property(key), Value::Object(map)) => {
            let child = map.get(key);
            let outcome = match (child, rest.is_empty()) {
                (_, true) => run(patch, child)?,
                (Some(child), false) => descend(patch, child, rest)?,
                // missing intermediate property
                (None, false) => Outcome::Unchanged,
            };
            Ok(match outcome {
                Outcome::Unchanged => Outcome::Unchanged,
                Outcome::Changed(next) => {
                    let mut map = map.clone();
                    map.insert(key.clone(), next);
                    Outcome::Changed(Value::Object(map))
                }
                Outcome::Removed => {
                    let mut map = map.clone();
                    map.remove(key);
                    Outcome::Changed(Value::Object(map))
                }
            })
        }
        (PathSegment::Index(_) | PathSegment::Keyed(_), Value::Array(items)) => {
            let Some(index) = segment
                .as_item_ref()
                .and_then(|r| r.resolve(items).found())
            else {
                return Ok(Outcome::Unchanged);
            };
            let outcome = if rest.is_empty() {
                run(patch, Some(&items[index]))?
            } else {
                descend(patch, &items[index], rest)?
            };
            Ok(match outcome {
                Outcome::Unchanged => Outcome::Unchanged,
                Outcome::Changed(next) => {
                    let mut items = items.clone();
                    items[index] = next;
                    Outcome::Changed(Value::Array(items))
                }
                Outcome::Removed => {
                    let mut items = items.clone();
                    items.remove(index);
                    Outcome::Changed(Value::Array(items))
                }
            })
        }
        _ => Err(structural(patch, value)),
    }
}
