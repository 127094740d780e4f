//! Operation algebra - pure transforms over the value found at a path.
//!
//! An [`Operation`] never carries its own location; the patch engine resolves
//! the path and hands the operation the current value (or `None` if the final
//! property is absent). The result is an [`Effect`]:
//!
//! - [`Effect::Noop`] when nothing changed. The engine keeps the original
//!   reference so untouched ancestors are never copied.
//! - [`Effect::Replace`] with the new value.
//! - [`Effect::Remove`] to delete the object field or splice out the array element.

use crate::dmp;
use crate::error::OperationError;
use crate::path::{item_key, ItemRef, Lookup};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::fmt;

/// Where `insert`/`upsert` place new items relative to the reference item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Position {
    Before,
    After,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Before => write!(f, "before"),
            Position::After => write!(f, "after"),
        }
    }
}

/// A typed transform applied at a resolved location.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Operation {
    /// Unconditional replace.
    Set { value: Value },
    /// Remove an object field or array element.
    Unset,
    /// Set only if the current value is absent.
    SetIfMissing { value: Value },
    Inc { amount: Number },
    Dec { amount: Number },
    /// Splice `items` before or after `reference`.
    Insert {
        items: Vec<Value>,
        position: Position,
        reference: ItemRef,
    },
    /// Replace keyed items in place, insert the rest relative to `reference`.
    Upsert {
        items: Vec<Value>,
        position: Position,
        reference: ItemRef,
    },
    /// Splice out the single element at `reference` and splice in `items`.
    Replace { items: Vec<Value>, reference: ItemRef },
    /// Remove `[start, end)`, or everything from `start` if `end` is `None`.
    Truncate { start: usize, end: Option<usize> },
    /// Shallow merge into an object.
    Assign { value: Map<String, Value> },
    /// Shallow key removal from an object.
    Unassign { keys: Vec<String> },
    /// Apply a textual diff-match-patch delta to a string.
    DiffMatchPatch { patch: String },
}

/// The outcome of applying an operation to a value.
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    Noop,
    Replace(Value),
    Remove,
}

impl Operation {
    /// The operation's wire name, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Set { .. } => "set",
            Operation::Unset => "unset",
            Operation::SetIfMissing { .. } => "setIfMissing",
            Operation::Inc { .. } => "inc",
            Operation::Dec { .. } => "dec",
            Operation::Insert { .. } => "insert",
            Operation::Upsert { .. } => "upsert",
            Operation::Replace { .. } => "replace",
            Operation::Truncate { .. } => "truncate",
            Operation::Assign { .. } => "assign",
            Operation::Unassign { .. } => "unassign",
            Operation::DiffMatchPatch { .. } => "diffMatchPatch",
        }
    }

    /// Apply the operation to the current value at its location.
    pub fn apply(&self, current: Option<&Value>) -> Result<Effect, OperationError> {
        match self {
            Operation::Set { value } => Ok(Effect::Replace(value.clone())),
            Operation::Unset => Ok(match current {
                Some(_) => Effect::Remove,
                None => Effect::Noop,
            }),
            Operation::SetIfMissing { value } => Ok(match current {
                Some(_) => Effect::Noop,
                None => Effect::Replace(value.clone()),
            }),
            Operation::Inc { amount } => add(current, amount, false),
            Operation::Dec { amount } => add(current, amount, true),
            Operation::Insert {
                items,
                position,
                reference,
            } => {
                let array = expect_array(current)?;
                Ok(match insert(array, items, *position, reference)? {
                    Some(next) => Effect::Replace(Value::Array(next)),
                    None => Effect::Noop,
                })
            }
            Operation::Upsert {
                items,
                position,
                reference,
            } => upsert(expect_array(current)?, items, *position, reference),
            Operation::Replace { items, reference } => {
                let array = expect_array(current)?;
                let index = reference.resolve(array).found().ok_or_else(|| {
                    OperationError::NoMatchingElement {
                        action: "replace".to_string(),
                    }
                })?;
                let mut next = array.to_vec();
                next.splice(index..=index, items.iter().cloned());
                Ok(Effect::Replace(Value::Array(next)))
            }
            Operation::Truncate { start, end } => {
                let array = expect_array(current)?;
                let end = end.unwrap_or(array.len()).min(array.len());
                if *start >= end {
                    return Ok(Effect::Noop);
                }
                let mut next = array.to_vec();
                next.drain(*start..end);
                Ok(Effect::Replace(Value::Array(next)))
            }
            Operation::Assign { value } => {
                let object = expect_object(current)?;
                if value.is_empty() {
                    return Ok(Effect::Noop);
                }
                let mut next = object.clone();
                for (k, v) in value {
                    next.insert(k.clone(), v.clone());
                }
                Ok(Effect::Replace(Value::Object(next)))
            }
            Operation::Unassign { keys } => {
                let object = expect_object(current)?;
                if !keys.iter().any(|k| object.contains_key(k)) {
                    return Ok(Effect::Noop);
                }
                let mut next = object.clone();
                for k in keys {
                    next.remove(k);
                }
                Ok(Effect::Replace(Value::Object(next)))
            }
            Operation::DiffMatchPatch { patch } => {
                let text = match current {
                    Some(Value::String(s)) => s,
                    other => {
                        return Err(OperationError::TypeMismatch {
                            expected: "string",
                            found: type_name(other),
                        })
                    }
                };
                let patches = dmp::parse_patch(patch)?;
                if patches.is_empty() {
                    return Ok(Effect::Noop);
                }
                let next = dmp::apply_patch(text, &patches)?;
                if &next == text {
                    Ok(Effect::Noop)
                } else {
                    Ok(Effect::Replace(Value::String(next)))
                }
            }
        }
    }
}

/// Human readable name of a value's shape.
pub fn type_name(value: Option<&Value>) -> &'static str {
    match value {
        None => "undefined",
        Some(Value::Null) => "null",
        Some(Value::Bool(_)) => "boolean",
        Some(Value::Number(_)) => "number",
        Some(Value::String(_)) => "string",
        Some(Value::Array(_)) => "array",
        Some(Value::Object(_)) => "object",
    }
}

fn expect_array(current: Option<&Value>) -> Result<&[Value], OperationError> {
    match current {
        Some(Value::Array(items)) => Ok(items),
        other => Err(OperationError::TypeMismatch {
            expected: "array",
            found: type_name(other),
        }),
    }
}

fn expect_object(current: Option<&Value>) -> Result<&Map<String, Value>, OperationError> {
    match current {
        Some(Value::Object(map)) => Ok(map),
        other => Err(OperationError::TypeMismatch {
            expected: "object",
            found: type_name(other),
        }),
    }
}

fn add(current: Option<&Value>, amount: &Number, negate: bool) -> Result<Effect, OperationError> {
    let base = match current {
        Some(Value::Number(n)) => n,
        other => {
            return Err(OperationError::TypeMismatch {
                expected: "number",
                found: type_name(other),
            })
        }
    };

    if let (Some(a), Some(b)) = (base.as_i64(), amount.as_i64()) {
        let result = if negate {
            a.checked_sub(b)
        } else {
            a.checked_add(b)
        };
        if let Some(sum) = result {
            return Ok(if b == 0 {
                Effect::Noop
            } else {
                Effect::Replace(Value::Number(sum.into()))
            });
        }
    }

    let a = base.as_f64().ok_or(OperationError::Overflow)?;
    let b = amount.as_f64().ok_or(OperationError::Overflow)?;
    let sum = if negate { a - b } else { a + b };
    if b == 0.0 {
        return Ok(Effect::Noop);
    }
    Number::from_f64(sum)
        .map(|n| Effect::Replace(Value::Number(n)))
        .ok_or(OperationError::Overflow)
}

/// Splice `items` relative to `reference`. `Ok(None)` means nothing changed.
fn insert(
    array: &[Value],
    items: &[Value],
    position: Position,
    reference: &ItemRef,
) -> Result<Option<Vec<Value>>, OperationError> {
    if items.is_empty() {
        return Ok(None);
    }
    if array.is_empty() {
        return Ok(Some(items.to_vec()));
    }
    let at = match reference.resolve(array) {
        Lookup::Found(index) => match position {
            Position::Before => index,
            Position::After => index + 1,
        },
        Lookup::OutOfRange => return Ok(None),
        Lookup::NotFound => {
            return Err(OperationError::NoMatchingElement {
                action: format!("insert {}", position),
            })
        }
    };
    let mut next = Vec::with_capacity(array.len() + items.len());
    next.extend_from_slice(&array[..at]);
    next.extend(items.iter().cloned());
    next.extend_from_slice(&array[at..]);
    Ok(Some(next))
}

fn upsert(
    array: &[Value],
    items: &[Value],
    position: Position,
    reference: &ItemRef,
) -> Result<Effect, OperationError> {
    let mut next: Option<Vec<Value>> = None;
    let mut missing = Vec::new();

    for item in items {
        let existing = item_key(item)
            .and_then(|key| array.iter().position(|e| item_key(e) == Some(key)));
        match existing {
            Some(index) => {
                next.get_or_insert_with(|| array.to_vec())[index] = item.clone();
            }
            None => missing.push(item.clone()),
        }
    }

    let replaced = next.is_some();
    let base = next.unwrap_or_else(|| array.to_vec());
    match insert(&base, &missing, position, reference)? {
        Some(inserted) => Ok(Effect::Replace(Value::Array(inserted))),
        None if replaced => Ok(Effect::Replace(Value::Array(base))),
        None => Ok(Effect::Noop),
    }
}
