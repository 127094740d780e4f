//! Path addressing into document trees.
//!
//! A [`Path`] is an ordered list of [`PathSegment`]s. Each segment is either a
//! property name, a numeric array index, or a keyed selector that identifies an
//! array element by its `_key` field independently of its position.
//!
//! The string form used in diagnostics looks like
//! `sections[_key=="intro"].blocks[-1].text`.

use crate::error::PatchError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Field holding the stable identity of array elements.
pub const KEY_FIELD: &str = "_key";

/// A path into a document.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Path(Vec<PathSegment>);

impl Path {
    /// Create an empty (root) path.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Create a path from segments.
    pub fn new(segments: Vec<PathSegment>) -> Self {
        Self(segments)
    }

    /// Parse a path from its string form (e.g. `items[0].title` or `items[_key=="a"]`).
    pub fn parse(input: &str) -> Result<Self, PatchError> {
        Parser::new(input).parse()
    }

    /// Get the segments.
    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    /// Check if this is the root path.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Get the parent path.
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            None
        } else {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    /// Get the last segment.
    pub fn last(&self) -> Option<&PathSegment> {
        self.0.last()
    }

    /// Append a segment.
    pub fn push(&mut self, segment: PathSegment) {
        self.0.push(segment);
    }

    /// Create a child path with a property name.
    pub fn child_key(&self, key: impl Into<String>) -> Self {
        let mut new = self.clone();
        new.push(PathSegment::Property(key.into()));
        new
    }

    /// Create a child path with an array index.
    pub fn child_index(&self, index: i64) -> Self {
        let mut new = self.clone();
        new.push(PathSegment::Index(index));
        new
    }

    /// Create a child path selecting an array element by `_key`.
    pub fn child_keyed(&self, key: impl Into<String>) -> Self {
        let mut new = self.clone();
        new.push(PathSegment::Keyed(key.into()));
        new
    }

    /// Whether the two paths can address the same value or one can contain the other.
    ///
    /// Array selectors are compared conservatively: two indices of the same
    /// sign alias only when equal, while an index counted from the end may
    /// address any position counted from the start. Keyed selectors may alias
    /// any other selector, since a `_key` can be rewritten in place.
    pub fn may_overlap(&self, other: &Path) -> bool {
        self.0
            .iter()
            .zip(other.0.iter())
            .all(|(a, b)| a.may_alias(b))
    }

    /// Resolve this path against a value without modifying it.
    ///
    /// Returns `None` when any segment does not resolve or the shape does not
    /// match the segment kind.
    pub fn get<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        let mut current = value;
        for segment in &self.0 {
            current = match (segment, current) {
                (PathSegment::Property(key), Value::Object(map)) => map.get(key)?,
                (segment, Value::Array(items)) => {
                    let index = segment.as_item_ref()?.resolve(items).found()?;
                    &items[index]
                }
                _ => return None,
            };
        }
        Some(current)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "<root>");
        }
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                PathSegment::Property(key) if i == 0 => write!(f, "{}", key)?,
                PathSegment::Property(key) => write!(f, ".{}", key)?,
                PathSegment::Index(index) => write!(f, "[{}]", index)?,
                PathSegment::Keyed(key) => write!(f, "[{}=={:?}]", KEY_FIELD, key)?,
            }
        }
        Ok(())
    }
}

impl From<Vec<PathSegment>> for Path {
    fn from(segments: Vec<PathSegment>) -> Self {
        Self(segments)
    }
}

/// A segment in a document path.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathSegment {
    /// Object property.
    Property(String),
    /// Array position; negative values count from the end.
    Index(i64),
    /// Array element whose `_key` equals the given value.
    Keyed(String),
}

impl PathSegment {
    /// View an array-addressing segment as an element reference.
    pub fn as_item_ref(&self) -> Option<ItemRef> {
        match self {
            PathSegment::Property(_) => None,
            PathSegment::Index(index) => Some(ItemRef::Index(*index)),
            PathSegment::Keyed(key) => Some(ItemRef::Key(key.clone())),
        }
    }

    pub fn is_array_selector(&self) -> bool {
        !matches!(self, PathSegment::Property(_))
    }

    fn may_alias(&self, other: &PathSegment) -> bool {
        match (self, other) {
            (PathSegment::Property(a), PathSegment::Property(b)) => a == b,
            (PathSegment::Index(a), PathSegment::Index(b)) => (*a < 0) != (*b < 0) || a == b,
            (PathSegment::Property(_), _) | (_, PathSegment::Property(_)) => false,
            _ => true,
        }
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Property(k) => write!(f, "{}", k),
            PathSegment::Index(i) => write!(f, "[{}]", i),
            PathSegment::Keyed(k) => write!(f, "[{}=={:?}]", KEY_FIELD, k),
        }
    }
}

/// Reference to an array element, used as an operation's anchor.
///
/// Serialized as a bare number for positions and a bare string for keys.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ItemRef {
    /// Position; negative values count from the end.
    Index(i64),
    /// Element whose `_key` equals the given value.
    Key(String),
}

impl ItemRef {
    /// Locate this reference within `items`.
    pub fn resolve(&self, items: &[Value]) -> Lookup {
        match self {
            ItemRef::Index(index) => {
                let len = items.len() as i64;
                let resolved = if *index < 0 { len + index } else { *index };
                if (0..len).contains(&resolved) {
                    Lookup::Found(resolved as usize)
                } else {
                    Lookup::OutOfRange
                }
            }
            ItemRef::Key(key) => items
                .iter()
                .position(|item| item_key(item) == Some(key.as_str()))
                .map(Lookup::Found)
                .unwrap_or(Lookup::NotFound),
        }
    }
}

impl fmt::Display for ItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemRef::Index(i) => write!(f, "{}", i),
            ItemRef::Key(k) => write!(f, "{{{}: {:?}}}", KEY_FIELD, k),
        }
    }
}

/// Outcome of resolving an [`ItemRef`] against an array.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lookup {
    /// The reference resolved to a concrete position.
    Found(usize),
    /// A numeric reference outside the array bounds.
    OutOfRange,
    /// A keyed reference that matched no element.
    NotFound,
}

impl Lookup {
    pub fn found(self) -> Option<usize> {
        match self {
            Lookup::Found(index) => Some(index),
            Lookup::OutOfRange | Lookup::NotFound => None,
        }
    }
}

/// The `_key` of an array element, if it has a string one.
pub fn item_key(item: &Value) -> Option<&str> {
    item.get(KEY_FIELD).and_then(Value::as_str)
}

struct Parser<'a> {
    input: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    segments: Vec<PathSegment>,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().peekable(),
            segments: Vec::new(),
        }
    }

    fn error(&self, reason: impl Into<String>) -> PatchError {
        PatchError::InvalidPath {
            input: self.input.to_string(),
            reason: reason.into(),
        }
    }

    fn parse(mut self) -> Result<Path, PatchError> {
        let mut expect_property = true;
        while let Some(&(_, c)) = self.chars.peek() {
            match c {
                '[' => {
                    self.chars.next();
                    let segment = self.bracket()?;
                    self.segments.push(segment);
                    expect_property = false;
                }
                '.' if !expect_property => {
                    self.chars.next();
                    expect_property = true;
                }
                _ if expect_property => {
                    let name = self.identifier();
                    if name.is_empty() {
                        return Err(self.error(format!("unexpected character '{}'", c)));
                    }
                    self.segments.push(PathSegment::Property(name));
                    expect_property = false;
                }
                _ => return Err(self.error(format!("unexpected character '{}'", c))),
            }
        }
        if expect_property && !self.segments.is_empty() {
            return Err(self.error("trailing '.'"));
        }
        Ok(Path(self.segments))
    }

    fn identifier(&mut self) -> String {
        let mut name = String::new();
        while let Some(&(_, c)) = self.chars.peek() {
            if c == '.' || c == '[' {
                break;
            }
            name.push(c);
            self.chars.next();
        }
        name
    }

    fn bracket(&mut self) -> Result<PathSegment, PatchError> {
        let mut body = String::new();
        let mut quote: Option<char> = None;
        loop {
            let Some((_, c)) = self.chars.next() else {
                return Err(self.error("unterminated '['"));
            };
            match (quote, c) {
                (None, ']') => break,
                (None, '"') | (None, '\'') => {
                    quote = Some(c);
                    body.push(c);
                }
                (Some(q), c) if c == q => {
                    quote = None;
                    body.push(c);
                }
                _ => body.push(c),
            }
        }
        let body = body.trim();
        if let Ok(index) = body.parse::<i64>() {
            return Ok(PathSegment::Index(index));
        }
        let Some((field, value)) = body.split_once("==") else {
            return Err(self.error(format!("invalid selector '{}'", body)));
        };
        if field.trim() != KEY_FIELD {
            return Err(self.error(format!("only {} selectors are supported", KEY_FIELD)));
        }
        let value = value.trim();
        let unquoted = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
            .ok_or_else(|| self.error(format!("selector value must be quoted: {}", value)))?;
        Ok(PathSegment::Keyed(unquoted.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_and_display() {
        let path = Path::parse(r#"sections[_key=="intro"].blocks[-1].text"#).unwrap();
        assert_eq!(
            path.segments(),
            &[
                PathSegment::Property("sections".into()),
                PathSegment::Keyed("intro".into()),
                PathSegment::Property("blocks".into()),
                PathSegment::Index(-1),
                PathSegment::Property("text".into()),
            ]
        );
        assert_eq!(path.to_string(), r#"sections[_key=="intro"].blocks[-1].text"#);
        assert_eq!(Path::parse("").unwrap(), Path::root());
        assert_eq!(
            Path::parse("[0].name").unwrap(),
            Path::root().child_index(0).child_key("name")
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(Path::parse("items[").is_err());
        assert!(Path::parse("items[id==\"x\"]").is_err());
        assert!(Path::parse("items.").is_err());
        assert!(Path::parse("items[_key==x]").is_err());
    }

    #[test]
    fn test_item_ref_resolution() {
        let items = vec![json!({"_key": "a"}), json!({"_key": "b"}), json!(3)];
        assert_eq!(ItemRef::Index(0).resolve(&items), Lookup::Found(0));
        assert_eq!(ItemRef::Index(-1).resolve(&items), Lookup::Found(2));
        assert_eq!(ItemRef::Index(3).resolve(&items), Lookup::OutOfRange);
        assert_eq!(ItemRef::Index(-4).resolve(&items), Lookup::OutOfRange);
        assert_eq!(ItemRef::Key("b".into()).resolve(&items), Lookup::Found(1));
        assert_eq!(ItemRef::Key("z".into()).resolve(&items), Lookup::NotFound);
    }

    #[test]
    fn test_get() {
        let doc = json!({"items": [{"_key": "a", "title": "first"}, {"_key": "b"}]});
        let path = Path::parse(r#"items[_key=="a"].title"#).unwrap();
        assert_eq!(path.get(&doc), Some(&json!("first")));
        assert_eq!(Path::parse("items[5]").unwrap().get(&doc), None);
        assert_eq!(Path::parse("items.title").unwrap().get(&doc), None);
    }

    #[test]
    fn test_overlap() {
        let a = Path::parse("items[0].title").unwrap();
        assert!(a.may_overlap(&Path::parse("items").unwrap()));
        assert!(a.may_overlap(&Path::parse(r#"items[_key=="x"]"#).unwrap()));
        assert!(!a.may_overlap(&Path::parse("items[1].title").unwrap()));
        assert!(!a.may_overlap(&Path::parse("title").unwrap()));
    }

    #[test]
    fn test_overlap_across_index_signs() {
        // On a three element array [1] and [-2] are the same element.
        let a = Path::parse("items[1]").unwrap();
        assert!(a.may_overlap(&Path::parse("items[-2]").unwrap()));
        assert!(Path::parse("items[-1].t")
            .unwrap()
            .may_overlap(&Path::parse("items[0].t").unwrap()));
        assert!(!Path::parse("items[-1]")
            .unwrap()
            .may_overlap(&Path::parse("items[-2]").unwrap()));
        assert!(Path::parse("items[-1]")
            .unwrap()
            .may_overlap(&Path::parse(r#"items[_key=="a"]"#).unwrap()));
        assert!(Path::parse(r#"items[_key=="a"].t"#)
            .unwrap()
            .may_overlap(&Path::parse(r#"items[_key=="b"].t"#).unwrap()));
    }
}
