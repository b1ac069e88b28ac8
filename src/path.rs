//! Key paths: the location of a value inside the settings tree.
//!
//! A [`KeyPath`] is a sequence of [`Segment`]s. String segments address keys
//! in a mapping, integer segments address positions in a sequence. The
//! distinction is kept through every stage so the merge engine knows whether
//! to build a mapping or a sequence at each node.
//!
//! Environment variable names are turned into paths with [`KeyPath::split`]:
//!
//! | Name (after prefix) | Path |
//! |---------------------|------|
//! | `SECTION1__V1` | `section1.v1` |
//! | `SERVERS__0__HOST` | `servers.0.host` |
//! | `WEIRD____NAME` | `weird__name` (doubled delimiter is an escape) |

use std::fmt;

use serde_json::Value;

/// One step of a [`KeyPath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Key(String),
    Index(usize),
}

impl Segment {
    /// Parse a raw segment: pure digits become an index, anything else a key.
    pub fn parse(raw: &str) -> Self {
        if is_index(raw) {
            if let Ok(index) = raw.parse() {
                return Segment::Index(index);
            }
        }
        Segment::Key(raw.to_string())
    }

    pub fn as_key(&self) -> Option<&str> {
        match self {
            Segment::Key(key) => Some(key),
            Segment::Index(_) => None,
        }
    }

    pub fn as_index(&self) -> Option<usize> {
        match self {
            Segment::Key(_) => None,
            Segment::Index(index) => Some(*index),
        }
    }

    pub fn is_index(&self) -> bool {
        matches!(self, Segment::Index(_))
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Key(key) => write!(f, "{key}"),
            Segment::Index(index) => write!(f, "{index}"),
        }
    }
}

impl From<&str> for Segment {
    fn from(key: &str) -> Self {
        Segment::Key(key.to_string())
    }
}

impl From<String> for Segment {
    fn from(key: String) -> Self {
        Segment::Key(key)
    }
}

impl From<usize> for Segment {
    fn from(index: usize) -> Self {
        Segment::Index(index)
    }
}

/// True if `raw` is a non-negative integer usable as a sequence index.
pub fn is_index(raw: &str) -> bool {
    !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) && raw.parse::<usize>().is_ok()
}

/// Location of a value in the settings tree. The empty path is the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct KeyPath(Vec<Segment>);

impl KeyPath {
    pub fn root() -> Self {
        KeyPath(Vec::new())
    }

    pub fn new(segments: Vec<Segment>) -> Self {
        KeyPath(segments)
    }

    /// Parse a dotted spec such as `"a.b.0.c"`. Digit parts become indices.
    /// The empty string is the root.
    pub fn from_spec(spec: &str) -> Self {
        if spec.is_empty() {
            return KeyPath::root();
        }
        KeyPath(spec.split('.').map(Segment::parse).collect())
    }

    /// Split an environment-style name into a path.
    ///
    /// `delimiter` separates nesting levels. A doubled delimiter is an escape
    /// for one literal delimiter inside a segment, so `A____B` with `__`
    /// yields the single segment `a__b`. Empty segments are dropped and key
    /// segments are lower-cased.
    pub fn split(raw: &str, delimiter: &str) -> Self {
        KeyPath(
            split_raw(raw, delimiter)
                .into_iter()
                .filter(|part| !part.is_empty())
                .map(|part| Segment::parse(&part.to_lowercase()))
                .collect(),
        )
    }

    /// Join the path back into an environment-style name (upper case).
    ///
    /// Delimiters inside a segment are doubled so that [`split`](Self::split)
    /// recovers the same path.
    pub fn join(&self, delimiter: &str) -> String {
        let escaped = delimiter.repeat(2);
        self.0
            .iter()
            .map(|segment| {
                let text = segment.to_string().to_uppercase();
                if delimiter.is_empty() {
                    text
                } else {
                    text.replace(delimiter, &escaped)
                }
            })
            .collect::<Vec<_>>()
            .join(delimiter)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<&Segment> {
        self.0.last()
    }

    /// A new path one level deeper.
    pub fn child(&self, segment: impl Into<Segment>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        KeyPath(segments)
    }

    /// The path without its last segment, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        let (_, parents) = self.0.split_last()?;
        Some(KeyPath(parents.to_vec()))
    }

    /// Append all segments of `other`.
    pub fn join_path(&self, other: &KeyPath) -> Self {
        let mut segments = self.0.clone();
        segments.extend(other.0.iter().cloned());
        KeyPath(segments)
    }

    /// The longest shared prefix of two paths.
    pub fn common(&self, other: &KeyPath) -> Self {
        KeyPath(
            self.0
                .iter()
                .zip(&other.0)
                .take_while(|(a, b)| a == b)
                .map(|(a, _)| a.clone())
                .collect(),
        )
    }

    pub fn starts_with(&self, prefix: &KeyPath) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "<root>");
        }
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl FromIterator<Segment> for KeyPath {
    fn from_iter<I: IntoIterator<Item = Segment>>(iter: I) -> Self {
        KeyPath(iter.into_iter().collect())
    }
}

/// Resolve `path` against `tree`. Keys only match mappings, indices only
/// match sequences.
pub fn lookup<'v>(tree: &'v Value, path: &KeyPath) -> Option<&'v Value> {
    path.segments()
        .iter()
        .try_fold(tree, |node, segment| match (node, segment) {
            (Value::Object(map), Segment::Key(key)) => map.get(key),
            (Value::Array(items), Segment::Index(index)) => items.get(*index),
            _ => None,
        })
}

fn split_raw(raw: &str, delimiter: &str) -> Vec<String> {
    if delimiter.is_empty() {
        return vec![raw.to_string()];
    }
    let escaped = delimiter.repeat(2);
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut rest = raw;

    while !rest.is_empty() {
        if let Some(tail) = rest.strip_prefix(escaped.as_str()) {
            current.push_str(delimiter);
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix(delimiter) {
            parts.push(std::mem::take(&mut current));
            rest = tail;
        } else {
            let mut chars = rest.chars();
            if let Some(c) = chars.next() {
                current.push(c);
            }
            rest = chars.as_str();
        }
    }
    parts.push(current);
    parts
}
