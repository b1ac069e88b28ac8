//! Fragments: the unit of settings data between readers and the merge engine.

use std::fmt;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::format::Format;
use crate::path::{KeyPath, Segment};
use crate::processor::Indirection;

/// Where a fragment came from. Used for diagnostics and the update log only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Env { var: String },
    File { path: PathBuf },
    Content { format: Format },
    Update,
    /// A value produced by following an indirection found in `outer`.
    Via { outer: Box<Source>, inner: Box<Source> },
}

impl Source {
    pub fn env(var: impl Into<String>) -> Self {
        Source::Env { var: var.into() }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Source::File { path: path.into() }
    }

    /// Chain `inner` behind this source.
    pub fn via(&self, inner: Source) -> Self {
        Source::Via {
            outer: Box::new(self.clone()),
            inner: Box::new(inner),
        }
    }

    /// Every file on the provenance chain, outermost first.
    pub fn files(&self) -> Vec<&Path> {
        match self {
            Source::File { path } => vec![path.as_path()],
            Source::Via { outer, inner } => {
                let mut files = outer.files();
                files.extend(inner.files());
                files
            }
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Env { var } => write!(f, "environment variable {var}"),
            Source::File { path } => write!(f, "file {}", path.display()),
            Source::Content { format } => write!(f, "inline {} content", format.name()),
            Source::Update => write!(f, "update"),
            Source::Via { outer, inner } => write!(f, "{outer} > {inner}"),
        }
    }
}

/// A value destined for one location of the settings tree.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub path: KeyPath,
    pub value: Value,
    pub source: Source,
}

impl PartialEq for Fragment {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path && self.value == other.value
    }
}

impl Fragment {
    pub fn new(path: KeyPath, value: Value, source: Source) -> Self {
        Self {
            path,
            value,
            source,
        }
    }

    /// The indirection named by the last path segment, if any.
    pub fn indirection(&self) -> Option<Indirection> {
        match self.path.last() {
            Some(Segment::Key(key)) => Indirection::detect(key).map(|(kind, _)| kind),
            _ => None,
        }
    }

    /// Decompose into one fragment per leaf.
    ///
    /// Only non-empty mappings are descended into. Sequences, scalars, empty
    /// mappings, and anything stored under an indirection key stay whole.
    pub fn into_leaves(self) -> Vec<Fragment> {
        let mut out = Vec::new();
        collect_leaves(self.path, self.value, &self.source, &mut out);
        out
    }
}

fn collect_leaves(path: KeyPath, value: Value, source: &Source, out: &mut Vec<Fragment>) {
    let is_indirection = matches!(path.last(), Some(Segment::Key(key)) if Indirection::detect(key).is_some());
    match value {
        Value::Object(map) if !map.is_empty() && !is_indirection => {
            for (key, child) in map {
                collect_leaves(path.child(key), child, source, out);
            }
        }
        leaf => out.push(Fragment::new(path, leaf, source.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn paths(fragments: &[Fragment]) -> Vec<String> {
        fragments.iter().map(|f| f.path.to_string()).collect()
    }

    #[test]
    fn leaves_walk_nested_mappings() {
        let fragment = Fragment::new(
            KeyPath::root(),
            json!({"a": {"b": 1, "c": {"d": "x"}}, "e": true}),
            Source::Update,
        );
        let leaves = fragment.into_leaves();
        assert_eq!(paths(&leaves), ["a.b", "a.c.d", "e"]);
        assert_eq!(leaves[1].value, json!("x"));
    }

    #[test]
    fn sequences_are_leaves() {
        let fragment = Fragment::new(KeyPath::root(), json!({"a": [1, {"b": 2}]}), Source::Update);
        let leaves = fragment.into_leaves();
        assert_eq!(paths(&leaves), ["a"]);
        assert_eq!(leaves[0].value, json!([1, {"b": 2}]));
    }

    #[test]
    fn empty_mapping_is_a_leaf() {
        let fragment = Fragment::new(KeyPath::from_spec("x"), json!({"a": {}}), Source::Update);
        let leaves = fragment.into_leaves();
        assert_eq!(paths(&leaves), ["x.a"]);
        assert_eq!(leaves[0].value, json!({}));
    }

    #[test]
    fn indirection_keys_are_not_descended() {
        let fragment = Fragment::new(
            KeyPath::root(),
            json!({"db": {"conf_from_file": ["a.json", "b.json"], "port": 1}}),
            Source::Update,
        );
        let leaves = fragment.into_leaves();
        assert_eq!(paths(&leaves), ["db.conf_from_file", "db.port"]);
        assert_eq!(leaves[0].indirection(), Some(Indirection::File));
        assert_eq!(leaves[1].indirection(), None);
    }

    #[test]
    fn equality_ignores_source() {
        let a = Fragment::new(KeyPath::from_spec("a"), json!(1), Source::env("APP__A"));
        let b = Fragment::new(KeyPath::from_spec("a"), json!(1), Source::file("/tmp/x.json"));
        assert_eq!(a, b);
    }

    #[test]
    fn source_chain_display_and_files() {
        let source = Source::file("/etc/app/settings.yaml")
            .via(Source::file("/etc/app/db.json"))
            .via(Source::Content {
                format: Format::Toml,
            });
        assert_eq!(
            source.to_string(),
            "file /etc/app/settings.yaml > file /etc/app/db.json > inline toml content"
        );
        assert_eq!(
            source.files(),
            [Path::new("/etc/app/settings.yaml"), Path::new("/etc/app/db.json")]
        );
    }
}
