//! The merge engine: a left fold of fragments into one settings tree.
//!
//! Each fragment is placed at its path. Missing intermediate nodes are
//! created as mappings for key segments and sequences for index segments;
//! an intermediate scalar is replaced by the container the path needs.
//!
//! A container of the wrong kind is replaced too when it was shaped by an
//! earlier source: a mapping loaded from one file wins over a sequence from
//! another. Mixing key and index segments at one location within a single
//! source (`APP__A__0` next to `APP__A__KEY`) is a
//! [`PathConflict`](StrataError::PathConflict). Programmatic updates never
//! conflict this way; each one replaces what it addresses.
//!
//! At the target location:
//!
//! | Existing | Incoming | Result |
//! |----------|----------|--------|
//! | mapping | mapping | merged key by key, recursively |
//! | sequence | sequence | merged index by index, length is the longer of the two |
//! | anything else | anything | incoming wins |
//!
//! An index segment may address an existing element or append one (index
//! equal to the current length). Anything further is a gap and fails with
//! [`PathConflict`](StrataError::PathConflict).

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde_json::map::Entry;
use serde_json::{Map, Value};

use crate::error::StrataError;
use crate::format;
use crate::fragment::{Fragment, Source};
use crate::path::{KeyPath, Segment};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateAction {
    /// A value was placed at a previously empty location.
    Set,
    /// An indirection key was consumed and does not appear in the tree.
    Remove,
    /// An existing value was overwritten.
    Replace,
}

/// One step of the most recent update, in application order.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateLogEntry {
    pub path: KeyPath,
    pub action: UpdateAction,
    pub source: Source,
    pub timestamp: DateTime<Utc>,
}

impl UpdateLogEntry {
    fn new(path: KeyPath, action: UpdateAction, source: &Source) -> Self {
        Self {
            path,
            action,
            source: source.clone(),
            timestamp: Utc::now(),
        }
    }
}

impl fmt::Display for UpdateLogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self.action {
            UpdateAction::Set => "loaded",
            UpdateAction::Replace => "replaced",
            UpdateAction::Remove => "removed",
        };
        write!(f, "{verb} {} from {}", self.path, self.source)
    }
}

/// Accumulates fragments into a tree. A fresh engine is used for every
/// rebuild so a failure never touches a committed tree.
#[derive(Debug)]
pub struct MergeEngine {
    tree: Value,
    log: Vec<UpdateLogEntry>,
    /// Which source last addressed each container through a path segment.
    shapes: HashMap<KeyPath, Origin>,
}

/// The outermost source of a fragment. Fragments with the same origin must
/// agree on the kind of every container they address.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Origin {
    Environment,
    File(PathBuf),
    Content,
}

impl Origin {
    fn of(source: &Source) -> Option<Self> {
        match source {
            Source::Env { .. } => Some(Origin::Environment),
            Source::File { path } => Some(Origin::File(path.clone())),
            Source::Content { .. } => Some(Origin::Content),
            Source::Update => None,
            Source::Via { outer, .. } => Origin::of(outer),
        }
    }
}

impl Default for MergeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MergeEngine {
    pub fn new() -> Self {
        Self {
            tree: Value::Object(Map::new()),
            log: Vec::new(),
            shapes: HashMap::new(),
        }
    }

    pub fn tree(&self) -> &Value {
        &self.tree
    }

    pub fn log(&self) -> &[UpdateLogEntry] {
        &self.log
    }

    /// Merge one fragment into the tree.
    pub fn apply(&mut self, fragment: Fragment) -> Result<(), StrataError> {
        tracing::trace!(path = %fragment.path, source = %fragment.source, "applying fragment");
        let Fragment {
            path,
            value,
            source,
        } = fragment;

        let Some((last, parents)) = path.segments().split_last() else {
            if !value.is_object() {
                return Err(StrataError::PathConflict {
                    path: KeyPath::root(),
                    reason: format!(
                        "the document root must be a mapping, found {}",
                        format::kind_name(&value)
                    ),
                });
            }
            merge_into(&mut self.tree, value, &path, &source, &mut self.log);
            return Ok(());
        };

        let origin = Origin::of(&source);
        let mut shape = Shape {
            origin: origin.as_ref(),
            shapes: &mut self.shapes,
            source: &source,
            log: &mut self.log,
        };
        let mut node = &mut self.tree;
        let mut at = KeyPath::root();
        for segment in parents {
            node = step(node, segment, &at, &mut shape)?;
            at = at.child(segment.clone());
        }

        shape.reshape(node, last, &at)?;
        if !value.is_object() {
            self.shapes.retain(|p, _| !p.starts_with(&path));
        }
        match (node, last) {
            (Value::Object(map), Segment::Key(key)) => match map.entry(key.clone()) {
                Entry::Occupied(mut slot) => merge_into(slot.get_mut(), value, &path, &source, &mut self.log),
                Entry::Vacant(slot) => {
                    log_leaves(&path, &value, &source, &mut self.log);
                    slot.insert(value);
                }
            },
            (Value::Array(items), Segment::Index(index)) => {
                let index = *index;
                if index < items.len() {
                    merge_into(&mut items[index], value, &path, &source, &mut self.log);
                } else if index == items.len() {
                    log_leaves(&path, &value, &source, &mut self.log);
                    items.push(value);
                } else {
                    return Err(gap(&at, index, items.len()));
                }
            }
            (node, segment) => return Err(mismatch(node, segment, &at)),
        }
        Ok(())
    }

    /// Log an indirection key that was consumed instead of merged.
    pub fn record_removal(&mut self, fragment: &Fragment) {
        self.log
            .push(UpdateLogEntry::new(fragment.path.clone(), UpdateAction::Remove, &fragment.source));
    }

    pub fn finish(self) -> (Value, Vec<UpdateLogEntry>) {
        (self.tree, self.log)
    }
}

/// Merge `overlay` onto `base` with the same rules the engine uses for a
/// single location.
pub fn deep_merge(mut base: Value, overlay: Value) -> Value {
    let mut discarded = Vec::new();
    merge_into(&mut base, overlay, &KeyPath::root(), &Source::Update, &mut discarded);
    base
}

/// Bookkeeping for one fragment while it walks down the tree.
struct Shape<'a> {
    origin: Option<&'a Origin>,
    shapes: &'a mut HashMap<KeyPath, Origin>,
    source: &'a Source,
    log: &'a mut Vec<UpdateLogEntry>,
}

impl Shape<'_> {
    /// Make `node` (found at `at`) the kind of container `segment` needs.
    fn reshape(&mut self, node: &mut Value, segment: &Segment, at: &KeyPath) -> Result<(), StrataError> {
        let fits = match segment {
            Segment::Key(_) => node.is_object(),
            Segment::Index(_) => node.is_array(),
        };
        if !fits {
            if node.is_object() || node.is_array() {
                let same_source = self.origin.is_some() && self.shapes.get(at) == self.origin;
                if at.is_root() || same_source {
                    return Err(mismatch(node, segment, at));
                }
                self.log
                    .push(UpdateLogEntry::new(at.clone(), UpdateAction::Replace, self.source));
                self.shapes.retain(|p, _| !p.starts_with(at));
            }
            *node = match segment {
                Segment::Key(_) => Value::Object(Map::new()),
                Segment::Index(_) => Value::Array(Vec::new()),
            };
        }
        if let Some(origin) = self.origin {
            self.shapes.insert(at.clone(), origin.clone());
        }
        Ok(())
    }
}

/// Move one level down, creating the child if it is missing.
fn step<'t>(
    node: &'t mut Value,
    segment: &Segment,
    at: &KeyPath,
    shape: &mut Shape<'_>,
) -> Result<&'t mut Value, StrataError> {
    shape.reshape(node, segment, at)?;
    match (node, segment) {
        (Value::Object(map), Segment::Key(key)) => Ok(map.entry(key.clone()).or_insert(Value::Null)),
        (Value::Array(items), Segment::Index(index)) => {
            let index = *index;
            if index == items.len() {
                items.push(Value::Null);
            }
            let len = items.len();
            items.get_mut(index).ok_or_else(|| gap(at, index, len))
        }
        (node, segment) => Err(mismatch(node, segment, at)),
    }
}

fn merge_into(existing: &mut Value, incoming: Value, path: &KeyPath, source: &Source, log: &mut Vec<UpdateLogEntry>) {
    match (existing, incoming) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                let child = path.child(key.as_str());
                match base.entry(key) {
                    Entry::Occupied(mut slot) => merge_into(slot.get_mut(), value, &child, source, log),
                    Entry::Vacant(slot) => {
                        log_leaves(&child, &value, source, log);
                        slot.insert(value);
                    }
                }
            }
        }
        (Value::Array(base), Value::Array(overlay)) => {
            for (index, value) in overlay.into_iter().enumerate() {
                let child = path.child(index);
                match base.get_mut(index) {
                    Some(slot) => merge_into(slot, value, &child, source, log),
                    None => {
                        log_leaves(&child, &value, source, log);
                        base.push(value);
                    }
                }
            }
        }
        (slot, incoming) => {
            log.push(UpdateLogEntry::new(path.clone(), UpdateAction::Replace, source));
            *slot = incoming;
        }
    }
}

fn log_leaves(path: &KeyPath, value: &Value, source: &Source, log: &mut Vec<UpdateLogEntry>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                log_leaves(&path.child(key.as_str()), child, source, log);
            }
        }
        _ => log.push(UpdateLogEntry::new(path.clone(), UpdateAction::Set, source)),
    }
}

fn gap(at: &KeyPath, index: usize, len: usize) -> StrataError {
    StrataError::PathConflict {
        path: at.child(index),
        reason: format!("index {index} leaves a gap in a sequence of length {len}"),
    }
}

fn mismatch(node: &Value, segment: &Segment, at: &KeyPath) -> StrataError {
    let reason = match segment {
        Segment::Key(key) => format!("key '{key}' addresses {}", format::kind_name(node)),
        Segment::Index(index) => format!("index {index} addresses {}", format::kind_name(node)),
    };
    StrataError::PathConflict {
        path: at.child(segment.clone()),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frag(spec: &str, value: Value) -> Fragment {
        Fragment::new(KeyPath::from_spec(spec), value, Source::Update)
    }

    fn root(value: Value) -> Fragment {
        Fragment::new(KeyPath::root(), value, Source::Update)
    }

    fn merged(fragments: Vec<Fragment>) -> Result<Value, StrataError> {
        let mut engine = MergeEngine::new();
        for fragment in fragments {
            engine.apply(fragment)?;
        }
        Ok(engine.finish().0)
    }

    fn actions(engine: &MergeEngine) -> Vec<(String, UpdateAction)> {
        engine
            .log()
            .iter()
            .map(|e| (e.path.to_string(), e.action))
            .collect()
    }

    #[test]
    fn mapping_keys_accumulate() {
        let tree = merged(vec![root(json!({"a": {"x": 1}})), root(json!({"a": {"y": 2}}))]).unwrap();
        assert_eq!(tree, json!({"a": {"x": 1, "y": 2}}));
    }

    #[test]
    fn scalar_last_write_wins() {
        let tree = merged(vec![root(json!({"a": 1})), root(json!({"a": 2}))]).unwrap();
        assert_eq!(tree, json!({"a": 2}));
    }

    #[test]
    fn later_value_wins_regardless_of_type() {
        let tree = merged(vec![frag("a", json!({"x": 1})), frag("a", json!("flat"))]).unwrap();
        assert_eq!(tree, json!({"a": "flat"}));

        let tree = merged(vec![frag("a", json!("flat")), frag("a", json!({"x": 1}))]).unwrap();
        assert_eq!(tree, json!({"a": {"x": 1}}));
    }

    #[test]
    fn sequence_index_override() {
        let tree = merged(vec![frag("a", json!(["x", "y"])), frag("a.1", json!("z"))]).unwrap();
        assert_eq!(tree, json!({"a": ["x", "z"]}));

        let tree = merged(vec![
            frag("a.0", json!("x")),
            frag("a.1", json!("y")),
            frag("a.1", json!("z")),
        ])
        .unwrap();
        assert_eq!(tree, json!({"a": ["x", "z"]}));
    }

    #[test]
    fn sequence_gap_is_a_conflict() {
        let err = merged(vec![frag("a", json!(["x", "y"])), frag("a.5", json!("w"))]).unwrap_err();
        match err {
            StrataError::PathConflict { path, .. } => assert_eq!(path.to_string(), "a.5"),
            other => panic!("expected PathConflict, got {other:?}"),
        }
    }

    #[test]
    fn append_at_length() {
        let tree = merged(vec![frag("a", json!(["x"])), frag("a.1", json!("y"))]).unwrap();
        assert_eq!(tree, json!({"a": ["x", "y"]}));
    }

    #[test]
    fn whole_sequences_merge_by_index() {
        let tree = merged(vec![frag("a", json!([1, 2, 3])), frag("a", json!([9]))]).unwrap();
        assert_eq!(tree, json!({"a": [9, 2, 3]}));

        let tree = merged(vec![frag("a", json!([{"k": 1}])), frag("a", json!([{"j": 2}, 5]))]).unwrap();
        assert_eq!(tree, json!({"a": [{"k": 1, "j": 2}, 5]}));
    }

    #[test]
    fn intermediates_follow_segment_kind() {
        let tree = merged(vec![
            frag("servers.0.host", json!("a")),
            frag("servers.0.port", json!(1)),
            frag("servers.1.host", json!("b")),
        ])
        .unwrap();
        assert_eq!(
            tree,
            json!({"servers": [{"host": "a", "port": 1}, {"host": "b"}]})
        );
    }

    #[test]
    fn intermediate_scalar_becomes_container() {
        let tree = merged(vec![frag("a", json!(1)), frag("a.b", json!(2))]).unwrap();
        assert_eq!(tree, json!({"a": {"b": 2}}));
    }

    fn env(spec: &str, var: &str, value: Value) -> Fragment {
        Fragment::new(KeyPath::from_spec(spec), value, Source::env(var))
    }

    fn file(spec: &str, name: &str, value: Value) -> Fragment {
        Fragment::new(KeyPath::from_spec(spec), value, Source::file(name))
    }

    #[test]
    fn mixed_segments_within_one_source_conflict() {
        let err = merged(vec![
            env("a.0", "APP__A__0", json!("x")),
            env("a.key", "APP__A__KEY", json!("y")),
        ])
        .unwrap_err();
        match err {
            StrataError::PathConflict { path, .. } => assert_eq!(path.to_string(), "a.key"),
            other => panic!("expected PathConflict, got {other:?}"),
        }

        let err = merged(vec![
            file("a.b", "/s.json", json!(1)),
            file("a.0", "/s.json", json!(2)),
        ])
        .unwrap_err();
        assert!(matches!(err, StrataError::PathConflict { .. }));
    }

    #[test]
    fn later_source_reshapes_containers() {
        let tree = merged(vec![
            file("a", "/first.json", json!([1, 2])),
            file("a.x", "/second.json", json!(1)),
        ])
        .unwrap();
        assert_eq!(tree, json!({"a": {"x": 1}}));

        let tree = merged(vec![
            file("a.x", "/first.json", json!(1)),
            env("a.0", "APP__A__0", json!("v")),
        ])
        .unwrap();
        assert_eq!(tree, json!({"a": ["v"]}));
    }

    #[test]
    fn updates_reshape_their_own_containers() {
        let tree = merged(vec![frag("a", json!([1])), frag("a.b", json!(2))]).unwrap();
        assert_eq!(tree, json!({"a": {"b": 2}}));

        let tree = merged(vec![frag("a.b", json!(1)), frag("a.0", json!(2))]).unwrap();
        assert_eq!(tree, json!({"a": [2]}));
    }

    #[test]
    fn reshape_is_logged_as_replace() {
        let mut engine = MergeEngine::new();
        engine.apply(file("a", "/first.json", json!([1]))).unwrap();
        engine.apply(file("a.x", "/second.json", json!(1))).unwrap();
        assert_eq!(
            actions(&engine),
            [
                ("a".to_string(), UpdateAction::Set),
                ("a".to_string(), UpdateAction::Replace),
                ("a.x".to_string(), UpdateAction::Set),
            ]
        );
    }

    #[test]
    fn index_at_root_is_a_conflict() {
        let err = merged(vec![frag("0", json!(1))]).unwrap_err();
        assert!(matches!(err, StrataError::PathConflict { .. }));
    }

    #[test]
    fn non_mapping_root_is_a_conflict() {
        let err = merged(vec![root(json!([1, 2]))]).unwrap_err();
        assert!(matches!(err, StrataError::PathConflict { .. }));
    }

    #[test]
    fn keys_keep_first_insertion_order() {
        let tree = merged(vec![frag("zeta", json!(1)), frag("alpha", json!(2)), frag("zeta", json!(3))]).unwrap();
        let keys: Vec<&String> = tree.as_object().unwrap().keys().collect();
        assert_eq!(keys, ["zeta", "alpha"]);
    }

    #[test]
    fn log_records_set_replace_and_remove() {
        let mut engine = MergeEngine::new();
        engine.apply(root(json!({"a": {"x": 1, "y": {"z": 2}}}))).unwrap();
        engine.apply(frag("a.x", json!(5))).unwrap();
        engine.record_removal(&frag("b_from_env", json!("B")));
        assert_eq!(
            actions(&engine),
            [
                ("a.x".to_string(), UpdateAction::Set),
                ("a.y.z".to_string(), UpdateAction::Set),
                ("a.x".to_string(), UpdateAction::Replace),
                ("b_from_env".to_string(), UpdateAction::Remove),
            ]
        );
    }

    #[test]
    fn log_entry_display() {
        let entry = UpdateLogEntry::new(
            KeyPath::from_spec("db.host"),
            UpdateAction::Set,
            &Source::env("APP__DB__HOST"),
        );
        assert_eq!(entry.to_string(), "loaded db.host from environment variable APP__DB__HOST");
    }

    #[test]
    fn deep_merge_values() {
        let merged = deep_merge(json!({"a": {"x": 1}, "b": 1}), json!({"a": {"y": 2}, "b": {"c": 3}}));
        assert_eq!(merged, json!({"a": {"x": 1, "y": 2}, "b": {"c": 3}}));
    }

    #[test]
    fn same_fragments_give_same_tree() {
        let fragments = vec![frag("a.b", json!(1)), frag("c", json!([1, 2])), frag("a.d", json!(true))];
        assert_eq!(merged(fragments.clone()).unwrap(), merged(fragments).unwrap());
    }
}
