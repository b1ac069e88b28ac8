//! Read-only access to a settings tree.
//!
//! A [`SettingsView`] holds its own [`Arc`] snapshot of the tree, so it keeps
//! showing the values from the update it was taken after even if the
//! [`Settings`](crate::Settings) it came from is updated later. Take a fresh
//! view to see new values.
//!
//! Navigation comes in two flavours:
//!
//! - **Checked**: [`get`](SettingsView::get), [`at`](SettingsView::at) and
//!   [`lookup`](SettingsView::lookup) return `None` for a missing location.
//! - **Indexing**: `view["a"]["b"][0]` goes through [`serde_json::Value`]'s
//!   own `Index` impls and yields `Value::Null` for anything missing.
//!
//! Views cannot be written to. [`set`](SettingsView::set) and
//! [`remove`](SettingsView::remove) exist only to fail with
//! [`ImmutableAccess`](StrataError::ImmutableAccess); changes go through
//! [`Settings::update`](crate::Settings::update).

use std::fmt;
use std::ops::Index;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::StrataError;
use crate::path::{self, KeyPath, Segment};

static NULL: Value = Value::Null;

#[derive(Debug, Clone)]
pub struct SettingsView {
    root: Arc<Value>,
    path: KeyPath,
}

impl SettingsView {
    pub(crate) fn new(root: Arc<Value>) -> Self {
        Self {
            root,
            path: KeyPath::root(),
        }
    }

    fn descend(&self, path: KeyPath) -> Option<SettingsView> {
        path::lookup(&self.root, &path)?;
        Some(SettingsView {
            root: Arc::clone(&self.root),
            path,
        })
    }

    /// Location of this view inside the tree.
    pub fn path(&self) -> &KeyPath {
        &self.path
    }

    /// The value at this location.
    pub fn value(&self) -> &Value {
        path::lookup(&self.root, &self.path).unwrap_or(&NULL)
    }

    /// Child view for a mapping key.
    pub fn get(&self, key: &str) -> Option<SettingsView> {
        self.descend(self.path.child(key))
    }

    /// Child view for a sequence position.
    pub fn at(&self, index: usize) -> Option<SettingsView> {
        self.descend(self.path.child(index))
    }

    /// Descendant view for a dotted path such as `servers.0.host`.
    pub fn lookup(&self, spec: &str) -> Option<SettingsView> {
        self.descend(self.path.join_path(&KeyPath::from_spec(spec)))
    }

    pub fn as_str(&self) -> Option<&str> {
        self.value().as_str()
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.value().as_i64()
    }

    pub fn as_u64(&self) -> Option<u64> {
        self.value().as_u64()
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.value().as_f64()
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.value().as_bool()
    }

    pub fn is_mapping(&self) -> bool {
        self.value().is_object()
    }

    pub fn is_sequence(&self) -> bool {
        self.value().is_array()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.value().as_object().is_some_and(|map| map.contains_key(key))
    }

    /// Number of entries in a mapping or sequence; 0 for scalars.
    pub fn len(&self) -> usize {
        match self.value() {
            Value::Object(map) => map.len(),
            Value::Array(items) => items.len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mapping keys in insertion order. Empty for anything but a mapping.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.value()
            .as_object()
            .into_iter()
            .flat_map(|map| map.keys().map(String::as_str))
    }

    /// A plain copy of the value at this location.
    pub fn to_value(&self) -> Value {
        self.value().clone()
    }

    /// Deserialize the value at this location into `T`.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, StrataError> {
        T::deserialize(self.value()).map_err(|e| StrataError::InvalidValue {
            key: self.path.to_string(),
            reason: e.to_string(),
        })
    }

    /// Always fails: views are read-only.
    pub fn set(&self, key: &str, _value: impl Into<Value>) -> Result<(), StrataError> {
        Err(StrataError::ImmutableAccess {
            path: self.path.child(Segment::parse(key)),
            operation: "set",
        })
    }

    /// Always fails: views are read-only.
    pub fn remove(&self, key: &str) -> Result<Value, StrataError> {
        Err(StrataError::ImmutableAccess {
            path: self.path.child(Segment::parse(key)),
            operation: "remove",
        })
    }
}

impl Index<&str> for SettingsView {
    type Output = Value;

    fn index(&self, key: &str) -> &Value {
        &self.value()[key]
    }
}

impl Index<usize> for SettingsView {
    type Output = Value;

    fn index(&self, index: usize) -> &Value {
        &self.value()[index]
    }
}

impl PartialEq<Value> for SettingsView {
    fn eq(&self, other: &Value) -> bool {
        self.value() == other
    }
}

impl fmt::Display for SettingsView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value() {
            Value::String(s) => f.write_str(s),
            other => write!(f, "{other}"),
        }
    }
}
