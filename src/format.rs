//! Structured formats: recognition and parsing into the settings value type.
//!
//! Every format parses into a [`serde_json::Value`]. TOML datetimes become
//! strings, YAML non-string keys are stringified, and non-finite floats
//! become `null` since JSON numbers cannot hold them.

use std::path::Path;

use serde_json::{Map, Number, Value};

use crate::error::FormatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Json,
    Yaml,
    Toml,
}

impl Format {
    pub const ALL: [Format; 3] = [Format::Json, Format::Yaml, Format::Toml];

    pub fn name(self) -> &'static str {
        match self {
            Format::Json => "json",
            Format::Yaml => "yaml",
            Format::Toml => "toml",
        }
    }

    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            Format::Json => &["json"],
            Format::Yaml => &["yaml", "yml"],
            Format::Toml => &["toml"],
        }
    }

    /// Recognize a format from a file extension (case-insensitive).
    pub fn from_path(path: &Path) -> Option<Format> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        Format::ALL
            .into_iter()
            .find(|format| format.extensions().contains(&ext.as_str()))
    }

    /// Guess the format of inline content from its first characters.
    ///
    /// Only unambiguous openers are recognized: `{` for JSON and `---` for
    /// YAML. A leading `[` could be a TOML table or a glob, so TOML content
    /// is only recognized when it spans several lines.
    pub fn sniff(content: &str) -> Option<Format> {
        let trimmed = content.trim_start();
        if trimmed.starts_with('{') {
            Some(Format::Json)
        } else if trimmed.starts_with("---") {
            Some(Format::Yaml)
        } else if trimmed.starts_with('[') && trimmed.trim_end().contains('\n') {
            Some(Format::Toml)
        } else {
            None
        }
    }

    pub fn parse(self, content: &str) -> Result<Value, FormatError> {
        match self {
            Format::Json => Ok(serde_json::from_str(content)?),
            Format::Yaml => {
                let value: serde_yaml::Value = serde_yaml::from_str(content)?;
                Ok(yaml_to_json(value))
            }
            Format::Toml => {
                let table: toml::Table = content.parse()?;
                Ok(toml_to_json(toml::Value::Table(table)))
            }
        }
    }
}

/// Require a mapping at the document root. An empty document counts as an
/// empty mapping.
pub fn require_mapping(value: Value) -> Result<Map<String, Value>, FormatError> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(FormatError::NotAMapping(kind_name(&other))),
    }
}

pub(crate) fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a mapping",
    }
}

fn float(f: f64) -> Value {
    Number::from_f64(f).map_or(Value::Null, Value::Number)
}

fn toml_to_json(value: toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::from(i),
        toml::Value::Float(f) => float(f),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(items) => Value::Array(items.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(key, value)| (key, toml_to_json(value)))
                .collect(),
        ),
    }
}

fn yaml_to_json(value: serde_yaml::Value) -> Value {
    match value {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(b) => Value::Bool(b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                n.as_f64().map_or(Value::Null, float)
            }
        }
        serde_yaml::Value::String(s) => Value::String(s),
        serde_yaml::Value::Sequence(items) => {
            Value::Array(items.into_iter().map(yaml_to_json).collect())
        }
        serde_yaml::Value::Mapping(mapping) => Value::Object(
            mapping
                .into_iter()
                .map(|(key, value)| (yaml_key(key), yaml_to_json(value)))
                .collect(),
        ),
        serde_yaml::Value::Tagged(tagged) => yaml_to_json(tagged.value),
    }
}

fn yaml_key(key: serde_yaml::Value) -> String {
    match key {
        serde_yaml::Value::String(s) => s,
        other => match yaml_to_json(other) {
            Value::String(s) => s,
            Value::Null => "null".to_string(),
            rendered => rendered.to_string(),
        },
    }
}
