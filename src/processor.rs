//! Indirection processing: expand `_from_*` keys into the values they point at.
//!
//! A key ending in one of the reserved suffixes does not hold a setting, it
//! holds a reference to one:
//!
//! | Suffix | Value | Replaced by |
//! |--------|-------|-------------|
//! | `_from_file` | path, glob, or list of them | file content (parsed if structured) |
//! | `_from_env` | variable name, or text with `$NAME` references | that variable's value, or the expanded text |
//! | `_from_json_content` | JSON text | parsed content |
//! | `_from_yaml_content` | YAML text | parsed content |
//! | `_from_toml_content` | TOML text | parsed content |
//!
//! The suffix is stripped from the key to get the target location
//! (`password_from_env` targets `password`). A key that is only the suffix
//! targets its parent mapping, which for a top-level key is the document root.
//!
//! [`Resolver::expand`] performs one step and has no side effects beyond
//! reading files. [`Resolver::resolve`] applies it on a worklist until no
//! indirection is left, so a file included through `_from_file` may itself
//! contain `_from_file` keys. Following a file that is already on the
//! fragment's provenance chain is an [`InclusionCycle`](StrataError::InclusionCycle).

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::env::{self, EnvVars};
use crate::error::{FormatError, Missing, StrataError};
use crate::file;
use crate::format::{self, Format};
use crate::fragment::{Fragment, Source};
use crate::path::{KeyPath, Segment};

/// The kind of reference a suffixed key holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Indirection {
    File,
    Env,
    Content(Format),
}

impl Indirection {
    pub const ALL: [Indirection; 5] = [
        Indirection::File,
        Indirection::Env,
        Indirection::Content(Format::Json),
        Indirection::Content(Format::Yaml),
        Indirection::Content(Format::Toml),
    ];

    pub fn suffix(self) -> &'static str {
        match self {
            Indirection::File => "_from_file",
            Indirection::Env => "_from_env",
            Indirection::Content(Format::Json) => "_from_json_content",
            Indirection::Content(Format::Yaml) => "_from_yaml_content",
            Indirection::Content(Format::Toml) => "_from_toml_content",
        }
    }

    /// Match a key against the reserved suffixes (case-insensitive).
    /// Returns the kind and the key with the suffix stripped.
    pub fn detect(key: &str) -> Option<(Indirection, &str)> {
        Indirection::ALL.into_iter().find_map(|kind| {
            let split = key.len().checked_sub(kind.suffix().len())?;
            let tail = key.get(split..)?;
            if tail.eq_ignore_ascii_case(kind.suffix()) {
                Some((kind, key.get(..split)?))
            } else {
                None
            }
        })
    }
}

/// The location an indirection key writes to, if `path` ends in one.
pub fn indirection_target(path: &KeyPath) -> Option<(Indirection, KeyPath)> {
    let Some(Segment::Key(key)) = path.last() else {
        return None;
    };
    let (kind, stripped) = Indirection::detect(key)?;
    let parent = path.parent()?;
    let target = if stripped.is_empty() {
        parent
    } else {
        parent.child(stripped)
    };
    Some((kind, target))
}

/// Result of one expansion step.
#[derive(Debug)]
pub enum Expansion {
    /// Nothing left to expand; ready to merge.
    Done(Fragment),
    /// An indirection was followed. `consumed` is the reference itself.
    Replaced {
        consumed: Fragment,
        children: Vec<Fragment>,
    },
    /// The value was broken into smaller fragments that need another look.
    Split(Vec<Fragment>),
}

/// A fully processed fragment, in application order.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    Apply(Fragment),
    Consumed(Fragment),
}

/// Expands indirections against one environment snapshot.
pub struct Resolver<'e> {
    env: &'e EnvVars,
    parse_env_values: bool,
}

impl<'e> Resolver<'e> {
    pub fn new(env: &'e EnvVars) -> Self {
        Self {
            env,
            parse_env_values: false,
        }
    }

    /// Parse values read through `_from_env` as JSON when possible.
    pub fn parse_env_values(mut self, parse: bool) -> Self {
        self.parse_env_values = parse;
        self
    }

    /// One expansion step.
    pub fn expand(&self, fragment: Fragment) -> Result<Expansion, StrataError> {
        if let Some((kind, target)) = indirection_target(&fragment.path) {
            let children = match kind {
                Indirection::File => self.include_files(&fragment, &target)?,
                Indirection::Env => vec![self.read_env(&fragment, &target)?],
                Indirection::Content(format) => parse_content(&fragment, &target, format)?,
            };
            return Ok(Expansion::Replaced {
                consumed: fragment,
                children,
            });
        }

        match split_nested(&fragment) {
            Some(parts) => Ok(Expansion::Split(parts)),
            None => Ok(Expansion::Done(fragment)),
        }
    }

    /// Expand `fragment` until no indirection is left. Order is depth-first:
    /// everything produced by a reference lands where the reference was.
    pub fn resolve(&self, fragment: Fragment) -> Result<Vec<Resolved>, StrataError> {
        let mut out = Vec::new();
        let mut work = vec![fragment];

        while let Some(next) = work.pop() {
            match self.expand(next)? {
                Expansion::Done(fragment) => out.push(Resolved::Apply(fragment)),
                Expansion::Replaced { consumed, children } => {
                    tracing::trace!(path = %consumed.path, children = children.len(), "expanded indirection");
                    out.push(Resolved::Consumed(consumed));
                    work.extend(children.into_iter().rev());
                }
                Expansion::Split(parts) => work.extend(parts.into_iter().rev()),
            }
        }

        Ok(out)
    }

    /// [`resolve`](Self::resolve) every fragment, keeping input order.
    pub fn resolve_all(
        &self,
        fragments: impl IntoIterator<Item = Fragment>,
    ) -> Result<Vec<Resolved>, StrataError> {
        let mut out = Vec::new();
        for fragment in fragments {
            out.extend(self.resolve(fragment)?);
        }
        Ok(out)
    }

    fn include_files(&self, fragment: &Fragment, target: &KeyPath) -> Result<Vec<Fragment>, StrataError> {
        let entries: Vec<&str> = match &fragment.value {
            Value::String(entry) => vec![entry.as_str()],
            Value::Array(items) => items
                .iter()
                .map(|item| item.as_str().ok_or_else(|| invalid(fragment, "a file path", item)))
                .collect::<Result<_, _>>()?,
            other => return Err(invalid(fragment, "a file path", other)),
        };

        let mut children = Vec::new();
        for entry in entries {
            let paths = if file::has_glob_magic(entry) {
                file::expand_glob(entry)?
            } else {
                vec![PathBuf::from(entry)]
            };
            for path in paths {
                check_cycle(&fragment.source, &path)?;
                let source = fragment.source.via(Source::file(&path));
                children.extend(file::load_file(&path, target, source)?);
            }
        }
        Ok(children)
    }

    fn read_env(&self, fragment: &Fragment, target: &KeyPath) -> Result<Fragment, StrataError> {
        let name = fragment
            .value
            .as_str()
            .ok_or_else(|| invalid(fragment, "an environment variable name", &fragment.value))?;
        let raw = if name.contains('$') {
            env::expand_vars(name, self.env)
        } else {
            self.env
                .get(name)
                .ok_or_else(|| {
                    StrataError::MissingSource(Missing::EnvVar {
                        name: name.to_string(),
                        referenced_by: fragment.path.clone(),
                    })
                })?
                .clone()
        };
        Ok(Fragment::new(
            target.clone(),
            env::env_value(&raw, self.parse_env_values),
            fragment.source.via(Source::env(name)),
        ))
    }
}

fn parse_content(fragment: &Fragment, target: &KeyPath, format: Format) -> Result<Vec<Fragment>, StrataError> {
    let content = fragment
        .value
        .as_str()
        .ok_or_else(|| invalid(fragment, "serialized content", &fragment.value))?;
    let malformed = |e: FormatError| StrataError::MalformedContent {
        origin: format!("{} content at '{}'", format.name(), fragment.path),
        source: e,
    };
    let value = format.parse(content).map_err(malformed)?;
    let source = fragment.source.via(Source::Content { format });
    file::content_fragments(value, target, source).map_err(malformed)
}

fn invalid(fragment: &Fragment, expected: &str, found: &Value) -> StrataError {
    StrataError::InvalidValue {
        key: fragment.path.to_string(),
        reason: format!("expected {expected}, found {}", format::kind_name(found)),
    }
}

fn check_cycle(source: &Source, path: &Path) -> Result<(), StrataError> {
    let target = canonical(path);
    if source.files().into_iter().any(|seen| canonical(seen) == target) {
        return Err(StrataError::InclusionCycle {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Break up values that still hide indirections or need per-key merging.
///
/// A non-empty mapping becomes one fragment per leaf. A sequence whose
/// elements contain indirection keys becomes the sequence with those keys
/// removed, followed by index-addressed fragments for each removed key.
fn split_nested(fragment: &Fragment) -> Option<Vec<Fragment>> {
    match &fragment.value {
        Value::Object(map) if !map.is_empty() => Some(fragment.clone().into_leaves()),
        Value::Array(items) => {
            let mut hoisted = Vec::new();
            let stripped: Vec<Value> = items
                .iter()
                .enumerate()
                .map(|(i, item)| strip_indirections(fragment.path.child(i), item, &fragment.source, &mut hoisted))
                .collect();
            if hoisted.is_empty() {
                return None;
            }
            let mut parts = vec![Fragment::new(
                fragment.path.clone(),
                Value::Array(stripped),
                fragment.source.clone(),
            )];
            parts.extend(hoisted);
            Some(parts)
        }
        _ => None,
    }
}

fn strip_indirections(path: KeyPath, value: &Value, source: &Source, hoisted: &mut Vec<Fragment>) -> Value {
    match value {
        Value::Object(map) => {
            let mut kept = Map::new();
            for (key, child) in map {
                let child_path = path.child(key.as_str());
                if Indirection::detect(key).is_some() {
                    hoisted.push(Fragment::new(child_path, child.clone(), source.clone()));
                } else {
                    kept.insert(key.clone(), strip_indirections(child_path, child, source, hoisted));
                }
            }
            Value::Object(kept)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| strip_indirections(path.child(i), item, source, hoisted))
                .collect(),
        ),
        other => other.clone(),
    }
}
