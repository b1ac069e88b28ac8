//! Settings file reading, glob expansion, and settings file inference.
//!
//! # Reading
//!
//! [`load_file`] turns one file into fragments rooted at a given path:
//!
//! - `.json`, `.yaml`/`.yml` and `.toml` files are parsed and decomposed into
//!   leaf fragments. At the document root the content must be a mapping.
//! - Any other extension is opaque text: the trimmed content becomes a single
//!   string value. This only makes sense below the root (`key_from_file`).
//!
//! # Registered entries
//!
//! [`load_entry`] handles one registered entry, which may be a glob. Glob
//! matches are loaded in sorted path order, and a glob that matches nothing
//! is not an error. An explicit path that does not exist fails with
//! [`Missing::File`] unless missing files are skipped.
//!
//! # Inference
//!
//! [`infer_settings_files`] walks from a start directory up to the project
//! root and collects files named like `*{prefix}*settings*.{ext}`, plus every
//! structured file inside `*{prefix}*settings*` directories. Directories are
//! visited **shallowest first** so that files closer to the start directory
//! take precedence.

use std::path::{Path, PathBuf};

use crate::error::{FormatError, Missing, StrataError};
use crate::format::{self, Format};
use crate::fragment::{Fragment, Source};
use crate::path::KeyPath;

/// Files or directories whose presence marks a project root.
pub const PROJECT_ROOT_MARKERS: &[&str] = &[".git", ".hg", "Cargo.toml", "pyproject.toml", "setup.py"];

/// True if `entry` contains glob metacharacters.
pub fn has_glob_magic(entry: &str) -> bool {
    entry.contains(['*', '?', '['])
}

/// Expand a glob into matching files, sorted by path.
pub fn expand_glob(pattern: &str) -> Result<Vec<PathBuf>, StrataError> {
    let paths = glob::glob(pattern).map_err(|e| StrataError::InvalidPattern {
        pattern: pattern.to_string(),
        source: e,
    })?;
    let mut files = Vec::new();
    for entry in paths {
        let path = entry.map_err(|e| StrataError::IoError {
            path: e.path().to_path_buf(),
            source: e.into_error(),
        })?;
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Load one registered settings entry (a path or a glob) at the document root.
pub fn load_entry(entry: &Path, skip_missing: bool) -> Result<Vec<Fragment>, StrataError> {
    if let Some(pattern) = entry.to_str()
        && has_glob_magic(pattern)
    {
        let mut fragments = Vec::new();
        for path in expand_glob(pattern)? {
            fragments.extend(load_file(&path, &KeyPath::root(), Source::file(&path))?);
        }
        return Ok(fragments);
    }

    if skip_missing && !entry.exists() {
        tracing::debug!(path = %entry.display(), "skipping missing settings file");
        return Ok(Vec::new());
    }
    load_file(entry, &KeyPath::root(), Source::file(entry))
}

/// Read `path` and turn its content into fragments rooted at `root`.
pub fn load_file(path: &Path, root: &KeyPath, source: Source) -> Result<Vec<Fragment>, StrataError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StrataError::MissingSource(Missing::File(path.to_path_buf())));
        }
        Err(e) => {
            return Err(StrataError::IoError {
                path: path.to_path_buf(),
                source: e,
            });
        }
    };
    tracing::debug!(path = %path.display(), root = %root, "loaded settings file");

    let malformed = |e: FormatError| StrataError::MalformedContent {
        origin: format!("file {}", path.display()),
        source: e,
    };

    match Format::from_path(path) {
        Some(fmt) => {
            let value = fmt.parse(&content).map_err(malformed)?;
            content_fragments(value, root, source).map_err(malformed)
        }
        None if root.is_root() => Err(malformed(FormatError::UnsupportedFormat)),
        None => Ok(vec![Fragment::new(
            root.clone(),
            serde_json::Value::String(content.trim().to_string()),
            source,
        )]),
    }
}

/// Decompose parsed content rooted at `root` into leaf fragments. Content
/// placed at the document root must be a mapping.
pub fn content_fragments(
    value: serde_json::Value,
    root: &KeyPath,
    source: Source,
) -> Result<Vec<Fragment>, FormatError> {
    let value = if root.is_root() {
        serde_json::Value::Object(format::require_mapping(value)?)
    } else {
        value
    };
    Ok(Fragment::new(root.clone(), value, source).into_leaves())
}

/// Walk from `start` up to the project root (inclusive), shallowest first.
///
/// The walk stops at the first directory containing one of
/// [`PROJECT_ROOT_MARKERS`], or at the filesystem root.
pub fn project_directories(start: &Path) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    let mut current = start;

    loop {
        dirs.push(current.to_path_buf());

        if PROJECT_ROOT_MARKERS
            .iter()
            .any(|marker| current.join(marker).exists())
        {
            break;
        }

        match current.parent() {
            Some(parent) if parent != current => current = parent,
            _ => break,
        }
    }

    dirs.reverse();
    dirs
}

/// Infer settings files for `prefix`, starting the walk at `start`.
pub fn infer_settings_files(start: &Path, prefix: &str) -> Result<Vec<PathBuf>, StrataError> {
    let prefix = prefix.trim_matches('_').to_lowercase();
    let base = if prefix.is_empty() {
        "*settings".to_string()
    } else {
        format!("*{prefix}*settings")
    };

    let mut files = Vec::new();
    for dir in project_directories(start) {
        let Some(dir_str) = dir.to_str() else {
            continue;
        };
        let dir_pattern = glob::Pattern::escape(dir_str);

        files.extend(structured_files(&format!("{dir_pattern}/{base}*"))?);

        for sub_dir in expand_dirs(&format!("{dir_pattern}/{base}"))? {
            let Some(sub_str) = sub_dir.to_str() else {
                continue;
            };
            let sub_pattern = glob::Pattern::escape(sub_str);
            files.extend(structured_files(&format!("{sub_pattern}/**/*"))?);
        }
    }
    Ok(files)
}

/// Files matching `pattern` that carry a structured extension, sorted.
fn structured_files(pattern: &str) -> Result<Vec<PathBuf>, StrataError> {
    Ok(expand_glob(pattern)?
        .into_iter()
        .filter(|path| Format::from_path(path).is_some())
        .collect())
}

fn expand_dirs(pattern: &str) -> Result<Vec<PathBuf>, StrataError> {
    let paths = glob::glob(pattern).map_err(|e| StrataError::InvalidPattern {
        pattern: pattern.to_string(),
        source: e,
    })?;
    let mut dirs: Vec<PathBuf> = paths.filter_map(Result::ok).filter(|p| p.is_dir()).collect();
    dirs.sort();
    Ok(dirs)
}
