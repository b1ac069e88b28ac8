use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::path::KeyPath;

#[derive(Debug, Error)]
pub enum StrataError {
    #[error("Missing source: {0}")]
    MissingSource(Missing),

    #[error("Malformed content in {origin}: {source}")]
    MalformedContent { origin: String, source: FormatError },

    #[error("Path conflict at '{path}': {reason}")]
    PathConflict { path: KeyPath, reason: String },

    #[error("Settings are read-only: {operation} at '{path}' is not supported, use update() instead")]
    ImmutableAccess {
        path: KeyPath,
        operation: &'static str,
    },

    #[error("Settings file {path} includes itself")]
    InclusionCycle { path: PathBuf },

    #[error("Invalid value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Invalid glob pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        source: glob::PatternError,
    },

    #[error("Failed to read {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    ConfigError(#[from] confique::Error),
}

/// What could not be found when a source was required.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Missing {
    /// An explicitly named settings file.
    File(PathBuf),
    /// An environment variable named by a `_from_env` key.
    EnvVar { name: String, referenced_by: KeyPath },
}

impl fmt::Display for Missing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Missing::File(path) => write!(f, "settings file {} does not exist", path.display()),
            Missing::EnvVar {
                name,
                referenced_by,
            } => write!(
                f,
                "environment variable '{name}' (referenced by '{referenced_by}') is not set"
            ),
        }
    }
}

/// Why a piece of structured content could not be turned into settings.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error("expected a mapping at the document root, found {0}")]
    NotAMapping(&'static str),

    #[error("unsupported settings file format (expected .json, .yaml, .yml or .toml)")]
    UnsupportedFormat,
}

impl StrataError {
    /// True for errors that abort an update because a source is absent.
    pub fn is_missing_source(&self) -> bool {
        matches!(self, StrataError::MissingSource(_))
    }
}
