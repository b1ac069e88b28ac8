use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;

use crate::env::{EnvOptions, EnvVars, Environment};
use crate::error::StrataError;
use crate::settings::{Inference, Settings, TreeParser};

/// Builder for [`Settings`].
///
/// Three groups of options:
///
/// - **Environment**: [`app_name()`](Self::app_name) or
///   [`env_prefix()`](Self::env_prefix) choose which variables are read;
///   [`delimiter()`](Self::delimiter) and
///   [`parse_env_values()`](Self::parse_env_values) control how they map.
/// - **Files**: [`settings_file()`](Self::settings_file) registers files or
///   globs, loaded in registration order.
/// - **Inference**: [`infer_settings_files()`](Self::infer_settings_files)
///   additionally discovers `*{app}*settings*` files between the working
///   directory and the project root.
///
/// [`parser()`](Self::parser) post-processes the merged tree on every update.
#[derive(Clone)]
pub struct SettingsBuilder {
    app_name: Option<String>,
    env_prefix: Option<String>,
    env_enabled: bool,
    delimiter: String,
    settings_file_suffix: String,
    exclude_env_vars: Vec<String>,
    parse_env_values: bool,
    settings_files: Vec<PathBuf>,
    skip_missing_files: bool,
    infer: bool,
    infer_from: Option<PathBuf>,
    environment: Environment,
    parser: Option<TreeParser>,
}

impl fmt::Debug for SettingsBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingsBuilder")
            .field("app_name", &self.app_name)
            .field("env_prefix", &self.env_prefix)
            .field("env_enabled", &self.env_enabled)
            .field("settings_files", &self.settings_files)
            .field("infer", &self.infer)
            .field("parser", &self.parser.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for SettingsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsBuilder {
    pub fn new() -> Self {
        Self {
            app_name: None,
            env_prefix: None,
            env_enabled: true,
            delimiter: "__".to_string(),
            settings_file_suffix: "SETTINGS_FILE".to_string(),
            exclude_env_vars: Vec::new(),
            parse_env_values: false,
            settings_files: Vec::new(),
            skip_missing_files: false,
            infer: false,
            infer_from: None,
            environment: Environment::Process,
            parser: None,
        }
    }

    /// Set the application name. This derives:
    /// - `env_prefix` → `"{APP_NAME}"` (uppercased, `-` becomes `_`)
    /// - the inference pattern `*{app_name}*settings*`
    pub fn app_name(mut self, name: &str) -> Self {
        self.app_name = Some(name.to_string());
        self
    }

    /// Override the environment variable prefix (default: derived from `app_name`).
    pub fn env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_string());
        self
    }

    /// Disable environment variables entirely, including the settings-file
    /// variable. `_from_env` keys still read the environment.
    pub fn no_env(mut self) -> Self {
        self.env_enabled = false;
        self
    }

    /// Nesting delimiter in variable names (default `__`). Must not be empty.
    pub fn delimiter(mut self, delimiter: &str) -> Self {
        self.delimiter = delimiter.to_string();
        self
    }

    /// Name of the variable listing extra settings files, after the prefix
    /// (default `SETTINGS_FILE`).
    pub fn settings_file_suffix(mut self, suffix: &str) -> Self {
        self.settings_file_suffix = suffix.to_string();
        self
    }

    /// Ignore one variable by full name.
    pub fn exclude_env_var(mut self, name: &str) -> Self {
        self.exclude_env_vars.push(name.to_string());
        self
    }

    /// Parse variable values as JSON when possible (`8080` → number,
    /// `[1, 2]` → sequence). Off by default: values are strings.
    pub fn parse_env_values(mut self, parse: bool) -> Self {
        self.parse_env_values = parse;
        self
    }

    /// Register a settings file or glob.
    pub fn settings_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings_files.push(path.into());
        self
    }

    /// Register several settings files or globs.
    pub fn settings_files<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.settings_files.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Skip registered files that do not exist instead of failing
    /// (default: `false`). Globs never fail for matching nothing.
    pub fn skip_missing_files(mut self, skip: bool) -> Self {
        self.skip_missing_files = skip;
        self
    }

    /// Discover settings files starting from the working directory.
    pub fn infer_settings_files(mut self, infer: bool) -> Self {
        self.infer = infer;
        self
    }

    /// Discover settings files starting from `dir`. Implies
    /// [`infer_settings_files(true)`](Self::infer_settings_files).
    pub fn infer_from(mut self, dir: impl Into<PathBuf>) -> Self {
        self.infer = true;
        self.infer_from = Some(dir.into());
        self
    }

    /// Read variables from a fixed snapshot instead of the process environment.
    pub fn env_vars(mut self, vars: EnvVars) -> Self {
        self.environment = Environment::Fixed(vars);
        self
    }

    /// Transform the merged tree after every update, before it is committed.
    ///
    /// The parser receives the whole tree and must return a mapping. An error
    /// fails the update and leaves the previous tree in place.
    pub fn parser<F>(mut self, parser: F) -> Self
    where
        F: Fn(Value) -> Result<Value, StrataError> + Send + Sync + 'static,
    {
        self.parser = Some(Arc::new(parser));
        self
    }

    /// Resolve the effective env prefix (None if env disabled).
    fn effective_env_prefix(&self) -> Result<Option<String>, StrataError> {
        if !self.env_enabled {
            return Ok(None);
        }
        if let Some(prefix) = &self.env_prefix {
            return Ok(Some(prefix.clone()));
        }
        match &self.app_name {
            Some(app) => Ok(Some(app.to_uppercase().replace('-', "_"))),
            None => Err(StrataError::InvalidValue {
                key: "env_prefix".into(),
                reason: "set app_name() or env_prefix(), or call no_env()".into(),
            }),
        }
    }

    fn effective_inference(&self) -> Result<Option<Inference>, StrataError> {
        if !self.infer {
            return Ok(None);
        }
        let start = match &self.infer_from {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().map_err(|e| StrataError::IoError {
                path: PathBuf::from("."),
                source: e,
            })?,
        };
        let prefix = self
            .app_name
            .clone()
            .or_else(|| self.env_prefix.clone())
            .unwrap_or_default();
        Ok(Some(Inference { start, prefix }))
    }

    /// Build and run the first update.
    pub fn build(self) -> Result<Settings, StrataError> {
        if self.delimiter.is_empty() {
            return Err(StrataError::InvalidValue {
                key: "delimiter".into(),
                reason: "the delimiter must not be empty".into(),
            });
        }

        let env = self.effective_env_prefix()?.map(|prefix| EnvOptions {
            prefix,
            delimiter: self.delimiter.clone(),
            settings_file_suffix: self.settings_file_suffix.clone(),
            parse_values: self.parse_env_values,
            exclude: self.exclude_env_vars.clone(),
        });
        let inference = self.effective_inference()?;

        let mut settings = Settings::unloaded(
            env,
            self.environment,
            self.settings_files,
            self.skip_missing_files,
            inference,
            self.parser,
        );
        settings.update(None)?;
        Ok(settings)
    }
}
