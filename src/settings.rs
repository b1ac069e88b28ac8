//! The settings facade: orchestrates readers, indirection processing and the
//! merge engine, and owns the resulting tree.
//!
//! Every update rebuilds the tree from scratch. Sources are read in this
//! order, later ones overriding earlier ones:
//!
//! 1. inferred settings files (when enabled)
//! 2. registered settings files, in registration order
//! 3. files listed in the `{PREFIX}__SETTINGS_FILE` variable
//! 4. environment variables `{PREFIX}__*`
//! 5. programmatic updates, in the order they were made
//!
//! Programmatic updates are kept and replayed on every rebuild until
//! [`clear`](Settings::clear) is called, so a [`reload`](Settings::reload)
//! picks up file and environment changes without losing them.
//!
//! A rebuild is all-or-nothing. The new tree is built into a fresh
//! [`MergeEngine`] and committed only once every source has been read and
//! merged; on error the previous tree, log, updates and file list stay as
//! they were.
//!
//! A [parser](crate::SettingsBuilder::parser) registered on the builder
//! runs on the merged tree as the last step of every rebuild, so its errors
//! are isolated the same way.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::builder::SettingsBuilder;
use crate::env::{self, EnvOptions, EnvVars, Environment, SettingsFileEntry};
use crate::error::{FormatError, StrataError};
use crate::file;
use crate::format;
use crate::fragment::{Fragment, Source};
use crate::merge::{MergeEngine, UpdateLogEntry};
use crate::path::KeyPath;
use crate::processor::{Resolved, Resolver};
use crate::view::SettingsView;

/// Post-processing applied to the merged tree on every rebuild.
pub type TreeParser = Arc<dyn Fn(Value) -> Result<Value, StrataError> + Send + Sync>;

/// Where to look for inferred settings files.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Inference {
    pub start: PathBuf,
    pub prefix: String,
}

#[derive(Debug, Clone)]
struct Snapshot {
    tree: Arc<Value>,
    log: Vec<UpdateLogEntry>,
    updates: Vec<Fragment>,
    settings_files: Vec<PathBuf>,
    environment: Environment,
}

/// Aggregated settings. Build one with [`Settings::builder`].
pub struct Settings {
    pub(crate) env: Option<EnvOptions>,
    pub(crate) environment: Environment,
    pub(crate) settings_files: Vec<PathBuf>,
    pub(crate) skip_missing_files: bool,
    pub(crate) inference: Option<Inference>,
    pub(crate) parser: Option<TreeParser>,
    updates: Vec<Fragment>,
    tree: Arc<Value>,
    log: Vec<UpdateLogEntry>,
    snapshots: Vec<Snapshot>,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("env", &self.env)
            .field("environment", &self.environment)
            .field("settings_files", &self.settings_files)
            .field("skip_missing_files", &self.skip_missing_files)
            .field("inference", &self.inference)
            .field("parser", &self.parser.is_some())
            .field("tree", &self.tree)
            .finish_non_exhaustive()
    }
}

impl Settings {
    pub fn builder() -> SettingsBuilder {
        SettingsBuilder::new()
    }

    /// An empty, not yet updated instance. The builder runs the first update.
    pub(crate) fn unloaded(
        env: Option<EnvOptions>,
        environment: Environment,
        settings_files: Vec<PathBuf>,
        skip_missing_files: bool,
        inference: Option<Inference>,
        parser: Option<TreeParser>,
    ) -> Self {
        Self {
            env,
            environment,
            settings_files,
            skip_missing_files,
            inference,
            parser,
            updates: Vec::new(),
            tree: Arc::new(Value::Object(Map::new())),
            log: Vec::new(),
            snapshots: Vec::new(),
        }
    }

    // -- updating -----------------------------------------------------------

    /// Re-read every source and rebuild the tree. `extra` must be a mapping
    /// and is merged with the highest precedence; it is kept for later
    /// rebuilds.
    pub fn update(&mut self, extra: Option<Value>) -> Result<(), StrataError> {
        let mut updates = self.updates.clone();
        if let Some(value) = extra {
            let map = format::require_mapping(value).map_err(|e| StrataError::MalformedContent {
                origin: "update".to_string(),
                source: e,
            })?;
            updates.push(Fragment::new(KeyPath::root(), Value::Object(map), Source::Update));
        }
        self.commit(updates, self.settings_files.clone())
    }

    /// Set a single value by dotted path (`"db.servers.0.host"`) and rebuild.
    pub fn update_path(&mut self, spec: &str, value: impl Into<Value>) -> Result<(), StrataError> {
        let mut updates = self.updates.clone();
        updates.push(Fragment::new(KeyPath::from_spec(spec), value.into(), Source::Update));
        self.commit(updates, self.settings_files.clone())
    }

    /// Re-read every source, keeping programmatic updates.
    pub fn reload(&mut self) -> Result<(), StrataError> {
        self.update(None)
    }

    /// Drop all programmatic updates and rebuild from files and environment.
    pub fn clear(&mut self) -> Result<(), StrataError> {
        self.commit(Vec::new(), self.settings_files.clone())
    }

    /// Swap the registered settings files and rebuild. On failure the old
    /// list stays registered.
    pub fn replace_settings_files<I, P>(&mut self, files: I) -> Result<(), StrataError>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let files = files.into_iter().map(Into::into).collect();
        self.commit(self.updates.clone(), files)
    }

    fn commit(&mut self, updates: Vec<Fragment>, settings_files: Vec<PathBuf>) -> Result<(), StrataError> {
        match self.rebuild(&updates, &settings_files) {
            Ok((tree, log)) => {
                tracing::info!(
                    entries = log.len(),
                    keys = tree.as_object().map_or(0, Map::len),
                    "settings updated"
                );
                self.tree = Arc::new(tree);
                self.log = log;
                self.updates = updates;
                self.settings_files = settings_files;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "settings update failed, keeping previous settings");
                Err(e)
            }
        }
    }

    fn rebuild(&self, updates: &[Fragment], settings_files: &[PathBuf]) -> Result<(Value, Vec<UpdateLogEntry>), StrataError> {
        let vars = self.environment.snapshot();
        let fragments = self.gather(updates, settings_files, &vars)?;
        tracing::debug!(fragments = fragments.len(), "rebuilding settings");

        let parse_env_values = self.env.as_ref().is_some_and(|options| options.parse_values);
        let resolver = Resolver::new(&vars).parse_env_values(parse_env_values);

        let mut engine = MergeEngine::new();
        for resolved in resolver.resolve_all(fragments)? {
            match resolved {
                Resolved::Apply(fragment) => engine.apply(fragment)?,
                Resolved::Consumed(fragment) => engine.record_removal(&fragment),
            }
        }
        let (tree, log) = engine.finish();
        match &self.parser {
            Some(parser) => Ok((parse_tree(parser, tree)?, log)),
            None => Ok((tree, log)),
        }
    }

    /// Read every source into fragments, lowest precedence first.
    fn gather(&self, updates: &[Fragment], settings_files: &[PathBuf], vars: &EnvVars) -> Result<Vec<Fragment>, StrataError> {
        let mut fragments = Vec::new();

        if let Some(inference) = &self.inference {
            for path in file::infer_settings_files(&inference.start, &inference.prefix)? {
                fragments.extend(file::load_file(&path, &KeyPath::root(), Source::file(&path))?);
            }
        }

        for entry in settings_files {
            fragments.extend(file::load_entry(entry, self.skip_missing_files)?);
        }

        if let Some(options) = &self.env {
            let scan = env::scan_env(options, vars);
            for entry in scan.settings_files {
                match entry {
                    SettingsFileEntry::Path(path) => {
                        fragments.extend(file::load_entry(Path::new(&path), self.skip_missing_files)?);
                    }
                    SettingsFileEntry::Content { format, content } => {
                        let var = options.settings_file_var();
                        let malformed = |e: FormatError| StrataError::MalformedContent {
                            origin: format!("environment variable {var}"),
                            source: e,
                        };
                        let value = format.parse(&content).map_err(malformed)?;
                        let source = Source::env(var.as_str()).via(Source::Content { format });
                        fragments.extend(file::content_fragments(value, &KeyPath::root(), source).map_err(malformed)?);
                    }
                }
            }
            fragments.extend(scan.fragments);
        }

        fragments.extend(updates.iter().cloned());
        Ok(fragments)
    }

    // -- reading ------------------------------------------------------------

    /// A read-only view of the current tree.
    pub fn view(&self) -> SettingsView {
        SettingsView::new(Arc::clone(&self.tree))
    }

    /// View of a top-level key.
    pub fn get(&self, key: &str) -> Option<SettingsView> {
        self.view().get(key)
    }

    /// View of a dotted path such as `servers.0.host`.
    pub fn lookup(&self, spec: &str) -> Option<SettingsView> {
        self.view().lookup(spec)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.tree.as_object().is_some_and(|map| map.contains_key(key))
    }

    pub fn len(&self) -> usize {
        self.tree.as_object().map_or(0, Map::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.tree
            .as_object()
            .into_iter()
            .flat_map(|map| map.keys().map(String::as_str))
    }

    pub fn tree(&self) -> &Value {
        &self.tree
    }

    /// A plain copy of the tree.
    pub fn to_value(&self) -> Value {
        self.tree.as_ref().clone()
    }

    /// What the most recent successful update did, in application order.
    pub fn update_log(&self) -> &[UpdateLogEntry] {
        &self.log
    }

    /// The update log, one line per entry.
    pub fn update_log_text(&self) -> String {
        self.log
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Emit the update log through `tracing` at info level.
    pub fn log_updates(&self) {
        for entry in &self.log {
            tracing::info!(
                path = %entry.path,
                action = ?entry.action,
                source = %entry.source,
                timestamp = %entry.timestamp,
                "{entry}"
            );
        }
    }

    // -- sources ------------------------------------------------------------

    pub fn settings_files(&self) -> &[PathBuf] {
        &self.settings_files
    }

    /// Registered settings files. Changes take effect on the next update.
    pub fn settings_files_mut(&mut self) -> &mut Vec<PathBuf> {
        &mut self.settings_files
    }

    pub fn env_options(&self) -> Option<&EnvOptions> {
        self.env.as_ref()
    }

    /// The environment provider. Changes take effect on the next update.
    pub fn environment_mut(&mut self) -> &mut Environment {
        &mut self.environment
    }

    // -- temporary changes ----------------------------------------------------

    /// Start a scope whose changes are undone when the returned guard drops.
    ///
    /// The guard dereferences to `Settings`, so updates go through it as
    /// usual. On drop, the tree, log, programmatic updates, file list and
    /// environment provider are restored to what they were when the scope
    /// started, whether the scope ended normally, early, or by unwinding.
    /// Scopes nest.
    pub fn temporary_changes(&mut self) -> TemporaryChanges<'_> {
        let snapshot = Snapshot {
            tree: Arc::clone(&self.tree),
            log: self.log.clone(),
            updates: self.updates.clone(),
            settings_files: self.settings_files.clone(),
            environment: self.environment.clone(),
        };
        self.snapshots.push(snapshot);
        TemporaryChanges { settings: self }
    }

    /// Run `f` inside a temporary-changes scope.
    pub fn with_temporary_changes<R>(&mut self, f: impl FnOnce(&mut Settings) -> R) -> R {
        let mut scope = self.temporary_changes();
        f(&mut scope)
    }

    fn restore(&mut self) {
        if let Some(snapshot) = self.snapshots.pop() {
            tracing::debug!(depth = self.snapshots.len(), "restoring settings snapshot");
            self.tree = snapshot.tree;
            self.log = snapshot.log;
            self.updates = snapshot.updates;
            self.settings_files = snapshot.settings_files;
            self.environment = snapshot.environment;
        }
    }
}

fn parse_tree(parser: &TreeParser, tree: Value) -> Result<Value, StrataError> {
    let parsed = parser(tree)?;
    if !parsed.is_object() {
        return Err(StrataError::InvalidValue {
            key: "<parser>".into(),
            reason: format!("expected a mapping, found {}", format::kind_name(&parsed)),
        });
    }
    Ok(parsed)
}

/// Guard returned by [`Settings::temporary_changes`].
pub struct TemporaryChanges<'s> {
    settings: &'s mut Settings,
}

impl Deref for TemporaryChanges<'_> {
    type Target = Settings;

    fn deref(&self) -> &Settings {
        self.settings
    }
}

impl DerefMut for TemporaryChanges<'_> {
    fn deref_mut(&mut self) -> &mut Settings {
        self.settings
    }
}

impl Drop for TemporaryChanges<'_> {
    fn drop(&mut self) {
        self.settings.restore();
    }
}
