//! Layered settings for Rust applications: files, environment variables and
//! inline content merged into one tree.
//!
//! Strata reads settings from every source you point it at, merges them
//! deterministically, and hands you a read-only view of the result. Bind the
//! result to a [confique](https://docs.rs/confique) struct when you want
//! types and defaults.
//!
//! ```ignore
//! let settings = Settings::builder()
//!     .app_name("myapp")
//!     .settings_file("/etc/myapp/settings.toml")
//!     .build()?;
//!
//! let port = settings.lookup("server.port").and_then(|v| v.as_u64());
//! let config: AppConfig = settings.load()?;
//! ```
//!
//! That call reads `/etc/myapp/settings.toml`, merges every `MYAPP__*`
//! environment variable on top, follows any `_from_file`/`_from_env`
//! references, and keeps the merged tree until the next update.
//!
//! # Sources and precedence
//!
//! ```text
//! Inferred files        *myapp*settings* between cwd and the project root
//!        ↑ overridden by
//! Settings files        registered order, globs expanded in sorted order
//!        ↑ overridden by
//! MYAPP__SETTINGS_FILE  comma-separated paths, or inline JSON/YAML/TOML
//!        ↑ overridden by
//! Environment vars      MYAPP__SECTION__KEY
//!        ↑ overridden by
//! Updates               settings.update(Some(json!({...})))
//! ```
//!
//! Every source is **sparse**: it only names the keys it sets. Mappings merge
//! key by key, sequences merge index by index, and anything else is replaced
//! by the later source.
//!
//! # Environment variables
//!
//! With prefix `MYAPP`, variables map via double-underscore nesting:
//!
//! | Env var | Settings key |
//! |---------|--------------|
//! | `MYAPP__HOST` | `host` |
//! | `MYAPP__DATABASE__URL` | `database.url` |
//! | `MYAPP__SERVERS__0__HOST` | `servers.0.host` (sequence element) |
//!
//! `__` separates nesting levels; a single `_` is part of the name. Segments
//! are lowercased, and pure digits address sequence positions. Values are
//! strings unless [`parse_env_values`](SettingsBuilder::parse_env_values) is
//! on.
//!
//! # Indirection
//!
//! Keys ending in a reserved suffix are replaced by what they reference:
//!
//! ```toml
//! [database]
//! password_from_env = "DB_PASSWORD"     # value of $DB_PASSWORD
//! tls_key_from_file = "/run/secrets/key" # file content, trimmed
//! replicas_from_file = "replicas/*.yaml" # parsed and merged under `replicas`
//! pool_from_json_content = '{"size": 4}' # parsed and merged under `pool`
//! ```
//!
//! A key that is only the suffix (`_from_file = "base.json"`) merges into
//! the mapping that contains it. Included files may include other files; a
//! file that ends up including itself is reported as an
//! [`InclusionCycle`](StrataError::InclusionCycle).
//!
//! # Updates are all-or-nothing
//!
//! [`Settings::update`], [`reload`](Settings::reload) and friends rebuild
//! the whole tree from scratch. If anything fails (a missing file, a syntax
//! error, an index gap) the error is returned and the previous tree stays in
//! place. Views handed out earlier keep showing the tree they were taken
//! from.
//!
//! [`temporary_changes`](Settings::temporary_changes) opens a scope whose
//! updates are undone when the guard drops, which is handy in tests.
//!
//! # Diagnostics
//!
//! [`update_log`](Settings::update_log) records what the last update did,
//! key by key, with the source of each value. Strata logs through
//! [`tracing`](https://docs.rs/tracing) and never installs a subscriber.
//!
//! # Error handling
//!
//! All fallible operations return [`StrataError`]. See the [`error`] module
//! for the full set.

pub mod error;
pub mod path;

mod bind;
mod builder;
#[cfg(feature = "clap")]
mod cli;
mod env;
mod file;
mod format;
mod fragment;
mod merge;
mod processor;
mod settings;
mod view;

#[cfg(test)]
mod fixtures;

pub use builder::SettingsBuilder;
#[cfg(feature = "clap")]
pub use cli::SettingsArgs;
pub use env::{EnvOptions, EnvVars, Environment};
pub use error::{FormatError, Missing, StrataError};
pub use format::Format;
pub use fragment::{Fragment, Source};
pub use merge::{MergeEngine, UpdateAction, UpdateLogEntry, deep_merge};
pub use path::{KeyPath, Segment};
pub use processor::{Expansion, Indirection, Resolved, Resolver};
pub use settings::{Settings, TemporaryChanges, TreeParser};
pub use view::SettingsView;
