//! Clap adapter for strata.
//!
//! Compiled only with the `clap` Cargo feature (on by default). It provides
//! [`SettingsArgs`], a clap derive type you flatten into your own parser to
//! get a repeatable `--settings/-s PATH` option:
//!
//! ```ignore
//! #[derive(Parser)]
//! struct Cli {
//!     #[command(flatten)]
//!     settings: SettingsArgs,
//! }
//!
//! let cli = Cli::parse();
//! let mut settings = Settings::builder().app_name("myapp").build()?;
//! cli.settings.apply(&mut settings)?;
//! ```
//!
//! Files passed on the command line are registered after the builder's
//! files, so they take precedence over them (but not over environment
//! variables or programmatic updates).

use std::path::PathBuf;

use clap::Args;

use crate::error::StrataError;
use crate::settings::Settings;

#[derive(Debug, Clone, Default, PartialEq, Args)]
pub struct SettingsArgs {
    /// Settings file to load (JSON, YAML or TOML). Repeatable; globs are expanded.
    #[arg(long = "settings", short = 's', value_name = "PATH")]
    pub settings: Vec<PathBuf>,
}

impl SettingsArgs {
    /// Register the given files on `settings` and rebuild. Nothing happens
    /// when no file was passed. On error `settings` is left unchanged.
    pub fn apply(self, settings: &mut Settings) -> Result<(), StrataError> {
        if self.settings.is_empty() {
            return Ok(());
        }
        tracing::debug!(files = self.settings.len(), "registering settings files from the command line");
        let mut files = settings.settings_files().to_vec();
        files.extend(self.settings);
        settings.replace_settings_files(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    #[derive(Debug, Parser)]
    struct TestCli {
        #[command(flatten)]
        settings: SettingsArgs,
    }

    fn parse(args: &[&str]) -> SettingsArgs {
        TestCli::try_parse_from(args).unwrap().settings
    }

    #[test]
    fn parse_none() {
        assert_eq!(parse(&["test"]), SettingsArgs::default());
    }

    #[test]
    fn parse_repeated() {
        let args = parse(&["test", "-s", "a.toml", "--settings", "conf/*.yaml"]);
        assert_eq!(
            args.settings,
            [PathBuf::from("a.toml"), PathBuf::from("conf/*.yaml")]
        );
    }

    #[test]
    fn missing_value_errors() {
        assert!(TestCli::try_parse_from(["test", "--settings"]).is_err());
    }

    #[test]
    fn apply_appends_after_builder_files() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("base.json");
        let cli = dir.path().join("cli.json");
        fs::write(&base, r#"{"a": "base", "b": "base"}"#).unwrap();
        fs::write(&cli, r#"{"b": "cli"}"#).unwrap();

        let mut settings = Settings::builder().no_env().settings_file(&base).build().unwrap();
        let args = parse(&["test", "-s", cli.to_str().unwrap()]);
        args.apply(&mut settings).unwrap();

        assert_eq!(settings.to_value(), json!({"a": "base", "b": "cli"}));
        assert_eq!(settings.settings_files(), [base, cli]);
    }

    #[test]
    fn apply_failure_leaves_settings_alone() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.json");

        let mut settings = Settings::builder().no_env().build().unwrap();
        settings.update(Some(json!({"k": 1}))).unwrap();
        let args = parse(&["test", "-s", missing.to_str().unwrap()]);

        assert!(args.apply(&mut settings).unwrap_err().is_missing_source());
        assert!(settings.settings_files().is_empty());
        assert_eq!(settings.to_value(), json!({"k": 1}));
    }
}
