//! # strata demo application
//!
//! A sample CLI that loads settings with strata and prints what it found.
//! It exists to demonstrate and manually verify strata's features.
//!
//! ## Running
//!
//! ```sh
//! cargo run --example strata_demo -- show
//! cargo run --example strata_demo -- -s demo.toml log
//! ```
//!
//! ## Features demonstrated
//!
//! | Feature                | How to exercise it                                                          |
//! |------------------------|-----------------------------------------------------------------------------|
//! | Settings file          | `cargo run --example strata_demo -- -s demo.toml show`                      |
//! | Inferred files         | Create `strata-demo-settings.yaml` in cwd, then run `show`                  |
//! | Env var override       | `STRATA_DEMO__SERVER__PORT=9999 cargo run --example strata_demo -- show`    |
//! | Env indirection        | `PW=x STRATA_DEMO__SERVER__PASSWORD_FROM_ENV=PW cargo run --example strata_demo -- show` |
//! | Inline settings        | `STRATA_DEMO__SETTINGS_FILE='{"name": "inline"}' cargo run --example strata_demo -- show` |
//! | Programmatic update    | `cargo run --example strata_demo -- --set server.host=0.0.0.0 show`         |
//! | Single key             | `cargo run --example strata_demo -- show --key server.port`                 |
//! | Update log             | `cargo run --example strata_demo -- log`                                    |
//! | Typed binding          | `cargo run --example strata_demo -- typed`                                  |

mod config;

use clap::{Parser, Subcommand};
use serde_json::Value;

use strata::{Settings, SettingsArgs, StrataError};

use config::DemoConfig;

// ---------------------------------------------------------------------------
// CLI definitions
// ---------------------------------------------------------------------------

/// strata demo: a sample CLI app for showcasing strata integration.
#[derive(Parser, Debug)]
#[command(name = "strata-demo")]
struct Cli {
    #[command(flatten)]
    settings: SettingsArgs,

    /// Set a value by dotted key, e.g. `server.port=9000`. Repeatable.
    #[arg(long = "set", value_name = "KEY=VALUE", global = true)]
    set: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the merged settings tree as JSON.
    Show {
        /// Print only this dotted key.
        #[arg(long)]
        key: Option<String>,
    },
    /// Print what the last update did, key by key.
    Log,
    /// Bind the settings to the typed demo configuration and print it.
    Typed,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Parse `KEY=VALUE`. The value is read as JSON when it parses, so
/// `server.port=9000` sets a number and `name=demo` a string.
fn parse_assignment(raw: &str) -> Option<(&str, Value)> {
    let (key, value) = raw.split_once('=')?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Some((key, value))
}

fn load(cli: Cli) -> Result<(Settings, Commands), StrataError> {
    let mut settings = Settings::builder()
        .app_name("strata-demo")
        .parse_env_values(true)
        .infer_settings_files(true)
        .build()?;
    cli.settings.apply(&mut settings)?;

    for raw in &cli.set {
        let Some((key, value)) = parse_assignment(raw) else {
            return Err(StrataError::InvalidValue {
                key: raw.clone(),
                reason: "expected KEY=VALUE".into(),
            });
        };
        settings.update_path(key, value)?;
    }
    Ok((settings, cli.command))
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() {
    let cli = Cli::parse();
    let (settings, command) = load(cli).unwrap_or_else(|e| {
        eprintln!("Failed to load settings:\n{e}");
        std::process::exit(1);
    });

    match command {
        Commands::Show { key: None } => {
            println!("{:#}", settings.tree());
        }
        Commands::Show { key: Some(key) } => match settings.lookup(&key) {
            Some(view) => println!("{key}  {view}"),
            None => {
                eprintln!("Unknown key: {key}");
                std::process::exit(1);
            }
        },
        Commands::Log => {
            for entry in settings.update_log() {
                println!("{}  {entry}", entry.timestamp.format("%H:%M:%S%.3f"));
            }
        }
        Commands::Typed => {
            let config: DemoConfig = settings.load().unwrap_or_else(|e| {
                eprintln!("Invalid settings:\n{e}");
                std::process::exit(1);
            });
            println!("{config:#?}");
        }
    }
}
