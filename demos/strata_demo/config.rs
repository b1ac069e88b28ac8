//! Typed configuration for the strata demo application.
//!
//! The merged settings tree is bound to [`DemoConfig`] through confique, so
//! keys missing from every source fall back to the `#[config(default)]`
//! values below.
//!
//! # Env var mapping
//!
//! With the prefix `STRATA_DEMO` (derived from `app_name`):
//!
//! | Env var                                 | Settings key             |
//! |-----------------------------------------|--------------------------|
//! | `STRATA_DEMO__NAME`                     | `name`                   |
//! | `STRATA_DEMO__SERVER__HOST`             | `server.host`            |
//! | `STRATA_DEMO__SERVER__PORT`             | `server.port`            |
//! | `STRATA_DEMO__SERVER__PASSWORD_FROM_ENV`| `server.password` (indirect) |
//! | `STRATA_DEMO__SETTINGS_FILE`            | extra settings files     |

use confique::Config;
use serde::{Deserialize, Serialize};

#[derive(Config, Serialize, Deserialize, Debug)]
pub struct DemoConfig {
    /// Application name shown in the banner.
    #[config(default = "strata-demo")]
    pub name: String,

    /// Server settings.
    #[config(nested)]
    pub server: ServerConfig,
}

#[derive(Config, Serialize, Deserialize, Debug)]
pub struct ServerConfig {
    /// Hostname to bind to.
    #[config(default = "127.0.0.1")]
    pub host: String,

    /// Port to listen on.
    #[config(default = 8080)]
    pub port: u16,

    /// Optional password, usually provided through `password_from_env` or
    /// `password_from_file`.
    pub password: Option<String>,
}
