//! Typed binding: turn the merged tree into a configuration struct.
//!
//! The tree is deserialized into confique's partial `Layer`, then confique
//! fills `#[config(default)]` values and checks required fields. Keys the
//! struct does not know are ignored. Environment values are strings unless
//! [`parse_env_values`](crate::SettingsBuilder::parse_env_values) is on, so
//! numeric fields set through the environment need it.

use confique::Config;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::StrataError;
use crate::settings::Settings;

impl Settings {
    /// Bind the current tree to a confique configuration struct.
    pub fn load<C: Config>(&self) -> Result<C, StrataError>
    where
        C::Layer: for<'de> Deserialize<'de>,
    {
        let layer = <C::Layer as Deserialize>::deserialize(self.tree()).map_err(|e| StrataError::InvalidValue {
            key: "<settings>".into(),
            reason: e.to_string(),
        })?;

        C::builder()
            .preloaded(layer)
            .load()
            .map_err(StrataError::from)
    }

    /// Deserialize the whole tree into any serde type.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, StrataError> {
        self.view().deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::EnvVars;
    use crate::fixtures::test::{DatabaseConfig, LogLevel, NormalizedConfig, ServiceConfig};
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn vars(pairs: &[(&str, &str)]) -> EnvVars {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn settings(value: serde_json::Value) -> Settings {
        let mut settings = Settings::builder().no_env().build().unwrap();
        settings.update(Some(value)).unwrap();
        settings
    }

    #[test]
    fn defaults_fill_gaps() {
        let config: ServiceConfig = settings(json!({"database": {"url": "postgres://db"}}))
            .load()
            .unwrap();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 8080);
        assert_eq!(config.log_level, LogLevel::Info);
        assert_eq!(config.database.url, "postgres://db");
        assert_eq!(config.database.pool_size, 5);
    }

    #[test]
    fn merged_values_override_defaults() {
        let config: ServiceConfig = settings(json!({
            "port": 3000,
            "log_level": "debug",
            "database": {"url": "u", "pool_size": 20},
            "unrelated": true
        }))
        .load()
        .unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.database.pool_size, 20);
    }

    #[test]
    fn missing_required_field_fails() {
        let err = settings(json!({"port": 1})).load::<ServiceConfig>().unwrap_err();
        assert!(matches!(err, StrataError::ConfigError(_)));
    }

    #[test]
    fn wrong_type_fails() {
        let err = settings(json!({"port": "not a number", "database": {"url": "u"}}))
            .load::<ServiceConfig>()
            .unwrap_err();
        assert!(matches!(err, StrataError::InvalidValue { .. }));
    }

    #[test]
    fn env_values_bind_when_parsed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("service.toml");
        fs::write(&path, "[database]\nurl = \"from-file\"\n").unwrap();

        let settings = Settings::builder()
            .env_prefix("SVC")
            .parse_env_values(true)
            .env_vars(vars(&[("SVC__PORT", "9000"), ("SVC__DATABASE__POOL_SIZE", "2")]))
            .settings_file(&path)
            .build()
            .unwrap();
        let config: ServiceConfig = settings.load().unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.database.url, "from-file");
        assert_eq!(config.database.pool_size, 2);
    }

    #[test]
    fn deserialize_with_runs_on_merged_values() {
        let config: NormalizedConfig = settings(json!({"color": "BLUE"})).load().unwrap();
        assert_eq!(config.color, "blue");
        assert_eq!(config.count, 42);
    }

    #[test]
    fn plain_serde_types() {
        let db: DatabaseConfig = settings(json!({"url": "u", "pool_size": 1})).deserialize().unwrap();
        assert_eq!(
            db,
            DatabaseConfig {
                url: "u".into(),
                pool_size: 1
            }
        );
    }
}
