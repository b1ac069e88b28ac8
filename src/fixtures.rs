#[cfg(test)]
pub mod test {
    use confique::Config;
    use serde::{Deserialize, Serialize};

    #[derive(Config, Serialize, Deserialize, Debug, PartialEq)]
    pub struct ServiceConfig {
        /// Address to listen on.
        #[config(default = "localhost")]
        pub host: String,

        /// Port to listen on.
        #[config(default = 8080)]
        pub port: u16,

        /// Log verbosity.
        #[config(default = "info")]
        pub log_level: LogLevel,

        /// Database settings.
        #[config(nested)]
        pub database: DatabaseConfig,
    }

    #[derive(Config, Serialize, Deserialize, Debug, PartialEq)]
    pub struct DatabaseConfig {
        /// Connection string. Required.
        pub url: String,

        /// Connection pool size.
        #[config(default = 5)]
        pub pool_size: usize,
    }

    #[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
    #[serde(rename_all = "lowercase")]
    pub enum LogLevel {
        Debug,
        Info,
        Warn,
    }

    #[test]
    fn service_config_requires_database_url() {
        assert!(ServiceConfig::builder().load().is_err());
    }

    // -- Fixture for deserialize_with normalization tests ----------------------

    /// Deserialize a string and normalize it to lowercase.
    fn normalize_lowercase<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(s.to_lowercase())
    }

    #[derive(Config, Serialize, Deserialize, Debug, PartialEq)]
    pub struct NormalizedConfig {
        /// A color name, normalized to lowercase.
        #[config(deserialize_with = normalize_lowercase, default = "red")]
        pub color: String,

        /// Plain field with no normalization.
        #[config(default = 42)]
        pub count: u32,
    }
}
