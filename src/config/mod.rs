//! Configuration management.
//!
//! Sources, later ones winning:
//! 1. Built-in defaults
//! 2. `config.toml` (explicit path, or the platform config dir)
//! 3. `RECSTORE_DB_*` environment variables

use crate::storage::ConnectParams;
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix for database overrides.
pub const ENV_PREFIX: &str = "RECSTORE_DB_";

/// Main configuration for recstore.
#[derive(Debug, Clone, Default)]
pub struct RecstoreConfig {
    /// Database connection settings.
    pub database: DatabaseConfig,
    /// Logging settings.
    pub logging: LoggingSettings,
}

/// Which driver to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// `SQLite` file database.
    #[default]
    Sqlite,
    /// PostgreSQL server.
    Postgres,
}

impl Backend {
    /// Parses a backend name.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidInput`] for an unknown name.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s.to_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown backend '{other}'"
            ))),
        }
    }

    /// Returns the backend name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
        }
    }
}

/// Database connection settings.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Driver selection.
    pub backend: Backend,
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Database name, or file path for `SQLite`.
    pub name: String,
    /// Schema qualifier applied to every table.
    pub schema: Option<String>,
    /// Prefix applied by [`Self::table_name`].
    pub table_prefix: String,
    /// Login user.
    pub user: Option<String>,
    /// Login password.
    pub password: Option<SecretString>,
    /// Per-statement deadline in milliseconds.
    pub statement_timeout_ms: u64,
    /// Connect deadline in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Sqlite,
            host: "localhost".to_string(),
            port: 5432,
            name: "recstore.db".to_string(),
            schema: None,
            table_prefix: String::new(),
            user: None,
            password: None,
            statement_timeout_ms: 5_000,
            connect_timeout_ms: 5_000,
        }
    }
}

impl DatabaseConfig {
    /// Returns the full table name for `base`, with the configured prefix.
    #[must_use]
    pub fn table_name(&self, base: &str) -> String {
        format!("{}{base}", self.table_prefix)
    }

    /// Builds the driver connect parameters.
    #[must_use]
    pub fn connect_params(&self) -> ConnectParams {
        let mut params = ConnectParams::new(self.name.clone())
            .with_server(self.host.clone(), self.port)
            .with_statement_timeout(Duration::from_millis(self.statement_timeout_ms))
            .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms));
        params.user.clone_from(&self.user);
        params.password.clone_from(&self.password);
        params
    }

    /// Applies `RECSTORE_DB_*` overrides read through `lookup`.
    ///
    /// Unparseable numbers and unknown backends are ignored with a warning.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(&format!("{ENV_PREFIX}{key}")).filter(|v| !v.is_empty());

        if let Some(v) = var("BACKEND") {
            match Backend::parse(&v) {
                Ok(backend) => self.backend = backend,
                Err(e) => tracing::warn!(error = %e, "Ignoring {ENV_PREFIX}BACKEND"),
            }
        }
        if let Some(v) = var("HOST") {
            self.host = v;
        }
        if let Some(v) = var("PORT") {
            match v.parse() {
                Ok(port) => self.port = port,
                Err(e) => tracing::warn!(value = %v, error = %e, "Ignoring {ENV_PREFIX}PORT"),
            }
        }
        if let Some(v) = var("NAME") {
            self.name = v;
        }
        if let Some(v) = var("SCHEMA") {
            self.schema = Some(v);
        }
        if let Some(v) = var("TABLE_PREFIX") {
            self.table_prefix = v;
        }
        if let Some(v) = var("USER") {
            self.user = Some(v);
        }
        if let Some(v) = var("PASSWORD") {
            self.password = Some(SecretString::from(v));
        }
        if let Some(v) = var("STATEMENT_TIMEOUT_MS") {
            match v.parse() {
                Ok(ms) => self.statement_timeout_ms = ms,
                Err(e) => {
                    tracing::warn!(value = %v, error = %e, "Ignoring {ENV_PREFIX}STATEMENT_TIMEOUT_MS");
                },
            }
        }
        if let Some(v) = var("CONNECT_TIMEOUT_MS") {
            match v.parse() {
                Ok(ms) => self.connect_timeout_ms = ms,
                Err(e) => {
                    tracing::warn!(value = %v, error = %e, "Ignoring {ENV_PREFIX}CONNECT_TIMEOUT_MS");
                },
            }
        }
    }
}

/// Logging settings from the config file.
#[derive(Debug, Clone, Default)]
pub struct LoggingSettings {
    /// Filter directive, e.g. `info` or `recstore=debug`.
    pub level: Option<String>,
    /// Output format: `pretty` or `json`.
    pub format: Option<String>,
    /// Append log lines to this file instead of stderr.
    pub file: Option<PathBuf>,
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Database section.
    pub database: Option<ConfigFileDatabase>,
    /// Logging section.
    pub logging: Option<ConfigFileLogging>,
}

/// Database section in config file.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileDatabase {
    /// Backend name.
    pub backend: Option<String>,
    /// Server host.
    pub host: Option<String>,
    /// Server port.
    pub port: Option<u16>,
    /// Database name or file path.
    pub name: Option<String>,
    /// Schema qualifier.
    pub schema: Option<String>,
    /// Table name prefix.
    pub table_prefix: Option<String>,
    /// Login user.
    pub user: Option<String>,
    /// Login password.
    pub password: Option<SecretString>,
    /// Statement deadline in milliseconds.
    pub statement_timeout_ms: Option<u64>,
    /// Connect deadline in milliseconds.
    pub connect_timeout_ms: Option<u64>,
}

/// Logging section in config file.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileLogging {
    /// Filter directive.
    pub level: Option<String>,
    /// Output format.
    pub format: Option<String>,
    /// Log file path.
    pub file: Option<String>,
}

impl RecstoreConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> crate::Result<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| crate::Error::OperationFailed {
                operation: "read_config_file".to_string(),
                cause: format!("{}: {e}", path.display()),
            })?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid configuration.
    pub fn from_toml(contents: &str) -> crate::Result<Self> {
        let file: ConfigFile =
            toml::from_str(contents).map_err(|e| crate::Error::OperationFailed {
                operation: "parse_config_file".to_string(),
                cause: e.to_string(),
            })?;
        Self::from_config_file(file)
    }

    /// Returns the default config file location.
    ///
    /// `<platform config dir>/recstore/config.toml`, e.g.
    /// `~/.config/recstore/config.toml` on Linux.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "recstore")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Loads configuration from the default location.
    ///
    /// Returns default configuration if no config file is found or it cannot
    /// be loaded.
    #[must_use]
    pub fn load_default() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable config file");
                Self::default()
            },
        }
    }

    /// Applies `RECSTORE_DB_*` overrides from the process environment.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        self.database.apply_env(|key| std::env::var(key).ok());
        self
    }

    fn from_config_file(file: ConfigFile) -> crate::Result<Self> {
        let mut config = Self::default();

        if let Some(db) = file.database {
            let target = &mut config.database;
            if let Some(backend) = db.backend {
                target.backend = Backend::parse(&backend)?;
            }
            if let Some(host) = db.host {
                target.host = host;
            }
            if let Some(port) = db.port {
                target.port = port;
            }
            if let Some(name) = db.name {
                target.name = name;
            }
            if let Some(prefix) = db.table_prefix {
                target.table_prefix = prefix;
            }
            if let Some(ms) = db.statement_timeout_ms {
                target.statement_timeout_ms = ms;
            }
            if let Some(ms) = db.connect_timeout_ms {
                target.connect_timeout_ms = ms;
            }
            target.schema = db.schema;
            target.user = db.user;
            target.password = db.password;
        }

        if let Some(logging) = file.logging {
            config.logging = LoggingSettings {
                level: logging.level,
                format: logging.format,
                file: logging.file.map(PathBuf::from),
            };
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = RecstoreConfig::new();
        assert_eq!(config.database.backend, Backend::Sqlite);
        assert_eq!(config.database.statement_timeout_ms, 5_000);
        assert!(config.database.password.is_none());
    }

    #[test]
    fn test_from_toml() {
        let config = RecstoreConfig::from_toml(
            r#"
            [database]
            backend = "postgres"
            host = "db.internal"
            port = 6543
            name = "bots"
            schema = "public"
            table_prefix = "bot_"
            user = "app"
            password = "hunter2"
            statement_timeout_ms = 250

            [logging]
            level = "debug"
            format = "json"
            "#,
        )
        .unwrap();

        let db = &config.database;
        assert_eq!(db.backend, Backend::Postgres);
        assert_eq!(db.host, "db.internal");
        assert_eq!(db.port, 6543);
        assert_eq!(db.schema.as_deref(), Some("public"));
        assert_eq!(db.table_name("users"), "bot_users");
        assert_eq!(
            db.password.as_ref().map(|p| p.expose_secret().to_string()),
            Some("hunter2".to_string())
        );
        assert_eq!(db.connect_timeout_ms, 5_000);
        assert_eq!(config.logging.format.as_deref(), Some("json"));
    }

    #[test]
    fn test_from_toml_rejects_unknown_backend() {
        let err = RecstoreConfig::from_toml("[database]\nbackend = \"oracle\"\n").unwrap_err();
        assert!(matches!(err, crate::Error::InvalidInput(_)));
    }

    #[test]
    fn test_from_toml_rejects_unknown_keys() {
        assert!(RecstoreConfig::from_toml("[database]\nhots = \"x\"\n").is_err());
    }

    #[test]
    fn test_load_from_missing_file() {
        let err = RecstoreConfig::load_from_file(Path::new("/nonexistent/recstore.toml"));
        assert!(matches!(err, Err(crate::Error::OperationFailed { .. })));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("RECSTORE_DB_BACKEND", "postgresql"),
            ("RECSTORE_DB_PORT", "7000"),
            ("RECSTORE_DB_NAME", "override"),
            ("RECSTORE_DB_PASSWORD", "secret"),
            ("RECSTORE_DB_STATEMENT_TIMEOUT_MS", "not-a-number"),
            ("RECSTORE_DB_HOST", ""),
        ]
        .into_iter()
        .collect();

        let mut db = DatabaseConfig::default();
        db.apply_env(|key| env.get(key).map(|v| (*v).to_string()));

        assert_eq!(db.backend, Backend::Postgres);
        assert_eq!(db.port, 7000);
        assert_eq!(db.name, "override");
        assert_eq!(db.host, "localhost");
        assert_eq!(db.statement_timeout_ms, 5_000);
        assert!(db.password.is_some());
    }

    #[test]
    fn test_connect_params() {
        let db = DatabaseConfig {
            name: "data.db".to_string(),
            statement_timeout_ms: 1_500,
            user: Some("app".to_string()),
            ..DatabaseConfig::default()
        };
        let params = db.connect_params();
        assert_eq!(params.database, "data.db");
        assert_eq!(params.statement_timeout, Duration::from_millis(1_500));
        assert_eq!(params.user.as_deref(), Some("app"));
    }
}
