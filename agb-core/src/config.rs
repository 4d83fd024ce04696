use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MigrateConfig {
    /// The store rows are read from.
    pub legacy: Endpoint,
    /// The store rows are upserted into.
    pub destination: Endpoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Mysql,
    Postgres,
    Sqlite,
}

impl Backend {
    pub fn as_str(self) -> &'static str {
        match self {
            Backend::Mysql => "mysql",
            Backend::Postgres => "postgres",
            Backend::Sqlite => "sqlite",
        }
    }

    pub fn default_port(self) -> Option<u16> {
        match self {
            Backend::Mysql => Some(3306),
            Backend::Postgres => Some(5432),
            Backend::Sqlite => None,
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(Backend::Mysql),
            "postgres" | "postgresql" => Ok(Backend::Postgres),
            "sqlite" => Ok(Backend::Sqlite),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown backend `{0}` (expected mysql, postgres or sqlite)")]
    UnknownBackend(String),
    #[error("invalid port in {var}: `{value}`")]
    InvalidPort { var: String, value: String },
    #[error("{role} endpoint uses sqlite but no `path` is set")]
    MissingSqlitePath { role: &'static str },
    #[error("{backend} is not supported as a legacy store")]
    UnsupportedLegacyBackend { backend: &'static str },
}

/// Connection settings for one side of the migration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoint {
    pub backend: Backend,
    pub host: String,
    /// Falls back to the backend's well-known port when unset.
    pub port: Option<u16>,
    pub user: String,
    pub password: String,
    pub database: String,
    /// Database file, only read by the sqlite backend.
    pub path: Option<String>,
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            backend: Backend::Mysql,
            host: "127.0.0.1".to_string(),
            port: None,
            user: "admin".to_string(),
            password: String::new(),
            database: "alphagamebot".to_string(),
            path: None,
        }
    }
}

impl Endpoint {
    pub fn effective_port(&self) -> Option<u16> {
        self.port.or_else(|| self.backend.default_port())
    }

    pub fn sqlite_path(&self, role: &'static str) -> Result<&str, ConfigError> {
        self.path
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .ok_or(ConfigError::MissingSqlitePath { role })
    }

    /// Short description for log lines. Never includes the password.
    pub fn describe(&self) -> String {
        match self.backend {
            Backend::Sqlite => format!("sqlite:{}", self.path.as_deref().unwrap_or("<unset>")),
            backend => format!(
                "{}://{}@{}:{}/{}",
                backend.as_str(),
                self.user,
                self.host,
                self.effective_port().unwrap_or_default(),
                self.database
            ),
        }
    }

    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.password.is_empty() {
            copy.password = "***".to_string();
        }
        copy
    }

    fn apply_env<F>(&mut self, prefix: &str, lookup: &F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(format!("{prefix}_{name}").as_str()).filter(|value| !value.trim().is_empty())
        };

        if let Some(backend) = var("BACKEND") {
            self.backend = backend.parse()?;
        }
        if let Some(host) = var("HOST") {
            self.host = host;
        }
        if let Some(port) = var("PORT") {
            let parsed = port.trim().parse().map_err(|_| ConfigError::InvalidPort {
                var: format!("{prefix}_PORT"),
                value: port.clone(),
            })?;
            self.port = Some(parsed);
        }
        if let Some(user) = var("USER") {
            self.user = user;
        }
        if let Some(password) = var("PASSWORD") {
            self.password = password;
        }
        if let Some(database) = var("DATABASE") {
            self.database = database;
        }
        if let Some(path) = var("PATH") {
            self.path = Some(path);
        }
        Ok(())
    }
}

pub fn load_config(path: impl AsRef<Path>) -> anyhow::Result<MigrateConfig> {
    let path = path.as_ref();
    if !path.exists() {
        return MigrateConfig::default()
            .with_env_overrides()
            .context("failed to apply environment overrides");
    }

    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;

    let parsed: MigrateConfig = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;

    parsed
        .with_env_overrides()
        .context("failed to apply environment overrides")
}

impl MigrateConfig {
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    /// Applies `AGB_LEGACY_*` and `AGB_DESTINATION_*` values from `lookup`.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.legacy.apply_env("AGB_LEGACY", &lookup)?;
        self.destination.apply_env("AGB_DESTINATION", &lookup)?;
        Ok(self)
    }

    pub fn redacted(&self) -> Self {
        Self {
            legacy: self.legacy.redacted(),
            destination: self.destination.redacted(),
        }
    }
}
