use serde::Deserialize;
use std::path::Path;

/// Root targeting configuration. Loaded from an optional TOML file and
/// environment variables with the prefix `TARGETING__`.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetingConfig {
    #[serde(default = "default_rules_path")]
    pub rules_path: String,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub scopes: ScopeConfig,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process-local, lost on restart.
    Session,
    /// Durable SQLite table.
    Sqlite,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Session => f.write_str("session"),
            Self::Sqlite => f.write_str("sqlite"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
    #[serde(default = "default_table_name")]
    pub table_name: String,
}

/// Logical scope names used when persisting rule matches.
#[derive(Debug, Clone, Deserialize)]
pub struct ScopeConfig {
    #[serde(default = "default_session_scope")]
    pub session: String,
    #[serde(default = "default_persistent_scope")]
    pub persistent: String,
}

// Default functions
fn default_rules_path() -> String {
    "rules.json".to_string()
}
fn default_backend() -> StorageBackend {
    StorageBackend::Sqlite
}
fn default_sqlite_path() -> String {
    "targeting.db".to_string()
}
fn default_table_name() -> String {
    "targeting_storage".to_string()
}
fn default_session_scope() -> String {
    "session".to_string()
}
fn default_persistent_scope() -> String {
    "persistent".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            sqlite_path: default_sqlite_path(),
            table_name: default_table_name(),
        }
    }
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            session: default_session_scope(),
            persistent: default_persistent_scope(),
        }
    }
}

impl Default for TargetingConfig {
    fn default() -> Self {
        Self {
            rules_path: default_rules_path(),
            storage: StorageConfig::default(),
            scopes: ScopeConfig::default(),
        }
    }
}

impl TargetingConfig {
    /// Load configuration from an optional TOML file, then environment
    /// variables (`TARGETING__STORAGE__BACKEND=session`, ...).
    pub fn load(file: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let builder = builder.add_source(
            config::Environment::with_prefix("TARGETING")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
