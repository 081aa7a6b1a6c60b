use std::path::Path;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

use crate::schema::{
    RedefinitionPolicy, SchemaNames, DEFAULT_BASE_HISTORY_SCHEMA, DEFAULT_BASE_SCHEMA,
    DEFAULT_TRANSLATION_HISTORY_SCHEMA, DEFAULT_TRANSLATION_SCHEMA,
};

pub const ENV_PREFIX: &str = "DBACCESS";

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct DbAccessConfig {
    pub database: Database,
    #[serde(default)]
    pub schemas: Schemas,
    #[serde(default)]
    pub ingest: Ingest,
    #[serde(default)]
    pub registry: Registry,
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct Database {
    pub dsn: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    // 0 leaves the server default in place
    #[serde(default)]
    pub statement_timeout_ms: u64,
}

fn default_max_connections() -> u32 {
    16
}

fn default_min_connections() -> u32 {
    1
}

fn default_idle_timeout_ms() -> u64 {
    30000
}

impl Default for Database {
    fn default() -> Self {
        Self {
            dsn: String::new(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            idle_timeout_ms: default_idle_timeout_ms(),
            statement_timeout_ms: 0,
        }
    }
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(default)]
pub struct Schemas {
    pub base: String,
    pub translation: String,
    pub base_history: String,
    pub translation_history: String,
}

impl Default for Schemas {
    fn default() -> Self {
        Self {
            base: DEFAULT_BASE_SCHEMA.to_string(),
            translation: DEFAULT_TRANSLATION_SCHEMA.to_string(),
            base_history: DEFAULT_BASE_HISTORY_SCHEMA.to_string(),
            translation_history: DEFAULT_TRANSLATION_HISTORY_SCHEMA.to_string(),
        }
    }
}

impl Schemas {
    pub fn names(&self) -> Result<SchemaNames, ConfigError> {
        SchemaNames::new(
            &self.base,
            &self.translation,
            &self.base_history,
            &self.translation_history,
        )
        .map_err(|e| ConfigError::Message(e.to_string()))
    }
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(default)]
pub struct Ingest {
    pub batch_size: usize,
    pub timeout_secs: u64,
}

impl Default for Ingest {
    fn default() -> Self {
        Self {
            batch_size: 10000,
            timeout_secs: 600,
        }
    }
}

#[derive(Deserialize, Debug, PartialEq, Eq, Default, Clone)]
#[serde(default)]
pub struct Registry {
    pub allow_redefinition: bool,
}

impl Registry {
    pub fn policy(&self) -> RedefinitionPolicy {
        if self.allow_redefinition {
            RedefinitionPolicy::Replace
        } else {
            RedefinitionPolicy::Reject
        }
    }
}

pub fn validate_config(config: DbAccessConfig) -> Result<DbAccessConfig, ConfigError> {
    if config.database.dsn.trim().is_empty() {
        return Err(ConfigError::Message(
            "database.dsn must not be empty".to_string(),
        ));
    }

    if config.database.max_connections == 0 {
        return Err(ConfigError::Message(
            "database.max_connections must be greater than 0".to_string(),
        ));
    }

    if config.database.max_connections < config.database.min_connections {
        return Err(ConfigError::Message(format!(
            "database.max_connections ({}) is lower than database.min_connections ({})",
            config.database.max_connections, config.database.min_connections
        )));
    }

    if config.ingest.batch_size == 0 {
        return Err(ConfigError::Message(
            "ingest.batch_size must be greater than 0".to_string(),
        ));
    }

    config.schemas.names()?;

    Ok(config)
}

pub fn load_config(path: &Path) -> Result<DbAccessConfig, ConfigError> {
    let path = path
        .to_str()
        .ok_or_else(|| ConfigError::Message(format!("Invalid config path {path:?}")))?;

    let config = Config::builder()
        .add_source(File::with_name(path))
        .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    config.build()?.try_deserialize().and_then(validate_config)
}

// Load a config from a string (to test our structs are defined correctly)
pub fn load_config_from_string(
    config_str: &str,
    skip_validation: bool,
) -> Result<DbAccessConfig, ConfigError> {
    let config =
        Config::builder().add_source(File::from_str(config_str, FileFormat::Toml));

    if skip_validation {
        config.build()?.try_deserialize()
    } else {
        config.build()?.try_deserialize().and_then(validate_config)
    }
}
