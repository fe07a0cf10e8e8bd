use crate::database::DatabaseType;
use crate::llm::LlmConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    #[serde(rename = "trace")]
    Trace,
    #[serde(rename = "debug")]
    Debug,
    #[serde(rename = "info")]
    Info,
    #[serde(rename = "warn")]
    #[default]
    Warn,
    #[serde(rename = "error")]
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,
    #[serde(default = "default_console_output")]
    pub console: bool,
    /// Append logs to this file when set
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: LogLevel::default(),
            console: default_console_output(),
            file: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Csv,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,
    /// Rows printed to the terminal; exports always contain every row
    #[serde(default = "default_max_rows_displayed")]
    pub max_rows_displayed: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            format: OutputFormat::default(),
            max_rows_displayed: default_max_rows_displayed(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub mysql_url: Option<String>,
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default)]
    pub mongodb_url: Option<String>,
    #[serde(default = "default_database_type")]
    pub default_type: DatabaseType,
    #[serde(default = "default_server_selection_timeout")]
    pub mongodb_server_selection_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            mysql_url: None,
            postgres_url: None,
            mongodb_url: None,
            default_type: default_database_type(),
            mongodb_server_selection_timeout_secs: default_server_selection_timeout(),
        }
    }
}

impl DatabaseConfig {
    /// Configured connection URL for a database type
    pub fn url_for(&self, database_type: DatabaseType) -> Option<&str> {
        match database_type {
            DatabaseType::MySQL => self.mysql_url.as_deref(),
            DatabaseType::PostgreSQL => self.postgres_url.as_deref(),
            DatabaseType::MongoDB => self.mongodb_url.as_deref(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

fn default_console_output() -> bool {
    true
}

fn default_max_rows_displayed() -> usize {
    100
}

fn default_database_type() -> DatabaseType {
    DatabaseType::MySQL
}

fn default_server_selection_timeout() -> u64 {
    5
}

/// Environment variables read on top of the file, first match wins
const ENDPOINT_VARS: &[&str] = &["NLQUERY_LLM_ENDPOINT", "ENDPOINT_URL"];
const DEPLOYMENT_VARS: &[&str] = &["NLQUERY_LLM_DEPLOYMENT", "DEPLOYMENT_NAME"];
pub const LOG_ENV_VAR: &str = "NLQUERY_LOG";

/// `~/.config/nlquery/config.toml` on Linux, the platform equivalent elsewhere
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("nlquery").join("config.toml"))
}

impl Config {
    /// Load from `path`, or the default location; a missing file yields defaults
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path.map(Path::to_path_buf).or_else(default_config_path) {
            Some(path) if path.exists() => Self::from_file(&path)?,
            Some(path) => {
                debug!("Config file {} not found, using defaults", path.display());
                Config::default()
            }
            None => Config::default(),
        };
        config.apply_env_overrides_with(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Let environment variables replace file values
    pub fn apply_env_overrides_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |names: &[&str]| {
            names
                .iter()
                .find_map(|name| lookup(*name).filter(|v| !v.is_empty()))
        };

        if let Some(endpoint) = first(ENDPOINT_VARS) {
            self.llm.endpoint = Some(endpoint);
        }
        if let Some(deployment) = first(DEPLOYMENT_VARS) {
            self.llm.deployment = Some(deployment);
        }
        if let Some(url) = first(&["NLQUERY_MYSQL_URL"]) {
            self.database.mysql_url = Some(url);
        }
        if let Some(url) = first(&["NLQUERY_POSTGRES_URL"]) {
            self.database.postgres_url = Some(url);
        }
        if let Some(url) = first(&["NLQUERY_MONGODB_URL"]) {
            self.database.mongodb_url = Some(url);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_with(|name| std::env::var(name).ok())
    }

    pub fn validate_with<F>(&self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.llm.validate_with(lookup).map_err(ConfigError::Invalid)?;

        if self.database.mongodb_server_selection_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "database.mongodb_server_selection_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.output.max_rows_displayed == 0 {
            return Err(ConfigError::Invalid(
                "output.max_rows_displayed must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
