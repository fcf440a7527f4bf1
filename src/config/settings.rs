//! TOML-based configuration for schemascope.
//!
//! Supports a config file (schemascope.toml) with environment variable expansion.
//!
//! Example configuration:
//! ```toml
//! [data_sources.warehouse]
//! engine = "postgres"
//! host = "db.internal"
//! database = "warehouse"
//! username = "reader"
//! password = "${WAREHOUSE_PASSWORD}"
//!
//! [data_sources.local]
//! engine = "sqlite"
//! path = "./data/local.db"
//!
//! [worker]
//! path = "/usr/local/bin/schemascope-worker"
//! request_timeout = "30s"
//!
//! [pool]
//! max_size = 8
//! acquire_timeout = "5s"
//! max_idle = "10m"
//!
//! [cache]
//! ttl = "5m"
//! persistent = true
//!
//! [engine]
//! request_timeout = "60s"
//! call_timeout = "30s"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::datasource::{ConfigError, DataSourceDescriptor, DataSourceId, Engine};

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Data source not found: {0}")]
    DataSourceNotFound(String),

    #[error("Invalid duration format: {0}")]
    InvalidDuration(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Named data sources.
    pub data_sources: BTreeMap<String, DataSourceSettings>,

    /// Driver worker configuration.
    pub worker: WorkerSettings,

    /// Connection pool configuration.
    pub pool: PoolSettings,

    /// Metadata cache configuration.
    pub cache: CacheSettings,

    /// Introspection engine configuration.
    pub engine: EngineSettings,
}

/// Data source configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DataSourceSettings {
    /// Engine family (mysql, postgres, oracle, sqlserver, sqlite, duckdb).
    pub engine: String,

    /// Server hostname.
    pub host: String,

    /// Server port (engine default when absent).
    pub port: Option<u16>,

    /// Database name.
    pub database: String,

    /// File path for embedded engines (alias for `database`).
    pub path: Option<String>,

    /// Login name.
    pub username: Option<String>,

    /// Password reference (supports ${ENV_VAR} expansion at connect time).
    pub password: Option<String>,

    /// Explicit connection string (supports ${ENV_VAR} expansion).
    pub connection_string: Option<String>,

    /// Extra driver options.
    pub options: BTreeMap<String, String>,
}

impl DataSourceSettings {
    /// Get the engine family.
    pub fn engine_type(&self) -> Result<Engine, ConfigError> {
        self.engine.parse()
    }

    /// Build the immutable descriptor for this entry.
    pub fn to_descriptor(&self, id: &str) -> Result<DataSourceDescriptor, ConfigError> {
        let engine = self.engine_type()?;
        let database = self.path.clone().unwrap_or_else(|| self.database.clone());

        let descriptor = DataSourceDescriptor {
            id: DataSourceId::new(id),
            engine,
            host: self.host.clone(),
            port: self.port,
            database,
            username: self.username.clone(),
            password_ref: self.password.clone(),
            connection_string: self.connection_string.clone(),
            options: self.options.clone(),
            revision: 0,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }
}

/// Driver worker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Path to the worker binary. Networked engines need one.
    pub path: Option<String>,

    /// Extra command-line arguments for the worker.
    pub args: Vec<String>,

    /// Timeout for a single worker round trip (e.g., "30s").
    pub request_timeout: String,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            path: None,
            args: Vec::new(),
            request_timeout: "30s".to_string(),
        }
    }
}

impl WorkerSettings {
    pub fn request_timeout(&self) -> Result<Duration, SettingsError> {
        parse_duration(&self.request_timeout)
    }
}

/// Connection pool settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Maximum number of open connections per data source.
    pub max_size: u32,

    /// How long an acquisition waits for a free slot (e.g., "5s", "0s").
    pub acquire_timeout: String,

    /// Idle connections older than this are closed (e.g., "10m").
    pub max_idle: String,

    /// How often the reaper runs (e.g., "30s").
    pub reap_interval: String,

    /// Ping idle connections before lending them.
    pub test_on_borrow: bool,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_size: 8,
            acquire_timeout: "5s".to_string(),
            max_idle: "10m".to_string(),
            reap_interval: "30s".to_string(),
            test_on_borrow: true,
        }
    }
}

/// Metadata cache settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Time-to-live of a cached result (e.g., "5m").
    pub ttl: String,

    /// Back the in-memory cache with a SQLite file.
    pub persistent: bool,

    /// Location of the SQLite file (defaults to `~/.schemascope/cache.db`).
    pub path: Option<String>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: "5m".to_string(),
            persistent: false,
            path: None,
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Result<Duration, SettingsError> {
        parse_duration(&self.ttl)
    }

    /// Resolved path of the persistent tier.
    pub fn resolved_path(&self) -> Result<Option<PathBuf>, SettingsError> {
        match &self.path {
            Some(p) => Ok(Some(PathBuf::from(expand_env_vars(p)?))),
            None => Ok(None),
        }
    }
}

/// Introspection engine settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Upper bound for one whole request.
    pub request_timeout: String,

    /// Upper bound for one adapter call.
    pub call_timeout: String,

    /// How long shutdown waits for borrowed connections.
    pub drain_timeout: String,

    /// Period of the reaper / cache purge task.
    pub maintenance_interval: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            request_timeout: "60s".to_string(),
            call_timeout: "30s".to_string(),
            drain_timeout: "10s".to_string(),
            maintenance_interval: "30s".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        Ok(settings)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `SCHEMASCOPE_CONFIG`
    /// 2. `./schemascope.toml`
    /// 3. `~/.config/schemascope/config.toml`
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("SCHEMASCOPE_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("schemascope.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("schemascope").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        Ok(Settings::default())
    }

    /// Get a data source entry by name.
    pub fn get_data_source(&self, name: &str) -> Result<&DataSourceSettings, SettingsError> {
        self.data_sources
            .get(name)
            .ok_or_else(|| SettingsError::DataSourceNotFound(name.to_string()))
    }

    /// Build descriptors for every configured data source.
    pub fn descriptors(&self) -> Result<Vec<DataSourceDescriptor>, ConfigError> {
        self.data_sources
            .iter()
            .map(|(id, ds)| ds.to_descriptor(id))
            .collect()
    }

    /// Get the worker binary path, with environment variables expanded.
    pub fn worker_path(&self) -> Result<Option<PathBuf>, SettingsError> {
        match &self.worker.path {
            Some(path) => Ok(Some(PathBuf::from(expand_env_vars(path)?))),
            None => Ok(None),
        }
    }
}

/// Parse a duration string: `"250ms"`, `"30s"`, `"5m"`, `"1h"` or bare seconds.
pub fn parse_duration(s: &str) -> Result<Duration, SettingsError> {
    let s = s.trim();
    let invalid = || SettingsError::InvalidDuration(s.to_string());

    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    if digits.is_empty() {
        return Err(invalid());
    }
    let value: u64 = digits.parse().map_err(|_| invalid())?;

    match unit.trim() {
        "ms" => Ok(Duration::from_millis(value)),
        "" | "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        _ => Err(invalid()),
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }

        let mut var_name = String::new();
        if chars.peek() == Some(&'{') {
            chars.next();
            let mut closed = false;
            for ch in chars.by_ref() {
                if ch == '}' {
                    closed = true;
                    break;
                }
                var_name.push(ch);
            }
            if !closed {
                return Err(SettingsError::InvalidConfig(format!(
                    "unterminated variable reference in '{}'",
                    s
                )));
            }
        } else {
            while let Some(&ch) = chars.peek() {
                if ch.is_alphanumeric() || ch == '_' {
                    var_name.push(ch);
                    chars.next();
                } else {
                    break;
                }
            }
            if var_name.is_empty() {
                // Just a lone $, keep it
                result.push('$');
                continue;
            }
        }

        let value =
            env::var(&var_name).map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
        result.push_str(&value);
    }

    Ok(result)
}
