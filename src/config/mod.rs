//! Configuration module for schemascope.
//!
//! Handles data source descriptors, environment variables, and settings.

mod datasource;
mod settings;
mod sources;

pub use datasource::{ConfigError, DataSourceDescriptor, DataSourceId, Engine};
pub use settings::{
    expand_env_vars, parse_duration, CacheSettings, DataSourceSettings, EngineSettings,
    PoolSettings, Settings, SettingsError, WorkerSettings,
};
pub use sources::{DataSourceCatalog, DataSourceProvider};
