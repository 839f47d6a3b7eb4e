//! Parley configuration system.
//!
//! TOML-based configuration for the API endpoint, default generation
//! parameters, and logging. Every section uses serde defaults so partial
//! files (or no file at all) work out of the box.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use parley_config::{load_config, config_to_json};
//!
//! let config = load_config().expect("failed to load config");
//! println!("{}", config_to_json(&config));
//! ```

pub mod schema;
pub mod toml_loader;
pub mod validation;

pub use schema::{
    ApiConfig, GenerationConfig, LogLevel, LoggingConfig, ParleyConfig, CONFIG_SCHEMA_VERSION,
};
pub use toml_loader::{
    create_default_config, default_config_path, load_default, load_from_path, CONFIG_PATH_ENV,
};

use parley_common::ConfigError;
use std::path::Path;

/// Load config from the platform default path.
///
/// Creates a commented default file if none exists. Out-of-range values
/// are logged and kept; see [`validation::validate`].
pub fn load_config() -> Result<ParleyConfig, ConfigError> {
    toml_loader::load_default()
}

/// Load config from an explicit path, falling back to the default
/// location when `path` is `None`.
pub fn load_config_from(path: Option<&Path>) -> Result<ParleyConfig, ConfigError> {
    match path {
        Some(path) => toml_loader::load_from_path(path),
        None => load_config(),
    }
}

/// Serialize a config to a pretty-printed JSON string.
pub fn config_to_json(config: &ParleyConfig) -> String {
    serde_json::to_string_pretty(config)
        .unwrap_or_else(|e| format!("{{\"error\": \"failed to serialize config: {e}\"}}"))
}
