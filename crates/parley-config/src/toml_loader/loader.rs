//! Read and parse the TOML config.

use crate::schema::ParleyConfig;
use crate::validation;
use parley_common::ConfigError;
use std::path::Path;
use tracing::{debug, info, warn};

use super::paths::{create_default_config, default_config_path};

/// Parse the config at `path`. Missing fields take their defaults.
///
/// Out-of-range values are logged, not rejected; callers that need a hard
/// failure run [`validation::validate`] themselves.
pub fn load_from_path(path: &Path) -> Result<ParleyConfig, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::FileNotFound(path.to_path_buf()))
        }
        Err(e) => {
            return Err(ConfigError::ParseError(format!(
                "cannot read {}: {e}",
                path.display()
            )))
        }
    };

    let config: ParleyConfig = toml::from_str(&content)
        .map_err(|e| ConfigError::ParseError(format!("{}: {e}", path.display())))?;

    if let Err(e) = validation::validate(&config) {
        warn!(path = %path.display(), "config has invalid values: {e}");
    }
    debug!(path = %path.display(), "config loaded");
    Ok(config)
}

/// Load the config from [`default_config_path`], writing the commented
/// template first if no file exists yet.
pub fn load_default() -> Result<ParleyConfig, ConfigError> {
    let path = default_config_path()?;
    match load_from_path(&path) {
        Err(ConfigError::FileNotFound(_)) => {
            info!(path = %path.display(), "no config file, using defaults");
            create_default_config(&path)?;
            Ok(ParleyConfig::default())
        }
        other => other,
    }
}
