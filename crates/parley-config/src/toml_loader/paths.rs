//! Config path resolution and default file creation.

use parley_common::ConfigError;
use std::path::{Path, PathBuf};
use tracing::info;

use super::template::default_config_toml;

/// Overrides the default config location when set and non-empty.
pub const CONFIG_PATH_ENV: &str = "PARLEY_CONFIG";

/// `$PARLEY_CONFIG`, else `<config dir>/parley/config.toml`.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV).filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    dirs::config_dir()
        .map(|dir| dir.join("parley").join("config.toml"))
        .ok_or_else(|| ConfigError::ParseError("no platform config directory".into()))
}

/// Write the commented template to `path`, creating parent directories.
pub fn create_default_config(path: &Path) -> Result<(), ConfigError> {
    let io_err = |what: &str, e: std::io::Error| {
        ConfigError::ParseError(format!("{what} {}: {e}", path.display()))
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| io_err("cannot create directory for", e))?;
    }
    std::fs::write(path, default_config_toml()).map_err(|e| io_err("cannot write", e))?;

    info!(path = %path.display(), "wrote default config");
    Ok(())
}
