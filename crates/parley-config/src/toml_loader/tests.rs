//! Tests for TOML config loading, creation, and path resolution.

use super::*;
use crate::schema::LogLevel;
use parley_common::ConfigError;
use std::path::Path;

#[test]
fn load_from_nonexistent_returns_file_not_found() {
    let result = load_from_path(Path::new("/tmp/nonexistent_parley_config.toml"));
    assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
}

#[test]
fn load_valid_partial_toml() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[api]
base_url = "https://chat.example.com"

[generation]
temperature = 0.2
"#,
    )
    .unwrap();

    let config = load_from_path(&path).unwrap();
    assert_eq!(config.api.base_url, "https://chat.example.com");
    assert_eq!(config.generation.temperature, 0.2);
    // Defaults preserved
    assert_eq!(config.api.max_stream_secs, 300);
    assert_eq!(config.generation.model, "typhoon-v1.5-instruct");
    assert_eq!(config.logging.level, LogLevel::Info);
}

#[test]
fn load_invalid_toml_returns_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "this is not valid toml {{{").unwrap();

    let result = load_from_path(&path);
    assert!(matches!(result, Err(ConfigError::ParseError(_))));
}

#[test]
fn out_of_range_values_are_kept_with_a_warning() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[generation]\ntemperature = 9.5\n").unwrap();

    let config = load_from_path(&path).unwrap();
    assert_eq!(config.generation.temperature, 9.5);
}

#[test]
fn log_level_parses_uppercase() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[logging]\nlevel = \"DEBUG\"\n").unwrap();

    let config = load_from_path(&path).unwrap();
    assert_eq!(config.logging.level, LogLevel::Debug);
    assert_eq!(config.logging.level.as_directive(), "parley=debug");
}

#[test]
fn create_and_load_default_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("parley").join("config.toml");

    create_default_config(&path).unwrap();
    assert!(path.exists());

    let config = load_from_path(&path).unwrap();
    assert_eq!(config.api.base_url, "http://localhost:8000");
    assert_eq!(config.generation.top_k, 50);
}

#[test]
fn default_config_toml_is_valid() {
    use super::template::default_config_toml;
    use crate::schema::ParleyConfig;

    let config: ParleyConfig = toml::from_str(&default_config_toml()).unwrap();
    assert_eq!(config.api.token_env, "PARLEY_TOKEN");
    assert!(crate::validation::validate(&config).is_ok());
}

#[test]
fn default_config_path_is_reasonable() {
    if let Ok(path) = default_config_path() {
        let path_str = path.to_string_lossy();
        assert!(path_str.contains("parley"));
        assert!(path_str.ends_with("config.toml"));
    }
}
