//! Full configuration validation.
//!
//! Checks numeric ranges and endpoint formats, collecting every problem
//! into a single `ConfigError`.

mod helpers;


use crate::schema::ParleyConfig;
use parley_common::ConfigError;

use helpers::{validate_range, validate_range_f64};

/// Run all validations on a config, collecting all errors.
pub fn validate(config: &ParleyConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    validate_api(&mut errors, config);
    validate_generation(&mut errors, config);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(errors.join("; ")))
    }
}

fn validate_api(errors: &mut Vec<String>, config: &ParleyConfig) {
    let api = &config.api;
    if !(api.base_url.starts_with("http://") || api.base_url.starts_with("https://")) {
        errors.push(format!(
            "api.base_url = {:?} must start with http:// or https://",
            api.base_url
        ));
    }
    validate_range(errors, "api.connect_timeout_secs", api.connect_timeout_secs, 1, 300);
    validate_range(errors, "api.request_timeout_secs", api.request_timeout_secs, 1, 600);
    validate_range(errors, "api.max_stream_secs", api.max_stream_secs, 1, 86_400);
}

fn validate_generation(errors: &mut Vec<String>, config: &ParleyConfig) {
    let generation = &config.generation;
    if generation.model.trim().is_empty() {
        errors.push("generation.model must not be empty".into());
    }
    validate_range(errors, "generation.output_length", generation.output_length, 1, 32_768);
    validate_range_f64(errors, "generation.temperature", generation.temperature, 0.0, 2.0);
    validate_range_f64(errors, "generation.top_p", generation.top_p, 0.0, 1.0);
    validate_range(errors, "generation.top_k", generation.top_k, 1, 1000);
    validate_range_f64(
        errors,
        "generation.repetition_penalty",
        generation.repetition_penalty,
        0.5,
        2.0,
    );
}
