//! Chat API endpoint configuration.

use serde::{Deserialize, Serialize};

/// Where the chat backend lives and how long requests may take.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    /// TCP connect timeout in seconds (valid range: 1-300).
    pub connect_timeout_secs: u32,
    /// Timeout for non-streaming REST calls in seconds (valid range: 1-600).
    pub request_timeout_secs: u32,
    /// Upper bound on one streamed response in seconds (valid range: 1-86400).
    pub max_stream_secs: u32,
    /// Environment variable holding the bearer token.
    pub token_env: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".into(),
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
            max_stream_secs: 300,
            token_env: "PARLEY_TOKEN".into(),
        }
    }
}
