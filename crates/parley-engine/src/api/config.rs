//! HTTP client configuration.

use std::time::Duration;

/// Connection settings for [`HttpBackend`](super::HttpBackend).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// API root, e.g. `http://localhost:8000`. A trailing slash is ignored.
    pub base_url: String,
    pub connect_timeout: Duration,
    /// Applies to REST calls only; streams are bounded by `max_stream_duration`.
    pub request_timeout: Duration,
    pub max_stream_duration: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            max_stream_duration: Duration::from_secs(300),
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_stream_duration(mut self, limit: Duration) -> Self {
        self.max_stream_duration = limit;
        self
    }

    pub(crate) fn root(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}
