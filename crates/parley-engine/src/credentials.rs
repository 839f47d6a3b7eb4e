//! Bearer credentials for the chat API.
//!
//! Token acquisition lives outside the engine; the backend asks a provider
//! for the current token on every request so a refreshed value is picked up.

use std::fmt;

/// Supplies the bearer token attached to outgoing requests.
pub trait CredentialProvider: Send + Sync {
    /// `None` sends the request without an `Authorization` header.
    fn bearer_token(&self) -> Option<String>;
}

/// A fixed token, or none at all.
#[derive(Clone, Default)]
pub struct StaticToken {
    token: Option<String>,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticToken")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl CredentialProvider for StaticToken {
    fn bearer_token(&self) -> Option<String> {
        self.token.clone()
    }
}

/// Reads the token from an environment variable at request time.
#[derive(Debug, Clone)]
pub struct EnvToken {
    var: String,
}

impl EnvToken {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }

    pub fn var(&self) -> &str {
        &self.var
    }
}

impl CredentialProvider for EnvToken {
    fn bearer_token(&self) -> Option<String> {
        std::env::var(&self.var)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_token_debug_is_redacted() {
        let token = StaticToken::new("secret-value");
        let debug = format!("{token:?}");
        assert!(!debug.contains("secret-value"));
        assert!(debug.contains("REDACTED"));
        assert_eq!(token.bearer_token().as_deref(), Some("secret-value"));
    }

    #[test]
    fn anonymous_has_no_token() {
        assert_eq!(StaticToken::anonymous().bearer_token(), None);
    }

    #[test]
    fn env_token_reads_at_call_time() {
        let var = format!("PARLEY_TEST_TOKEN_{}", std::process::id());
        let provider = EnvToken::new(&var);
        std::env::remove_var(&var);
        assert_eq!(provider.bearer_token(), None);

        std::env::set_var(&var, "  abc  ");
        assert_eq!(provider.bearer_token().as_deref(), Some("abc"));

        std::env::set_var(&var, "");
        assert_eq!(provider.bearer_token(), None);
        std::env::remove_var(&var);
    }
}
