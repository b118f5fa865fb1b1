//! Configuration management for the server.

use std::env;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Shared secret clients append to their bearer token. Unset means
    /// anonymous access is allowed and tokens are not checked.
    pub auth_secret: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let auth_secret = match env::var("AUTH_SECRET") {
            Ok(secret) if secret.is_empty() => return Err(ConfigError::EmptyAuthSecret),
            Ok(secret) => Some(secret),
            Err(_) => None,
        };

        Ok(Self {
            host,
            port,
            auth_secret,
        })
    }

    /// Configuration with a secret, for tests and embedding.
    pub fn with_auth_secret(mut self, secret: impl Into<String>) -> Self {
        self.auth_secret = Some(secret.into());
        self
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("AUTH_SECRET must not be empty when set")]
    EmptyAuthSecret,
}
