//! Configuration types for the HTTP service

use crate::errors::ConfigError;
use serde::Deserialize;
use switchyard_core::{AppConfig, Installation, ResponseMode, SigningSecret};

/// Service configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// HTTP server settings
    pub server: ServerConfig,

    /// Webhook intake settings
    pub receiver: ReceiverConfig,

    /// Dispatch settings handed to the app
    pub app: AppConfig,

    /// Stored installations for multi-workspace apps
    pub installations: Vec<Installation>,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl ServiceConfig {
    /// Check the settings that cannot be defaulted.
    ///
    /// # Errors
    ///
    /// - `Missing` when no signing secret is configured
    /// - `Invalid` when an endpoint path is malformed, no endpoint is
    ///   configured, or the API base URL does not parse
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.receiver.validate()?;

        url::Url::parse(&self.app.client.base_url).map_err(|e| ConfigError::Invalid {
            message: format!(
                "app.client.base_url '{}' is not a valid URL: {}",
                self.app.client.base_url, e
            ),
        })?;

        if self.app.token.is_some() && !self.installations.is_empty() {
            return Err(ConfigError::Invalid {
                message: "app.token and installations cannot both be set".to_string(),
            });
        }

        Ok(())
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            shutdown_timeout_seconds: 30,
        }
    }
}

/// Webhook intake configuration
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Paths accepting signed POST requests
    pub endpoints: Vec<String>,

    /// Shared secret used to verify request signatures
    pub signing_secret: String,

    /// Hold the HTTP response until every listener has finished
    pub process_before_response: bool,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["/platform/events".to_string()],
            signing_secret: String::new(),
            process_before_response: false,
        }
    }
}

impl ReceiverConfig {
    pub fn response_mode(&self) -> ResponseMode {
        if self.process_before_response {
            ResponseMode::Deferred
        } else {
            ResponseMode::Immediate
        }
    }

    pub fn signing_secret(&self) -> SigningSecret {
        SigningSecret::new(self.signing_secret.clone())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.signing_secret.is_empty() {
            return Err(ConfigError::Missing {
                key: "receiver.signing_secret".to_string(),
            });
        }

        if self.endpoints.is_empty() {
            return Err(ConfigError::Invalid {
                message: "receiver.endpoints must list at least one path".to_string(),
            });
        }

        for endpoint in &self.endpoints {
            if !endpoint.starts_with('/') {
                return Err(ConfigError::Invalid {
                    message: format!("endpoint '{}' must start with '/'", endpoint),
                });
            }
            if endpoint == "/health" {
                return Err(ConfigError::Invalid {
                    message: "endpoint '/health' is reserved for health checks".to_string(),
                });
            }
        }

        Ok(())
    }
}

impl std::fmt::Debug for ReceiverConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiverConfig")
            .field("endpoints", &self.endpoints)
            .field("signing_secret", &"<REDACTED>")
            .field("process_before_response", &self.process_before_response)
            .finish()
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level
    pub level: String,

    /// Enable JSON structured logging
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
