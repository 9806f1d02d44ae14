//! Outbound platform API client.
//!
//! The dispatcher only needs three capabilities from the platform: post a
//! message, look up the bot identity behind a token, and answer through a
//! `response_url`. They are expressed by the [`ApiClient`] trait so the
//! transport can be replaced in tests; [`HttpApiClient`] is the reqwest-backed
//! implementation used in production.

use crate::error::ApiError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

// ============================================================================
// Wire Types
// ============================================================================

/// Message body accepted by `chat.postMessage` and `response_url` posts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocks: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,

    /// `in_channel` or `ephemeral` for `response_url` posts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace_original: Option<bool>,
}

impl Message {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn with_blocks(mut self, blocks: Value) -> Self {
        self.blocks = Some(blocks);
        self
    }

    pub fn in_thread(mut self, thread_ts: impl Into<String>) -> Self {
        self.thread_ts = Some(thread_ts.into());
        self
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Self::text(text)
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Self::text(text)
    }
}

/// Identity behind a token, as reported by `auth.test`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthTestResponse {
    pub user_id: String,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub team_id: Option<String>,
    #[serde(default)]
    pub enterprise_id: Option<String>,
}

/// Result of `chat.postMessage`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PostMessageResponse {
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub ts: Option<String>,
}

// ============================================================================
// Client Trait
// ============================================================================

/// Capability used to call back into the platform.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Post a message to a conversation.
    async fn post_message(
        &self,
        channel: &str,
        message: &Message,
    ) -> Result<PostMessageResponse, ApiError>;

    /// Resolve the identity behind this client's token.
    async fn auth_test(&self) -> Result<AuthTestResponse, ApiError>;

    /// Post a message to a `response_url` handed out with an interaction.
    async fn post_response(&self, response_url: &str, message: &Message) -> Result<(), ApiError>;
}

/// Creates one client per credential.
pub trait ClientFactory: Send + Sync {
    /// Build a client authenticating with `token`. `None` yields an anonymous client.
    fn create(&self, token: Option<&str>) -> Result<Arc<dyn ApiClient>, ApiError>;
}

// ============================================================================
// HTTP Client
// ============================================================================

/// Connection settings for [`HttpApiClient`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    /// Base URL of the platform Web API; method names are appended to it.
    pub base_url: String,

    /// Request timeout in seconds
    pub timeout_seconds: u64,

    /// User agent sent with every request
    pub user_agent: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8090/api/".to_string(),
            timeout_seconds: 30,
            user_agent: format!("switchyard/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ClientOptions {
    /// Parse the base URL, making sure it ends with a slash so that joins append.
    pub fn parsed_base_url(&self) -> Result<Url, ApiError> {
        let mut raw = self.base_url.clone();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        Url::parse(&raw).map_err(|e| ApiError::Configuration {
            message: format!("Invalid API base URL '{}': {}", self.base_url, e),
        })
    }
}

/// reqwest-backed [`ApiClient`].
#[derive(Clone)]
pub struct HttpApiClient {
    http_client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpApiClient {
    /// Build a client for `token`.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Configuration` if the base URL is invalid or the HTTP
    /// client cannot be created.
    pub fn new(token: Option<String>, options: &ClientOptions) -> Result<Self, ApiError> {
        let base_url = options.parsed_base_url()?;
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(options.timeout_seconds))
            .user_agent(&options.user_agent)
            .build()
            .map_err(|e| ApiError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            http_client,
            base_url,
            token,
        })
    }

    async fn call_method<T: DeserializeOwned>(
        &self,
        method: &str,
        arguments: Value,
    ) -> Result<T, ApiError> {
        let url = self
            .base_url
            .join(method)
            .map_err(|e| ApiError::Configuration {
                message: format!("Invalid API method '{}': {}", method, e),
            })?;

        let mut request = self.http_client.post(url).json(&arguments);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ApiError::HttpError {
                status: status.as_u16(),
                message,
            });
        }

        let envelope: Value = response.json().await?;
        if envelope.get("ok").and_then(Value::as_bool) != Some(true) {
            let error = envelope
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown_error")
                .to_string();
            return Err(ApiError::Platform {
                method: method.to_string(),
                error,
            });
        }

        Ok(serde_json::from_value(envelope)?)
    }
}

impl std::fmt::Debug for HttpApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpApiClient")
            .field("base_url", &self.base_url.as_str())
            .field("token", &self.token.as_ref().map(|_| "<REDACTED>"))
            .finish()
    }
}

#[async_trait]
impl ApiClient for HttpApiClient {
    #[instrument(skip(self, message))]
    async fn post_message(
        &self,
        channel: &str,
        message: &Message,
    ) -> Result<PostMessageResponse, ApiError> {
        let mut arguments = serde_json::to_value(message)?;
        if let Value::Object(fields) = &mut arguments {
            fields.insert("channel".to_string(), Value::String(channel.to_string()));
        }
        let response: PostMessageResponse = self.call_method("chat.postMessage", arguments).await?;
        debug!(ts = ?response.ts, "Message posted");
        Ok(response)
    }

    #[instrument(skip(self))]
    async fn auth_test(&self) -> Result<AuthTestResponse, ApiError> {
        self.call_method("auth.test", Value::Object(Default::default()))
            .await
    }

    #[instrument(skip(self, message))]
    async fn post_response(&self, response_url: &str, message: &Message) -> Result<(), ApiError> {
        let response = self
            .http_client
            .post(response_url)
            .json(message)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ApiError::HttpError {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            })
        }
    }
}

/// [`ClientFactory`] producing [`HttpApiClient`]s that share one set of options.
#[derive(Debug, Clone, Default)]
pub struct HttpClientFactory {
    options: ClientOptions,
}

impl HttpClientFactory {
    pub fn new(options: ClientOptions) -> Self {
        Self { options }
    }
}

impl ClientFactory for HttpClientFactory {
    fn create(&self, token: Option<&str>) -> Result<Arc<dyn ApiClient>, ApiError> {
        let client = HttpApiClient::new(token.map(str::to_string), &self.options)?;
        Ok(Arc::new(client))
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
