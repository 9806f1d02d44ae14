//! Per-event execution context.
//!
//! A [`Context`] is built once per event, after authorization, and shared by
//! reference with every middleware and listener that handles the event. Its
//! base (credentials, source, request metadata) is immutable. Middleware may
//! attach extra values through the extension map.
//!
//! Extension writes are visible to every task handling the same event,
//! including sibling listeners running concurrently. The map is locked only
//! for the duration of a single `get` or `set`; that keeps each call memory
//! safe but gives no ordering between listeners. Two listeners writing the
//! same key is a bug in those listeners.

use crate::authorization::AuthorizationResult;
use crate::source::Source;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use uuid::Uuid;

/// Context key under which message, event type and command pattern captures are stored.
pub const MATCHES_KEY: &str = "matches";
/// Captures of an `action_id` constraint pattern.
pub const ACTION_ID_MATCHES_KEY: &str = "action_id_matches";
/// Captures of a `block_id` constraint pattern.
pub const BLOCK_ID_MATCHES_KEY: &str = "block_id_matches";
/// Captures of a `callback_id` constraint pattern.
pub const CALLBACK_ID_MATCHES_KEY: &str = "callback_id_matches";

/// Metadata about the HTTP request that delivered the event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMeta {
    /// Correlation id assigned on receipt
    pub request_id: Uuid,
    pub received_at: DateTime<Utc>,
    /// Delivery attempt reported by the platform for re-sent events
    pub retry_num: Option<u32>,
    pub retry_reason: Option<String>,
}

impl RequestMeta {
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            received_at: Utc::now(),
            retry_num: None,
            retry_reason: None,
        }
    }
}

impl Default for RequestMeta {
    fn default() -> Self {
        Self::new()
    }
}

/// Execution context of one event.
#[derive(Debug)]
pub struct Context {
    authorization: AuthorizationResult,
    source: Source,
    request: RequestMeta,
    extensions: RwLock<HashMap<String, Value>>,
}

impl Context {
    pub fn new(authorization: AuthorizationResult, source: Source, request: RequestMeta) -> Self {
        Self {
            authorization,
            source,
            request,
            extensions: RwLock::new(HashMap::new()),
        }
    }

    pub fn authorization(&self) -> &AuthorizationResult {
        &self.authorization
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn request(&self) -> &RequestMeta {
        &self.request
    }

    pub fn bot_id(&self) -> Option<&str> {
        self.authorization.bot_id.as_deref()
    }

    pub fn bot_user_id(&self) -> Option<&str> {
        self.authorization.bot_user_id.as_deref()
    }

    /// Token outbound calls are made with.
    pub fn token(&self) -> Option<&str> {
        self.authorization.selected_token()
    }

    /// Read an extension value.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.extensions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Attach or replace an extension value. Entries are never removed.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.extensions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.extensions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Snapshot of all extension keys.
    pub fn extension_keys(&self) -> Vec<String> {
        self.extensions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;
