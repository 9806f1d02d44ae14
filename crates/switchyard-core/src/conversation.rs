//! Conversation state.
//!
//! [`conversation_context`] is a global middleware that loads the state stored
//! for the event's conversation into the context key [`CONVERSATION_KEY`]
//! before the listeners run, and writes it back afterwards when a listener
//! replaced it.

use crate::args::EventArgs;
use crate::error::ConversationError;
use crate::middleware::{ListenerResult, Middleware, Next};
use crate::verification::{Clock, SystemClock};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Context key holding the conversation state.
pub const CONVERSATION_KEY: &str = "conversation";

/// Storage for per-conversation state.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Store `value`, optionally expiring at `expires_at`.
    async fn set(
        &self,
        conversation_id: &str,
        value: Value,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), ConversationError>;

    /// Load the state of a conversation. Missing and expired entries are `None`.
    async fn get(&self, conversation_id: &str) -> Result<Option<Value>, ConversationError>;

    /// Current time as the store sees it; expiry times are computed from it.
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone)]
struct StoredConversation {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

/// In-process conversation store.
pub struct MemoryConversationStore {
    entries: RwLock<HashMap<String, StoredConversation>>,
    clock: Arc<dyn Clock>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }
}

impl Default for MemoryConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn set(
        &self,
        conversation_id: &str,
        value: Value,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), ConversationError> {
        self.entries.write().await.insert(
            conversation_id.to_string(),
            StoredConversation { value, expires_at },
        );
        Ok(())
    }

    async fn get(&self, conversation_id: &str) -> Result<Option<Value>, ConversationError> {
        let now = self.clock.now();
        {
            let entries = self.entries.read().await;
            match entries.get(conversation_id) {
                None => return Ok(None),
                Some(entry) if entry.expires_at.map_or(true, |at| at > now) => {
                    return Ok(Some(entry.value.clone()));
                }
                Some(_) => {}
            }
        }

        // Expired: drop it so the map does not keep growing.
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(conversation_id) {
            if entry.expires_at.is_some_and(|at| at <= now) {
                entries.remove(conversation_id);
            }
        }
        Ok(None)
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

struct ConversationContext {
    store: Arc<dyn ConversationStore>,
    time_to_live: Option<Duration>,
}

#[async_trait]
impl Middleware for ConversationContext {
    async fn handle(&self, args: &EventArgs, next: Next<'_>) -> ListenerResult {
        let Some(conversation_id) = args.context().source().conversation_id.clone() else {
            debug!("No conversation id for incoming event");
            return next.run().await;
        };

        let loaded = self.store.get(&conversation_id).await?;
        if let Some(state) = &loaded {
            args.context().set(CONVERSATION_KEY, state.clone());
        }

        next.run().await?;

        let current = args.context().get(CONVERSATION_KEY);
        if let Some(state) = current.filter(|state| Some(state) != loaded.as_ref()) {
            let expires_at = self.time_to_live.map(|ttl| self.store.now() + ttl);
            self.store.set(&conversation_id, state, expires_at).await?;
            debug!(conversation_id = %conversation_id, "Conversation state updated");
        }
        Ok(())
    }
}

/// Global middleware keeping conversation state in `store`.
pub fn conversation_context(store: Arc<dyn ConversationStore>) -> Arc<dyn Middleware> {
    Arc::new(ConversationContext {
        store,
        time_to_live: None,
    })
}

/// Like [`conversation_context`], with every write expiring after `time_to_live`.
pub fn conversation_context_with_ttl(
    store: Arc<dyn ConversationStore>,
    time_to_live: Duration,
) -> Arc<dyn Middleware> {
    Arc::new(ConversationContext {
        store,
        time_to_live: Some(time_to_live),
    })
}

/// Read the loaded conversation state as `T`.
pub fn conversation_state<T: DeserializeOwned>(
    args: &EventArgs,
) -> Result<Option<T>, ConversationError> {
    args.context()
        .get(CONVERSATION_KEY)
        .map(serde_json::from_value)
        .transpose()
        .map_err(ConversationError::from)
}

/// Replace the conversation state; it is persisted once the listeners finish.
pub fn update_conversation<T: Serialize>(
    args: &EventArgs,
    state: &T,
) -> Result<(), ConversationError> {
    args.context().set(CONVERSATION_KEY, serde_json::to_value(state)?);
    Ok(())
}

#[cfg(test)]
#[path = "conversation_tests.rs"]
mod tests;
