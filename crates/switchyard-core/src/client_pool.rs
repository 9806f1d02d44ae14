//! Per-credential client cache.
//!
//! One [`ApiClient`] is kept per (team id, token) pair for the lifetime of the
//! process. Entries are never evicted.

use crate::client::{ApiClient, ClientFactory};
use crate::error::ApiError;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

type PoolKey = (String, String);

/// Lazily populated cache of API clients keyed by team and token.
///
/// Lookups take a read lock only. A miss builds the client outside any lock
/// and then inserts it if the key is still vacant, so two requests racing on
/// the same key both succeed and share whichever client landed first.
pub struct ClientPool {
    factory: Arc<dyn ClientFactory>,
    clients: RwLock<HashMap<PoolKey, Arc<dyn ApiClient>>>,
}

impl ClientPool {
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            factory,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Return the cached client for `(team_id, token)`, creating it on first use.
    pub async fn get_or_create(
        &self,
        team_id: &str,
        token: &str,
    ) -> Result<Arc<dyn ApiClient>, ApiError> {
        let key = (team_id.to_string(), token.to_string());

        if let Some(client) = self.clients.read().await.get(&key) {
            return Ok(Arc::clone(client));
        }

        let created = self.factory.create(Some(token))?;

        let mut clients = self.clients.write().await;
        let client = clients.entry(key).or_insert_with(|| {
            debug!(team_id = %team_id, "Created API client for new credential");
            created
        });
        Ok(Arc::clone(client))
    }

    /// Number of cached clients.
    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }
}

impl std::fmt::Debug for ClientPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientPool").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "client_pool_tests.rs"]
mod tests;
