//! Credential resolution for inbound events.
//!
//! Exactly one [`Authorize`] strategy is active per application:
//!
//! | Strategy | Use |
//! |----------|-----|
//! | [`SingleTeamAuthorization`] | App installed in one workspace with a fixed bot token |
//! | [`InstallationAuthorization`] | App installed in many workspaces, credentials looked up per event |
//!
//! Applications with unusual needs can implement [`Authorize`] directly.

use crate::client::ApiClient;
use crate::error::AuthorizationError;
use crate::source::Source;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, instrument};

// ============================================================================
// Authorization Result
// ============================================================================

/// Credentials resolved for one workspace.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AuthorizationResult {
    pub bot_token: Option<String>,
    pub user_token: Option<String>,
    pub bot_id: Option<String>,
    pub bot_user_id: Option<String>,
    pub team_id: Option<String>,
    pub enterprise_id: Option<String>,
    pub is_enterprise_install: Option<bool>,
}

impl AuthorizationResult {
    /// Token used for outbound calls: the bot token when present, else the user token.
    pub fn selected_token(&self) -> Option<&str> {
        self.bot_token.as_deref().or(self.user_token.as_deref())
    }
}

impl std::fmt::Debug for AuthorizationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationResult")
            .field("bot_token", &self.bot_token.as_ref().map(|_| "<REDACTED>"))
            .field("user_token", &self.user_token.as_ref().map(|_| "<REDACTED>"))
            .field("bot_id", &self.bot_id)
            .field("bot_user_id", &self.bot_user_id)
            .field("team_id", &self.team_id)
            .field("enterprise_id", &self.enterprise_id)
            .field("is_enterprise_install", &self.is_enterprise_install)
            .finish()
    }
}

/// Resolves the credentials for the workspace an event came from.
#[async_trait]
pub trait Authorize: Send + Sync {
    async fn authorize(
        &self,
        source: &Source,
        body: &Value,
    ) -> Result<AuthorizationResult, AuthorizationError>;
}

// ============================================================================
// Single Workspace
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
struct BotIdentity {
    bot_id: Option<String>,
    bot_user_id: String,
    team_id: Option<String>,
}

/// Fixed bot token for an app installed in a single workspace.
///
/// The bot identity is either supplied up front or looked up once through
/// `auth.test` and cached for the lifetime of the process. A failed lookup is
/// not cached; the next event tries again.
pub struct SingleTeamAuthorization {
    bot_token: String,
    client: Arc<dyn ApiClient>,
    identity: OnceCell<BotIdentity>,
}

impl SingleTeamAuthorization {
    /// `client` must authenticate with `bot_token`; it is used for the identity lookup.
    pub fn new(bot_token: impl Into<String>, client: Arc<dyn ApiClient>) -> Self {
        Self {
            bot_token: bot_token.into(),
            client,
            identity: OnceCell::new(),
        }
    }

    /// Skip the identity lookup by providing the bot ids directly.
    pub fn with_identity(mut self, bot_id: impl Into<String>, bot_user_id: impl Into<String>) -> Self {
        self.identity = OnceCell::new_with(Some(BotIdentity {
            bot_id: Some(bot_id.into()),
            bot_user_id: bot_user_id.into(),
            team_id: None,
        }));
        self
    }

    async fn identity(&self) -> Result<&BotIdentity, AuthorizationError> {
        self.identity
            .get_or_try_init(|| async {
                let response = self.client.auth_test().await?;
                info!(
                    bot_user_id = %response.user_id,
                    bot_id = ?response.bot_id,
                    "Resolved bot identity"
                );
                Ok::<_, AuthorizationError>(BotIdentity {
                    bot_id: response.bot_id,
                    bot_user_id: response.user_id,
                    team_id: response.team_id,
                })
            })
            .await
    }
}

impl std::fmt::Debug for SingleTeamAuthorization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleTeamAuthorization")
            .field("bot_token", &"<REDACTED>")
            .field("identity", &self.identity.get())
            .finish()
    }
}

#[async_trait]
impl Authorize for SingleTeamAuthorization {
    async fn authorize(
        &self,
        source: &Source,
        _body: &Value,
    ) -> Result<AuthorizationResult, AuthorizationError> {
        let identity = self.identity().await?;
        Ok(AuthorizationResult {
            bot_token: Some(self.bot_token.clone()),
            bot_id: identity.bot_id.clone(),
            bot_user_id: Some(identity.bot_user_id.clone()),
            team_id: identity
                .team_id
                .clone()
                .or_else(|| Some(source.team_id.clone())),
            ..AuthorizationResult::default()
        })
    }
}

// ============================================================================
// Multiple Workspaces
// ============================================================================

/// Credentials stored when the app was installed into a workspace or enterprise.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Installation {
    pub team_id: Option<String>,
    pub enterprise_id: Option<String>,
    /// Installed across a whole enterprise rather than one team.
    pub is_enterprise_install: bool,
    pub bot_token: Option<String>,
    pub bot_id: Option<String>,
    pub bot_user_id: Option<String>,
    pub user_token: Option<String>,
}

impl Installation {
    fn key(&self) -> Option<String> {
        if self.is_enterprise_install {
            self.enterprise_id.as_deref().map(enterprise_key)
        } else {
            self.team_id.as_deref().map(team_key)
        }
    }
}

impl std::fmt::Debug for Installation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Installation")
            .field("team_id", &self.team_id)
            .field("enterprise_id", &self.enterprise_id)
            .field("is_enterprise_install", &self.is_enterprise_install)
            .field("bot_token", &self.bot_token.as_ref().map(|_| "<REDACTED>"))
            .field("bot_id", &self.bot_id)
            .field("bot_user_id", &self.bot_user_id)
            .field("user_token", &self.user_token.as_ref().map(|_| "<REDACTED>"))
            .finish()
    }
}

impl From<Installation> for AuthorizationResult {
    fn from(installation: Installation) -> Self {
        Self {
            bot_token: installation.bot_token,
            user_token: installation.user_token,
            bot_id: installation.bot_id,
            bot_user_id: installation.bot_user_id,
            team_id: installation.team_id,
            enterprise_id: installation.enterprise_id,
            is_enterprise_install: Some(installation.is_enterprise_install),
        }
    }
}

/// Storage of installation credentials.
#[async_trait]
pub trait InstallationStore: Send + Sync {
    /// Fetch the installation covering `source`.
    ///
    /// Returns `AuthorizationError::NotFound` when nothing is stored.
    async fn fetch_installation(&self, source: &Source) -> Result<Installation, AuthorizationError>;

    async fn store_installation(&self, installation: Installation) -> Result<(), AuthorizationError>;
}

fn team_key(team_id: &str) -> String {
    format!("team:{}", team_id)
}

fn enterprise_key(enterprise_id: &str) -> String {
    format!("enterprise:{}", enterprise_id)
}

/// In-memory [`InstallationStore`].
///
/// Enterprise-wide installations are matched by enterprise id before
/// team installations are matched by team id.
#[derive(Default)]
pub struct MemoryInstallationStore {
    installations: RwLock<HashMap<String, Installation>>,
}

impl MemoryInstallationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.installations.read().await.len()
    }
}

#[async_trait]
impl InstallationStore for MemoryInstallationStore {
    async fn fetch_installation(&self, source: &Source) -> Result<Installation, AuthorizationError> {
        let installations = self.installations.read().await;

        let enterprise = source
            .enterprise_id
            .as_deref()
            .and_then(|id| installations.get(&enterprise_key(id)));

        enterprise
            .or_else(|| installations.get(&team_key(&source.team_id)))
            .cloned()
            .ok_or_else(|| AuthorizationError::NotFound {
                team_id: source.team_id.clone(),
                enterprise_id: source.enterprise_id.clone(),
            })
    }

    async fn store_installation(&self, installation: Installation) -> Result<(), AuthorizationError> {
        let key = installation.key().ok_or_else(|| AuthorizationError::Store {
            message: "installation has neither a team id nor an enterprise id".to_string(),
        })?;
        self.installations.write().await.insert(key, installation);
        Ok(())
    }
}

/// Looks up credentials per event in an [`InstallationStore`].
pub struct InstallationAuthorization {
    store: Arc<dyn InstallationStore>,
}

impl InstallationAuthorization {
    pub fn new(store: Arc<dyn InstallationStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Authorize for InstallationAuthorization {
    #[instrument(skip(self, source, _body), fields(team_id = %source.team_id))]
    async fn authorize(
        &self,
        source: &Source,
        _body: &Value,
    ) -> Result<AuthorizationResult, AuthorizationError> {
        let installation = self.store.fetch_installation(source).await?;
        debug!(
            enterprise_install = installation.is_enterprise_install,
            "Resolved installation credentials"
        );
        Ok(installation.into())
    }
}

#[cfg(test)]
#[path = "authorization_tests.rs"]
mod tests;
