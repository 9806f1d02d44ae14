//! The application: registration surface and per-event processing.
//!
//! An [`App`] owns the global middleware, the listener registry, the
//! authorization strategy and the client pool. [`App::process_event`] takes a
//! verified body through classification, authorization, context building,
//! the global middleware chain and the concurrent listener fan-out. Every
//! failure after classification goes to the global [`ErrorHandler`].

use crate::ack::{Ack, DEFAULT_ACK_TIMEOUT};
use crate::args::EventArgs;
use crate::authorization::{
    AuthorizationResult, Authorize, InstallationAuthorization, InstallationStore,
    SingleTeamAuthorization,
};
use crate::builtin::{
    self, Constraints, Matcher, ACTION_ID_KEY, BLOCK_ID_KEY, CALLBACK_ID_KEY, TYPE_KEY,
};
use crate::classify::{classify, Classification, EventKind};
use crate::client::{ApiClient, ClientFactory, ClientOptions, HttpClientFactory};
use crate::client_pool::ClientPool;
use crate::context::{Context, RequestMeta};
use crate::conversation::{conversation_context, ConversationStore, MemoryConversationStore};
use crate::error::{DispatchError, InitializationError, RegistrationError};
use crate::listener::{FanOut, ListenerChain, ListenerRegistry};
use crate::middleware::{run_chain, Middleware};
use crate::source::Source;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

const ACTION_KEYS: &[&str] = &[ACTION_ID_KEY, BLOCK_ID_KEY, CALLBACK_ID_KEY, TYPE_KEY];
const OPTIONS_KEYS: &[&str] = &[ACTION_ID_KEY, BLOCK_ID_KEY, CALLBACK_ID_KEY, TYPE_KEY];
const SHORTCUT_KEYS: &[&str] = &[CALLBACK_ID_KEY, TYPE_KEY];
const VIEW_KEYS: &[&str] = &[CALLBACK_ID_KEY, TYPE_KEY];
const VIEW_TYPES: &[&str] = &["view_submission", "view_closed"];

// ============================================================================
// Configuration
// ============================================================================

/// Application settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Bot token for single-workspace apps
    #[serde(default)]
    pub token: Option<String>,

    #[serde(default)]
    pub bot_id: Option<String>,

    #[serde(default)]
    pub bot_user_id: Option<String>,

    /// Drop events caused by this app
    #[serde(default = "default_true")]
    pub ignore_self: bool,

    /// Install the conversation state middleware
    #[serde(default = "default_true")]
    pub conversation_context: bool,

    /// Acknowledgment deadline in milliseconds
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,

    #[serde(default)]
    pub client: ClientOptions,
}

fn default_true() -> bool {
    true
}

fn default_ack_timeout_ms() -> u64 {
    DEFAULT_ACK_TIMEOUT.as_millis() as u64
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            token: None,
            bot_id: None,
            bot_user_id: None,
            ignore_self: true,
            conversation_context: true,
            ack_timeout_ms: default_ack_timeout_ms(),
            client: ClientOptions::default(),
        }
    }
}

impl AppConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("token", &self.token.as_ref().map(|_| "<REDACTED>"))
            .field("bot_id", &self.bot_id)
            .field("bot_user_id", &self.bot_user_id)
            .field("ignore_self", &self.ignore_self)
            .field("conversation_context", &self.conversation_context)
            .field("ack_timeout_ms", &self.ack_timeout_ms)
            .field("client", &self.client)
            .finish()
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Final destination of every dispatch failure.
#[async_trait]
pub trait ErrorHandler: Send + Sync {
    /// Handle `error`. Returning `Err` re-signals it to the transport.
    async fn handle(&self, error: DispatchError) -> Result<(), DispatchError>;
}

/// Logs the error and re-signals it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingErrorHandler;

#[async_trait]
impl ErrorHandler for LoggingErrorHandler {
    async fn handle(&self, error: DispatchError) -> Result<(), DispatchError> {
        error!(
            error = %error,
            listener_failures = error.listener_failure_count(),
            "Unhandled error while processing event"
        );
        Err(error)
    }
}

// ============================================================================
// Registration Selectors
// ============================================================================

/// What an `action`, `shortcut`, `options` or `view` registration matches on.
///
/// A bare id means `action_id` for actions and options and `callback_id` for
/// shortcuts and views.
#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    Id(Matcher),
    Constraints(Constraints),
}

impl From<&str> for Selector {
    fn from(id: &str) -> Self {
        Self::Id(Matcher::from(id))
    }
}

impl From<String> for Selector {
    fn from(id: String) -> Self {
        Self::Id(Matcher::from(id))
    }
}

impl From<Regex> for Selector {
    fn from(regex: Regex) -> Self {
        Self::Id(Matcher::from(regex))
    }
}

impl From<Matcher> for Selector {
    fn from(matcher: Matcher) -> Self {
        Self::Id(matcher)
    }
}

impl From<Constraints> for Selector {
    fn from(constraints: Constraints) -> Self {
        Self::Constraints(constraints)
    }
}

/// Whether an event reached the listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// The event went through the pipeline (listener errors were reported).
    Processed,
    /// The event kind was not recognised; nothing ran.
    Skipped,
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for an [`App`] with pluggable collaborators.
pub struct AppBuilder {
    config: AppConfig,
    authorize: Option<Arc<dyn Authorize>>,
    installation_store: Option<Arc<dyn InstallationStore>>,
    conversation_store: Option<Arc<dyn ConversationStore>>,
    client_factory: Option<Arc<dyn ClientFactory>>,
}

impl AppBuilder {
    /// Use a custom authorization strategy.
    pub fn authorize(mut self, authorize: Arc<dyn Authorize>) -> Self {
        self.authorize = Some(authorize);
        self
    }

    /// Resolve credentials from an installation store.
    pub fn installation_store(mut self, store: Arc<dyn InstallationStore>) -> Self {
        self.installation_store = Some(store);
        self
    }

    /// Replace the in-memory conversation store.
    pub fn conversation_store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.conversation_store = Some(store);
        self
    }

    /// Replace the HTTP client factory.
    pub fn client_factory(mut self, factory: Arc<dyn ClientFactory>) -> Self {
        self.client_factory = Some(factory);
        self
    }

    /// Validate the combination of options and build the app.
    ///
    /// # Errors
    ///
    /// `ConflictingAuthorization` when more than one of token, custom
    /// authorization and installation store is set; `MissingAuthorization`
    /// when none is; `Client` when the default client cannot be built.
    pub fn build(self) -> Result<App, InitializationError> {
        let factory = self
            .client_factory
            .unwrap_or_else(|| Arc::new(HttpClientFactory::new(self.config.client.clone())));
        let default_client = factory.create(self.config.token.as_deref())?;

        let authorize: Arc<dyn Authorize> = match (
            self.config.token.as_deref(),
            self.authorize,
            self.installation_store,
        ) {
            (Some(_), Some(_), _) | (Some(_), _, Some(_)) => {
                return Err(InitializationError::ConflictingAuthorization {
                    message: "a token as well as an authorize strategy or installation store were provided"
                        .to_string(),
                });
            }
            (None, Some(_), Some(_)) => {
                return Err(InitializationError::ConflictingAuthorization {
                    message: "both an authorize strategy and an installation store were provided"
                        .to_string(),
                });
            }
            (None, None, None) => return Err(InitializationError::MissingAuthorization),
            (Some(token), None, None) => {
                let single = SingleTeamAuthorization::new(token, Arc::clone(&default_client));
                match (&self.config.bot_id, &self.config.bot_user_id) {
                    (Some(bot_id), Some(bot_user_id)) => {
                        Arc::new(single.with_identity(bot_id.clone(), bot_user_id.clone()))
                    }
                    _ => Arc::new(single),
                }
            }
            (None, Some(authorize), None) => authorize,
            (None, None, Some(store)) => Arc::new(InstallationAuthorization::new(store)),
        };

        let mut middleware: Vec<Arc<dyn Middleware>> = Vec::new();
        if self.config.ignore_self {
            middleware.push(builtin::ignore_self());
        }
        if self.config.conversation_context {
            let store = self
                .conversation_store
                .unwrap_or_else(|| Arc::new(MemoryConversationStore::new()));
            middleware.push(conversation_context(store));
        }

        info!(
            ignore_self = self.config.ignore_self,
            conversation_context = self.config.conversation_context,
            "App initialized"
        );

        Ok(App {
            config: self.config,
            authorize,
            client_pool: ClientPool::new(factory),
            default_client,
            middleware,
            registry: ListenerRegistry::new(),
            error_handler: Arc::new(LoggingErrorHandler),
        })
    }
}

// ============================================================================
// App
// ============================================================================

/// Event dispatcher for one platform app.
pub struct App {
    config: AppConfig,
    authorize: Arc<dyn Authorize>,
    client_pool: ClientPool,
    default_client: Arc<dyn ApiClient>,
    middleware: Vec<Arc<dyn Middleware>>,
    registry: ListenerRegistry,
    error_handler: Arc<dyn ErrorHandler>,
}

impl App {
    pub fn builder(config: AppConfig) -> AppBuilder {
        AppBuilder {
            config,
            authorize: None,
            installation_store: None,
            conversation_store: None,
            client_factory: None,
        }
    }

    /// Build an app from configuration alone (single-workspace token mode).
    pub fn new(config: AppConfig) -> Result<Self, InitializationError> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn ack_timeout(&self) -> Duration {
        self.config.ack_timeout()
    }

    /// Client authenticated with the configured token, if any.
    pub fn client(&self) -> &Arc<dyn ApiClient> {
        &self.default_client
    }

    pub fn registry(&self) -> &ListenerRegistry {
        &self.registry
    }

    /// Append a global middleware. Global middleware run in registration order.
    pub fn use_middleware(&mut self, middleware: Arc<dyn Middleware>) -> &mut Self {
        self.middleware.push(middleware);
        self
    }

    /// Replace the global error handler.
    pub fn error(&mut self, handler: Arc<dyn ErrorHandler>) -> &mut Self {
        self.error_handler = handler;
        self
    }

    /// Listen for Events API callbacks of one type.
    pub fn event(
        &mut self,
        event_type: impl Into<Matcher>,
        chain: impl Into<ListenerChain>,
    ) -> &mut Self {
        let event_type = event_type.into();
        self.registry.register(
            format!("event {event_type}"),
            vec![builtin::only_events(), builtin::match_event_type(event_type)],
            chain.into(),
        );
        self
    }

    /// Listen for messages containing `pattern` (exact) or matching it (regex).
    pub fn message(
        &mut self,
        pattern: impl Into<Matcher>,
        chain: impl Into<ListenerChain>,
    ) -> &mut Self {
        let pattern = pattern.into();
        self.registry.register(
            format!("message {pattern}"),
            vec![
                builtin::only_events(),
                builtin::match_event_type("message"),
                builtin::match_message(pattern),
            ],
            chain.into(),
        );
        self
    }

    /// Listen for every message event.
    pub fn any_message(&mut self, chain: impl Into<ListenerChain>) -> &mut Self {
        self.registry.register(
            "message *",
            vec![builtin::only_events(), builtin::match_event_type("message")],
            chain.into(),
        );
        self
    }

    /// Listen for slash commands.
    pub fn command(
        &mut self,
        name: impl Into<Matcher>,
        chain: impl Into<ListenerChain>,
    ) -> &mut Self {
        let name = name.into();
        self.registry.register(
            format!("command {name}"),
            vec![builtin::only_commands(), builtin::match_command_name(name)],
            chain.into(),
        );
        self
    }

    /// Listen for actions by `action_id` or by constraints.
    pub fn action(
        &mut self,
        selector: impl Into<Selector>,
        chain: impl Into<ListenerChain>,
    ) -> Result<&mut Self, RegistrationError> {
        let constraints = match selector.into() {
            Selector::Id(id) => Constraints::new().action_id(id),
            Selector::Constraints(constraints) => constraints,
        };
        self.register_constrained("Action", ACTION_KEYS, builtin::only_actions(), constraints, chain)
    }

    /// Listen for shortcuts by `callback_id` or by constraints.
    pub fn shortcut(
        &mut self,
        selector: impl Into<Selector>,
        chain: impl Into<ListenerChain>,
    ) -> Result<&mut Self, RegistrationError> {
        let constraints = match selector.into() {
            Selector::Id(id) => Constraints::new().callback_id(id),
            Selector::Constraints(constraints) => constraints,
        };
        self.register_constrained(
            "Shortcut",
            SHORTCUT_KEYS,
            builtin::only_shortcuts(),
            constraints,
            chain,
        )
    }

    /// Listen for options requests by `action_id` or by constraints.
    pub fn options(
        &mut self,
        selector: impl Into<Selector>,
        chain: impl Into<ListenerChain>,
    ) -> Result<&mut Self, RegistrationError> {
        let constraints = match selector.into() {
            Selector::Id(id) => Constraints::new().action_id(id),
            Selector::Constraints(constraints) => constraints,
        };
        self.register_constrained("Options", OPTIONS_KEYS, builtin::only_options(), constraints, chain)
    }

    /// Listen for view submissions (by `callback_id`) or view actions matching constraints.
    ///
    /// A bare callback id only matches `view_submission`.
    pub fn view(
        &mut self,
        selector: impl Into<Selector>,
        chain: impl Into<ListenerChain>,
    ) -> Result<&mut Self, RegistrationError> {
        let constraints = match selector.into() {
            Selector::Id(id) => Constraints::new()
                .callback_id(id)
                .payload_type("view_submission"),
            Selector::Constraints(constraints) => constraints,
        };
        if let Some(Matcher::Exact(view_type)) = &constraints.payload_type {
            if !VIEW_TYPES.contains(&view_type.as_str()) {
                let err = RegistrationError::InvalidViewType {
                    value: view_type.clone(),
                };
                error!(error = %err, "Listener not registered");
                return Err(err);
            }
        }
        self.register_constrained(
            "View",
            VIEW_KEYS,
            builtin::only_view_actions(),
            constraints,
            chain,
        )
    }

    fn register_constrained(
        &mut self,
        listener: &'static str,
        allowed: &[&str],
        kind_filter: Arc<dyn Middleware>,
        constraints: Constraints,
        chain: impl Into<ListenerChain>,
    ) -> Result<&mut Self, RegistrationError> {
        if let Err(err) = constraints.validate_keys(listener, allowed) {
            error!(error = %err, "Listener not registered");
            return Err(err);
        }
        let description = format!("{} {:?}", listener.to_lowercase(), constraints.keys());
        self.registry.register(
            description,
            vec![kind_filter, builtin::match_constraints(constraints)],
            chain.into(),
        );
        Ok(self)
    }

    /// Process one verified event.
    ///
    /// Unknown kinds are skipped with a warning. Authorization, client and
    /// listener failures go through the error handler; its result is returned.
    #[instrument(skip_all, fields(request_id = %request.request_id))]
    pub async fn process_event(
        &self,
        body: Value,
        ack: Ack,
        request: RequestMeta,
    ) -> Result<ProcessStatus, DispatchError> {
        let Classification {
            kind,
            conversation_id,
        } = classify(&body);
        if kind == EventKind::Unknown {
            warn!("Could not determine the type of an incoming event. No listeners will be called.");
            return Ok(ProcessStatus::Skipped);
        }

        let Some(source) = Source::build(kind, &body, conversation_id) else {
            warn!(event_kind = %kind, "Incoming event has no team id. No listeners will be called.");
            return self.report(DispatchError::SourceUnresolved { kind }).await;
        };
        debug!(event_kind = %kind, team_id = %source.team_id, "Event classified");

        let authorization = match self.authorize.authorize(&source, &body).await {
            Ok(authorization) => authorization,
            Err(err) => {
                warn!(team_id = %source.team_id, "Authorization of incoming event did not succeed. No listeners will be called.");
                return self.report(err.into()).await;
            }
        };

        let client = match self.client_for(&source, &authorization).await {
            Ok(client) => client,
            Err(err) => return self.report(err).await,
        };

        let ack = if kind == EventKind::Event {
            // Events carry no response; acknowledge before any middleware runs.
            if let Err(err) = ack.acknowledge(()) {
                warn!(error = %err, "Event was acknowledged before dispatch");
            }
            None
        } else {
            Some(ack)
        };

        let context = Context::new(authorization, source, request);
        let args = Arc::new(EventArgs::new(kind, body, context, client, ack));
        let fan_out = FanOut::new(&self.registry, Arc::clone(&args));

        match run_chain(&self.middleware, &fan_out, &args).await {
            Ok(outcome) => {
                debug!(outcome = ?outcome, "Global middleware settled");
                Ok(ProcessStatus::Processed)
            }
            Err(err) => self.report(DispatchError::from_listener(err)).await,
        }
    }

    async fn client_for(
        &self,
        source: &Source,
        authorization: &AuthorizationResult,
    ) -> Result<Arc<dyn ApiClient>, DispatchError> {
        match authorization.selected_token() {
            Some(token) => self
                .client_pool
                .get_or_create(&source.team_id, token)
                .await
                .map_err(DispatchError::Client),
            None => Ok(Arc::clone(&self.default_client)),
        }
    }

    async fn report(&self, error: DispatchError) -> Result<ProcessStatus, DispatchError> {
        self.error_handler
            .handle(error)
            .await
            .map(|()| ProcessStatus::Processed)
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("config", &self.config)
            .field("middleware", &self.middleware.len())
            .field("listeners", &self.registry.descriptions())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "app_tests.rs"]
mod tests;
