//! Error types for request verification, authorization and dispatch.
//!
//! Verification errors ([`AuthenticityError`], [`BodyParseError`]) are handled
//! entirely at the receiver boundary and map to HTTP status codes. Everything
//! that happens after an event has been classified funnels into
//! [`DispatchError`] and through the application's global error handler.

use crate::classify::EventKind;

/// Error type returned by middleware and listeners.
///
/// Listener code is free to fail with any error type; the dispatcher keeps the
/// boxed value intact so that callers can downcast it again.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync + 'static>;

// ============================================================================
// Verification Errors
// ============================================================================

/// The request could not be proven to originate from the platform.
///
/// Always surfaced as `401 Unauthorized` and never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthenticityError {
    /// The signature or timestamp header was absent.
    #[error("Missing signature or timestamp header")]
    MissingHeaders,

    /// The timestamp header was not an integer.
    #[error("Invalid request timestamp: {value}")]
    InvalidTimestamp { value: String },

    /// The timestamp is older than the replay window allows.
    #[error("Stale request: timestamp {timestamp} is more than {max_age_seconds}s old")]
    StaleRequest {
        timestamp: i64,
        max_age_seconds: i64,
    },

    /// The signature does not match the HMAC of the request.
    #[error("Signature mismatch")]
    SignatureMismatch,
}

/// The request was authentic but its body could not be decoded.
///
/// Always surfaced as `400 Bad Request` and never retried.
#[derive(Debug, thiserror::Error)]
pub enum BodyParseError {
    /// The raw body is not valid JSON.
    #[error("Malformed JSON body: {0}")]
    Json(#[from] serde_json::Error),

    /// The `payload` form field is not valid JSON.
    #[error("Malformed payload field: {0}")]
    Payload(#[source] serde_json::Error),

    /// The body decoded to something other than a key/value object.
    #[error("Request body must decode to an object")]
    NotAnObject,
}

/// Failure of a [`RequestAuthenticator`](crate::verification::RequestAuthenticator).
#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error(transparent)]
    Authenticity(#[from] AuthenticityError),

    #[error(transparent)]
    BodyParse(#[from] BodyParseError),
}

impl VerificationError {
    /// HTTP status code the receiver answers with for this failure.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Authenticity(_) => 401,
            Self::BodyParse(_) => 400,
        }
    }
}

// ============================================================================
// Outbound API Errors
// ============================================================================

/// Errors raised by the outbound platform API client.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// HTTP error response from the platform.
    #[error("HTTP error: {status} - {message}")]
    HttpError { status: u16, message: String },

    /// The platform answered with `ok: false`.
    #[error("Platform API call '{method}' failed: {error}")]
    Platform { method: String, error: String },

    /// The client could not be constructed.
    #[error("Client configuration error: {message}")]
    Configuration { message: String },

    /// Failed to parse the JSON response.
    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Transport level failure (network, TLS, timeout).
    #[error("HTTP client error: {0}")]
    HttpClientError(#[from] reqwest::Error),
}

impl ApiError {
    /// Check if this error represents a transient condition that may succeed if retried.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::HttpError { status, .. } => *status >= 500 || *status == 429,
            Self::Platform { error, .. } => error == "ratelimited" || error == "internal_error",
            Self::Configuration { .. } => false,
            Self::JsonError(_) => false,
            Self::HttpClientError(_) => true,
        }
    }
}

/// Failure of a convenience helper on [`EventArgs`](crate::args::EventArgs).
#[derive(Debug, thiserror::Error)]
pub enum HelperError {
    /// `say` was called for an event without a conversation, or for an options request.
    #[error("say is unavailable: the event has no conversation")]
    NoConversation,

    /// `respond` was called for an event without a `response_url`.
    #[error("respond is unavailable: the event has no response_url")]
    NoResponseUrl,

    #[error(transparent)]
    Api(#[from] ApiError),
}

// ============================================================================
// Authorization Errors
// ============================================================================

/// The authorization strategy could not produce credentials for an event.
#[derive(Debug, thiserror::Error)]
pub enum AuthorizationError {
    /// No installation is stored for the event's team or enterprise.
    #[error("No installation found for team {team_id} (enterprise: {enterprise_id:?})")]
    NotFound {
        team_id: String,
        enterprise_id: Option<String>,
    },

    /// The bot identity lookup against the platform failed.
    #[error("Bot identity lookup failed: {0}")]
    IdentityLookup(#[from] ApiError),

    /// The installation store itself failed.
    #[error("Installation store failure: {message}")]
    Store { message: String },
}

// ============================================================================
// Conversation Store Errors
// ============================================================================

/// The conversation store could not be read or written.
#[derive(Debug, thiserror::Error)]
pub enum ConversationError {
    #[error("Conversation store failure: {message}")]
    Store { message: String },

    #[error("Conversation state is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),
}

// ============================================================================
// Acknowledgment Errors
// ============================================================================

/// Misuse of the per-event acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AckError {
    /// The acknowledgment was called more than once.
    #[error("Event has already been acknowledged")]
    AlreadyAcknowledged,

    /// The event kind is acknowledged by the framework, not by listeners.
    #[error("Acknowledgment is not available for {kind} events")]
    NotAvailable { kind: EventKind },
}

// ============================================================================
// Dispatch Errors
// ============================================================================

/// Two or more listeners failed for the same event.
///
/// Every underlying error is preserved; their order is unspecified.
#[derive(Debug, thiserror::Error)]
#[error("{} listeners failed", .errors.len())]
pub struct MultipleListenerError {
    pub errors: Vec<ListenerError>,
}

/// Top-level failure of processing one classified event.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// No credentials could be resolved; no listener ran.
    #[error("Authorization failed: {0}")]
    Authorization(#[from] AuthorizationError),

    /// A classified payload did not carry a team id.
    #[error("Could not resolve the originating team of a {kind} event")]
    SourceUnresolved { kind: EventKind },

    /// No API client could be built for the resolved credentials.
    #[error("Failed to build API client: {0}")]
    Client(#[source] ApiError),

    /// A listener acknowledged the event more than once.
    #[error("Multiple acknowledgments: {0}")]
    MultipleAck(AckError),

    /// Exactly one listener (or global middleware) failed.
    #[error("Listener failed: {0}")]
    Listener(#[source] ListenerError),

    /// Two or more listeners failed.
    #[error(transparent)]
    MultipleListeners(#[from] MultipleListenerError),
}

impl DispatchError {
    /// Classify a boxed error coming out of a middleware chain.
    ///
    /// Typed errors raised by the framework itself are recovered by downcasting;
    /// anything else stays a plain listener failure.
    pub fn from_listener(error: ListenerError) -> Self {
        let error = match error.downcast::<MultipleListenerError>() {
            Ok(multiple) => return Self::MultipleListeners(*multiple),
            Err(other) => other,
        };
        let error = match error.downcast::<AckError>() {
            Ok(ack) if *ack == AckError::AlreadyAcknowledged => return Self::MultipleAck(*ack),
            Ok(ack) => ack as ListenerError,
            Err(other) => other,
        };
        Self::Listener(error)
    }

    /// Number of listener failures carried by this error.
    pub fn listener_failure_count(&self) -> usize {
        match self {
            Self::Listener(_) | Self::MultipleAck(_) => 1,
            Self::MultipleListeners(multiple) => multiple.errors.len(),
            Self::Authorization(_) | Self::SourceUnresolved { .. } | Self::Client(_) => 0,
        }
    }
}

// ============================================================================
// Construction Errors
// ============================================================================

/// The application was configured inconsistently.
#[derive(Debug, thiserror::Error)]
pub enum InitializationError {
    /// More than one authorization strategy was configured.
    #[error("Conflicting authorization options: {message}")]
    ConflictingAuthorization { message: String },

    /// No authorization strategy was configured.
    #[error(
        "No token, authorize strategy or installation store provided. Apps used in one \
         workspace should be initialized with a token; apps used in many workspaces \
         should be initialized with an installation store or an authorize strategy."
    )]
    MissingAuthorization,

    /// The default receiver needs a signing secret.
    #[error("Signing secret not found; set a signing secret or supply a custom authenticator")]
    MissingSigningSecret,

    /// The outbound API client could not be built.
    #[error("Failed to build API client: {0}")]
    Client(#[from] ApiError),
}

/// A listener registration was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistrationError {
    /// The constraints used keys outside the closed set for the listener kind.
    #[error("{listener} listener cannot be attached using unknown constraint keys: {}", .keys.join(", "))]
    UnknownConstraintKeys {
        listener: &'static str,
        keys: Vec<String>,
    },

    /// A view listener named a view type other than `view_submission` or `view_closed`.
    #[error("View listener cannot be attached using unknown view event type: {value}")]
    InvalidViewType { value: String },

    /// A constraint value could not be interpreted.
    #[error("Invalid value for constraint '{key}': {message}")]
    InvalidConstraint { key: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
