//! # Switchyard Core
//!
//! Event dispatch for signed platform webhooks.
//!
//! A request travels through a fixed pipeline:
//!
//! 1. [`verification`] checks the HMAC signature and the replay window, then
//!    decodes the JSON or form encoded body.
//! 2. [`classify`] decides what kind of event the body carries.
//! 3. [`authorization`] resolves the bot token and identity for the workspace.
//! 4. [`app::App`] runs global middleware, then fans the event out to every
//!    registered listener whose predicates match.
//! 5. [`ack`] tracks the single acknowledgment the platform expects, and
//!    [`receiver::Receiver`] decides when the HTTP response goes out.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use futures::FutureExt;
//! use std::sync::Arc;
//! use switchyard_core::{
//!     listener_fn, App, AppConfig, Receiver, ResponseMode, SigningSecret,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig {
//!     token: Some("xoxb-token".to_string()),
//!     ..AppConfig::default()
//! };
//! let mut app = App::new(config)?;
//! app.command(
//!     "/deploy",
//!     listener_fn(|args| {
//!         async move {
//!             args.ack("Deploying...")?;
//!             Ok(())
//!         }
//!         .boxed()
//!     }),
//! );
//!
//! let receiver = Receiver::with_signing_secret(
//!     Arc::new(app),
//!     SigningSecret::new("signing-secret"),
//!     ResponseMode::Immediate,
//! )?;
//! # let _ = receiver;
//! # Ok(())
//! # }
//! ```

pub mod ack;
pub mod app;
pub mod args;
pub mod authorization;
pub mod builtin;
pub mod classify;
pub mod client;
pub mod client_pool;
pub mod context;
pub mod conversation;
pub mod error;
pub mod listener;
pub mod middleware;
pub mod receiver;
pub mod source;
pub mod verification;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use ack::{Ack, ResponseBody, ResponseMode, DEFAULT_ACK_TIMEOUT};
pub use app::{App, AppBuilder, AppConfig, ErrorHandler, LoggingErrorHandler, ProcessStatus, Selector};
pub use args::EventArgs;
pub use authorization::{
    AuthorizationResult, Authorize, Installation, InstallationAuthorization, InstallationStore,
    MemoryInstallationStore, SingleTeamAuthorization,
};
pub use builtin::{Constraints, Matcher};
pub use classify::EventKind;
pub use client::{ApiClient, ClientFactory, ClientOptions, HttpClientFactory, Message};
pub use context::{Context, RequestMeta};
pub use conversation::{ConversationStore, MemoryConversationStore};
pub use error::{DispatchError, InitializationError, ListenerError, RegistrationError};
pub use listener::ListenerChain;
pub use middleware::{listener_fn, middleware_fn, Listener, ListenerResult, Middleware, Next};
pub use receiver::{Receiver, ReceiverResponse};
pub use source::Source;
pub use verification::{RawRequest, RequestAuthenticator, SigningSecret, SigningSecretAuthenticator};
