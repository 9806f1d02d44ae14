//! Shared fixtures for unit tests.

use crate::ack::Ack;
use crate::app::{App, AppConfig};
use crate::args::EventArgs;
use crate::authorization::AuthorizationResult;
use crate::classify::{classify, EventKind};
use crate::client::{ApiClient, ClientFactory, MockApiClient};
use crate::context::{Context, RequestMeta};
use crate::error::ApiError;
use crate::source::Source;
use serde_json::{json, Value};
use std::io;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;

pub const BOT_ID: &str = "B0BOT";
pub const BOT_USER_ID: &str = "U0BOT";

pub fn authorization() -> AuthorizationResult {
    AuthorizationResult {
        bot_token: Some("xoxb-test".to_string()),
        bot_id: Some(BOT_ID.to_string()),
        bot_user_id: Some(BOT_USER_ID.to_string()),
        ..AuthorizationResult::default()
    }
}

/// Factory handing out mocks with no expectations.
pub struct MockClientFactory;

impl ClientFactory for MockClientFactory {
    fn create(&self, _token: Option<&str>) -> Result<Arc<dyn ApiClient>, ApiError> {
        Ok(Arc::new(MockApiClient::new()))
    }
}

/// Token-mode app with a known bot identity and mocked clients.
pub fn test_app() -> App {
    let config = AppConfig {
        token: Some("xoxb-test".to_string()),
        bot_id: Some(BOT_ID.to_string()),
        bot_user_id: Some(BOT_USER_ID.to_string()),
        ..AppConfig::default()
    };
    App::builder(config)
        .client_factory(Arc::new(MockClientFactory))
        .build()
        .unwrap()
}

/// Arguments for `body`, classified the way dispatch would classify it.
pub fn args_for(body: Value) -> EventArgs {
    args_with(body, Arc::new(MockApiClient::new()), None)
}

pub fn args_with(body: Value, client: Arc<dyn ApiClient>, ack: Option<Ack>) -> EventArgs {
    let classification = classify(&body);
    let source = Source::build(classification.kind, &body, classification.conversation_id)
        .unwrap_or_else(|| Source {
            team_id: "T1".to_string(),
            ..Source::default()
        });
    let context = Context::new(authorization(), source, RequestMeta::new());
    EventArgs::new(classification.kind, body, context, client, ack)
}

pub fn message_event(text: &str) -> Value {
    json!({
        "type": "event_callback",
        "team_id": "T1",
        "event": {"type": "message", "text": text, "user": "U1", "channel": "C1"}
    })
}

pub fn event_of_type(event_type: &str) -> Value {
    json!({
        "type": "event_callback",
        "team_id": "T1",
        "event": {"type": event_type, "user": "U1", "channel": "C1"}
    })
}

pub fn block_action(action_id: &str, block_id: &str) -> Value {
    json!({
        "type": "block_actions",
        "team": {"id": "T1"},
        "user": {"id": "U1"},
        "channel": {"id": "C1"},
        "response_url": "https://hooks.example.test/actions/1",
        "actions": [{"action_id": action_id, "block_id": block_id, "type": "button"}]
    })
}

pub fn slash_command(command: &str) -> Value {
    json!({
        "command": command,
        "text": "",
        "team_id": "T1",
        "user_id": "U1",
        "channel_id": "C1",
        "response_url": "https://hooks.example.test/commands/1"
    })
}

pub fn view_submission(callback_id: &str) -> Value {
    json!({
        "type": "view_submission",
        "team": {"id": "T1"},
        "user": {"id": "U1"},
        "view": {"id": "V1", "callback_id": callback_id}
    })
}

pub fn shortcut(callback_id: &str) -> Value {
    json!({
        "type": "shortcut",
        "callback_id": callback_id,
        "team": {"id": "T1"},
        "user": {"id": "U1"}
    })
}

pub fn block_suggestion(action_id: &str) -> Value {
    json!({
        "type": "block_suggestion",
        "action_id": action_id,
        "block_id": "blk",
        "value": "que",
        "team": {"id": "T1"},
        "user": {"id": "U1"}
    })
}

pub fn kind_of(body: &Value) -> EventKind {
    classify(body).kind
}

/// Log output captured from a scoped subscriber.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    /// Route events emitted on this thread into the buffer until the guard drops.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
