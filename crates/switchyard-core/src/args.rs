//! Arguments handed to middleware and listeners.

use crate::ack::{Ack, ResponseBody};
use crate::classify::EventKind;
use crate::client::{ApiClient, Message, PostMessageResponse};
use crate::context::Context;
use crate::error::{AckError, HelperError};
use serde_json::Value;
use std::sync::Arc;

/// Everything a middleware or listener can see about one event.
///
/// One value is built per event and shared, via `Arc`, by the global chain
/// and every listener chain.
pub struct EventArgs {
    kind: EventKind,
    body: Value,
    payload: Value,
    context: Context,
    client: Arc<dyn ApiClient>,
    ack: Option<Ack>,
}

impl EventArgs {
    /// Assemble the arguments for a classified event.
    ///
    /// `ack` is `None` for kinds the framework acknowledges itself.
    pub fn new(
        kind: EventKind,
        body: Value,
        context: Context,
        client: Arc<dyn ApiClient>,
        ack: Option<Ack>,
    ) -> Self {
        let payload = extract_payload(kind, &body);
        Self {
            kind,
            body,
            payload,
            context,
            client,
            ack,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// The full decoded body.
    pub fn body(&self) -> &Value {
        &self.body
    }

    /// The kind-specific part of the body: the inner event, the view, the
    /// first action, or the body itself.
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// API client authenticated with the event's token.
    pub fn client(&self) -> &Arc<dyn ApiClient> {
        &self.client
    }

    /// Acknowledge the event.
    ///
    /// # Errors
    ///
    /// `AckError::NotAvailable` for events the framework acknowledges itself,
    /// `AckError::AlreadyAcknowledged` on a repeated call.
    pub fn ack(&self, response: impl Into<ResponseBody>) -> Result<(), AckError> {
        match &self.ack {
            Some(ack) => ack.acknowledge(response),
            None => Err(AckError::NotAvailable { kind: self.kind }),
        }
    }

    pub fn ack_handle(&self) -> Option<&Ack> {
        self.ack.as_ref()
    }

    /// Whether [`say`](Self::say) can be used for this event.
    pub fn can_say(&self) -> bool {
        self.kind != EventKind::Options && self.context.source().conversation_id.is_some()
    }

    /// Post a message to the conversation the event came from.
    pub async fn say(
        &self,
        message: impl Into<Message>,
    ) -> Result<PostMessageResponse, HelperError> {
        if !self.can_say() {
            return Err(HelperError::NoConversation);
        }
        let channel = self
            .context
            .source()
            .conversation_id
            .as_deref()
            .ok_or(HelperError::NoConversation)?;
        Ok(self.client.post_message(channel, &message.into()).await?)
    }

    pub fn response_url(&self) -> Option<&str> {
        self.body.get("response_url").and_then(Value::as_str)
    }

    /// Reply through the interaction's `response_url`.
    pub async fn respond(&self, message: impl Into<Message>) -> Result<(), HelperError> {
        let url = self.response_url().ok_or(HelperError::NoResponseUrl)?;
        Ok(self.client.post_response(url, &message.into()).await?)
    }
}

impl std::fmt::Debug for EventArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventArgs")
            .field("kind", &self.kind)
            .field("source", self.context.source())
            .field("ack", &self.ack)
            .finish_non_exhaustive()
    }
}

fn extract_payload(kind: EventKind, body: &Value) -> Value {
    let inner = match kind {
        EventKind::Event => body.get("event"),
        EventKind::ViewAction => body.get("view"),
        EventKind::Action => body
            .get("actions")
            .and_then(Value::as_array)
            .and_then(|actions| actions.first()),
        EventKind::Command
        | EventKind::Options
        | EventKind::Shortcut
        | EventKind::Unknown => None,
    };
    inner.unwrap_or(body).clone()
}

#[cfg(test)]
#[path = "args_tests.rs"]
mod tests;
