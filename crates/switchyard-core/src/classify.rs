//! Event classification.
//!
//! The platform delivers every kind of callback to the same endpoint, so the
//! shape of the decoded body is the only thing that tells them apart.
//! [`classify`] is total: anything it does not recognise is
//! [`EventKind::Unknown`], which the dispatcher skips with a warning.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Discriminated category of an inbound payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Events API callback (`event_callback`).
    Event,
    /// Button, select or dialog interaction.
    Action,
    /// Slash command.
    Command,
    /// Request for dynamic menu options.
    Options,
    /// Modal view submission or close.
    ViewAction,
    /// Global or message shortcut.
    Shortcut,
    /// Anything else.
    Unknown,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::Action => "action",
            Self::Command => "command",
            Self::Options => "options",
            Self::ViewAction => "view_action",
            Self::Shortcut => "shortcut",
            Self::Unknown => "unknown",
        }
    }

    /// Kinds delivered as interactive payloads (team under `team.id`, user under `user.id`).
    pub fn is_interactive(&self) -> bool {
        matches!(
            self,
            Self::Action | Self::Options | Self::ViewAction | Self::Shortcut
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of classifying a body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub kind: EventKind,
    pub conversation_id: Option<String>,
}

/// Determine the kind of an event and the conversation it belongs to.
///
/// Rules are checked in priority order because shapes overlap:
///
/// 1. a string `command` starting with `/` is a [`EventKind::Command`];
/// 2. a known interactive `type` is an action, options request, view action or shortcut;
/// 3. `type == "event_callback"` with an `event` object is an [`EventKind::Event`];
/// 4. everything else is [`EventKind::Unknown`].
///
/// # Examples
///
/// ```rust
/// use serde_json::json;
/// use switchyard_core::classify::{classify, EventKind};
///
/// let body = json!({"command": "/deploy", "channel_id": "C1", "team_id": "T1"});
/// let classification = classify(&body);
///
/// assert_eq!(classification.kind, EventKind::Command);
/// assert_eq!(classification.conversation_id.as_deref(), Some("C1"));
/// ```
pub fn classify(body: &Value) -> Classification {
    let kind = classify_kind(body);
    Classification {
        kind,
        conversation_id: conversation_id(kind, body),
    }
}

fn classify_kind(body: &Value) -> EventKind {
    if let Some(command) = body.get("command").and_then(Value::as_str) {
        if command.starts_with('/') {
            return EventKind::Command;
        }
    }

    let Some(body_type) = body.get("type").and_then(Value::as_str) else {
        return EventKind::Unknown;
    };
    let has_actions = body.get("actions").map(Value::is_array).unwrap_or(false);
    let has_view = body.get("view").map(Value::is_object).unwrap_or(false);

    match body_type {
        "block_actions" | "dialog_submission" | "workflow_step_edit" => EventKind::Action,
        "interactive_message" if has_actions => EventKind::Action,
        "interactive_message" if body.get("name").is_some() => EventKind::Options,
        "block_suggestion" | "dialog_suggestion" => EventKind::Options,
        "view_submission" | "view_closed" if has_view => EventKind::ViewAction,
        "shortcut" | "message_action" => EventKind::Shortcut,
        "event_callback" if body.get("event").map(Value::is_object).unwrap_or(false) => {
            EventKind::Event
        }
        _ => EventKind::Unknown,
    }
}

fn conversation_id(kind: EventKind, body: &Value) -> Option<String> {
    let found = match kind {
        EventKind::Event => {
            let event = body.get("event")?;
            match event.get("channel") {
                Some(Value::String(channel)) => Some(channel.as_str()),
                Some(Value::Object(channel)) => channel.get("id").and_then(Value::as_str),
                _ => event
                    .get("item")
                    .and_then(|item| item.get("channel"))
                    .and_then(Value::as_str),
            }
        }
        EventKind::Command => body.get("channel_id").and_then(Value::as_str),
        EventKind::Action | EventKind::Options | EventKind::ViewAction | EventKind::Shortcut => {
            body.get("channel")
                .and_then(|channel| channel.get("id"))
                .and_then(Value::as_str)
        }
        EventKind::Unknown => None,
    };
    found.map(str::to_string)
}

#[cfg(test)]
#[path = "classify_tests.rs"]
mod tests;
