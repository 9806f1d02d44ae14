//! Originating identity of an event.

use crate::classify::EventKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Who and where an event came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub team_id: String,
    pub enterprise_id: Option<String>,
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
}

impl Source {
    /// Derive the source of a classified body.
    ///
    /// Returns `None` when the team id cannot be found, and always for
    /// [`EventKind::Unknown`].
    pub fn build(kind: EventKind, body: &Value, conversation_id: Option<String>) -> Option<Self> {
        let (team_id, enterprise_id, user_id) = match kind {
            EventKind::Event => (
                str_at(body, &["team_id"]),
                str_at(body, &["enterprise_id"]),
                event_user(body),
            ),
            EventKind::Command => (
                str_at(body, &["team_id"]),
                str_at(body, &["enterprise_id"]),
                str_at(body, &["user_id"]),
            ),
            EventKind::Action | EventKind::Options | EventKind::ViewAction | EventKind::Shortcut => {
                (
                    str_at(body, &["team", "id"]).or_else(|| str_at(body, &["user", "team_id"])),
                    str_at(body, &["team", "enterprise_id"])
                        .or_else(|| str_at(body, &["enterprise", "id"])),
                    str_at(body, &["user", "id"]),
                )
            }
            EventKind::Unknown => return None,
        };

        Some(Self {
            team_id: team_id?,
            enterprise_id,
            user_id,
            conversation_id,
        })
    }
}

/// Acting user of an Events API payload.
///
/// Falls back to the channel creator and the user group owner for events that
/// carry no `user` field.
fn event_user(body: &Value) -> Option<String> {
    let event = body.get("event")?;
    match event.get("user") {
        Some(Value::String(user)) => return Some(user.clone()),
        Some(Value::Object(user)) => {
            if let Some(id) = user.get("id").and_then(Value::as_str) {
                return Some(id.to_string());
            }
        }
        _ => {}
    }
    str_at(event, &["channel", "creator"]).or_else(|| str_at(event, &["subteam", "created_by"]))
}

fn str_at(value: &Value, path: &[&str]) -> Option<String> {
    path.iter()
        .try_fold(value, |current, key| current.get(*key))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
#[path = "source_tests.rs"]
mod tests;
