//! Listeners registered by the service binary.
//!
//! They exercise each event kind end to end and double as a smoke test for a
//! fresh deployment.

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use switchyard_core::conversation::{conversation_state, update_conversation};
use switchyard_core::{listener_fn, App, Matcher};
use tracing::info;

pub const ECHO_COMMAND: &str = "/echo";
pub const APPROVE_ACTION: &str = "approve_button";
pub const FEEDBACK_VIEW: &str = "feedback_view";

/// Greetings seen in one conversation.
#[derive(Debug, Default, Serialize, Deserialize)]
struct GreetingState {
    greetings: u64,
}

pub fn register(app: &mut App) -> anyhow::Result<()> {
    // Echo the command text back as the acknowledgment.
    app.command(
        ECHO_COMMAND,
        listener_fn(|args| {
            async move {
                let text = args
                    .payload()
                    .get("text")
                    .and_then(|text| text.as_str())
                    .unwrap_or_default()
                    .to_string();
                args.ack(if text.is_empty() { "(nothing to echo)".to_string() } else { text })?;
                Ok(())
            }
            .boxed()
        }),
    );

    app.message(
        Matcher::pattern(r"(?i)^\s*hello\b")?,
        listener_fn(|args| {
            async move {
                let mut state: GreetingState = conversation_state(args)?.unwrap_or_default();
                state.greetings += 1;
                update_conversation(args, &state)?;

                let user = args.context().source().user_id.clone().unwrap_or_default();
                args.say(format!("Hello <@{user}>! ({} greetings here so far)", state.greetings))
                    .await?;
                Ok(())
            }
            .boxed()
        }),
    );

    app.event(
        "app_mention",
        listener_fn(|args| {
            async move {
                info!(team_id = %args.context().source().team_id, "Mentioned");
                args.say("You rang?").await?;
                Ok(())
            }
            .boxed()
        }),
    );

    app.action(
        APPROVE_ACTION,
        listener_fn(|args| {
            async move {
                args.ack(())?;
                args.respond("Approved").await?;
                Ok(())
            }
            .boxed()
        }),
    )?;

    app.view(
        FEEDBACK_VIEW,
        listener_fn(|args| {
            async move {
                let values = args
                    .payload()
                    .pointer("/state/values")
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                info!(fields = values.as_object().map_or(0, |fields| fields.len()), "Feedback received");
                args.ack(json!({"response_action": "clear"}))?;
                Ok(())
            }
            .boxed()
        }),
    )?;

    Ok(())
}

#[cfg(test)]
#[path = "listeners_tests.rs"]
mod tests;
