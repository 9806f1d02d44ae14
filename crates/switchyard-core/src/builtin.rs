//! Built-in middleware.
//!
//! Listener registration is expressed entirely with these predicates: each one
//! either continues the chain or stops it. A predicate that does not match is
//! never an error.

use crate::args::EventArgs;
use crate::classify::EventKind;
use crate::context::{
    ACTION_ID_MATCHES_KEY, BLOCK_ID_MATCHES_KEY, CALLBACK_ID_MATCHES_KEY, MATCHES_KEY,
};
use crate::error::RegistrationError;
use crate::middleware::{ListenerResult, Middleware, Next};
use async_trait::async_trait;
use regex::{Captures, Regex};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Event types that are delivered even when the bot user caused them.
const SELF_EVENTS_KEPT: &[&str] = &["member_joined_channel", "member_left_channel"];

// ============================================================================
// Matchers
// ============================================================================

/// A string matcher: an exact value or a regular expression.
#[derive(Debug, Clone)]
pub enum Matcher {
    Exact(String),
    Pattern(Regex),
}

impl Matcher {
    pub fn exact(value: impl Into<String>) -> Self {
        Self::Exact(value.into())
    }

    /// Compile a regular expression matcher.
    pub fn pattern(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self::Pattern(Regex::new(pattern)?))
    }

    /// Whether `candidate` matches: equality for exact values, a search for patterns.
    pub fn is_match(&self, candidate: &str) -> bool {
        match self {
            Self::Exact(expected) => expected == candidate,
            Self::Pattern(regex) => regex.is_match(candidate),
        }
    }

    /// Match and record pattern captures in the event context under `key`.
    fn check(&self, candidate: &str, args: &EventArgs, key: &str) -> bool {
        match self {
            Self::Exact(expected) => expected == candidate,
            Self::Pattern(regex) => capture_into(regex, candidate, args, key),
        }
    }
}

impl PartialEq for Matcher {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Exact(a), Self::Exact(b)) => a == b,
            (Self::Pattern(a), Self::Pattern(b)) => a.as_str() == b.as_str(),
            _ => false,
        }
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(value) => write!(f, "{value}"),
            Self::Pattern(regex) => write!(f, "/{}/", regex.as_str()),
        }
    }
}

impl From<&str> for Matcher {
    fn from(value: &str) -> Self {
        Self::Exact(value.to_string())
    }
}

impl From<String> for Matcher {
    fn from(value: String) -> Self {
        Self::Exact(value)
    }
}

impl From<Regex> for Matcher {
    fn from(regex: Regex) -> Self {
        Self::Pattern(regex)
    }
}

fn capture_into(regex: &Regex, candidate: &str, args: &EventArgs, key: &str) -> bool {
    match regex.captures(candidate) {
        Some(captures) => {
            args.context().set(key, captures_to_value(&captures));
            true
        }
        None => false,
    }
}

/// Capture groups as a JSON array; index 0 is the whole match, unmatched groups are null.
fn captures_to_value(captures: &Captures<'_>) -> Value {
    Value::Array(
        captures
            .iter()
            .map(|group| {
                group
                    .map(|m| Value::String(m.as_str().to_string()))
                    .unwrap_or(Value::Null)
            })
            .collect(),
    )
}

// ============================================================================
// Constraints
// ============================================================================

pub const ACTION_ID_KEY: &str = "action_id";
pub const BLOCK_ID_KEY: &str = "block_id";
pub const CALLBACK_ID_KEY: &str = "callback_id";
pub const TYPE_KEY: &str = "type";

const ALL_KEYS: &[&str] = &[ACTION_ID_KEY, BLOCK_ID_KEY, CALLBACK_ID_KEY, TYPE_KEY];

/// Field constraints an interactive payload must satisfy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Constraints {
    pub action_id: Option<Matcher>,
    pub block_id: Option<Matcher>,
    pub callback_id: Option<Matcher>,
    /// Matched against the body's `type`.
    pub payload_type: Option<Matcher>,
}

impl Constraints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn action_id(mut self, matcher: impl Into<Matcher>) -> Self {
        self.action_id = Some(matcher.into());
        self
    }

    pub fn block_id(mut self, matcher: impl Into<Matcher>) -> Self {
        self.block_id = Some(matcher.into());
        self
    }

    pub fn callback_id(mut self, matcher: impl Into<Matcher>) -> Self {
        self.callback_id = Some(matcher.into());
        self
    }

    pub fn payload_type(mut self, matcher: impl Into<Matcher>) -> Self {
        self.payload_type = Some(matcher.into());
        self
    }

    /// Names of the keys that are set.
    pub fn keys(&self) -> Vec<&'static str> {
        [
            (ACTION_ID_KEY, self.action_id.is_some()),
            (BLOCK_ID_KEY, self.block_id.is_some()),
            (CALLBACK_ID_KEY, self.callback_id.is_some()),
            (TYPE_KEY, self.payload_type.is_some()),
        ]
        .into_iter()
        .filter_map(|(key, set)| set.then_some(key))
        .collect()
    }

    /// Build constraints from a JSON object.
    ///
    /// Values are either a string (exact match) or `{"pattern": "<regex>"}`.
    ///
    /// # Errors
    ///
    /// `UnknownConstraintKeys` for keys outside `action_id`, `block_id`,
    /// `callback_id` and `type`; `InvalidConstraint` for values of the wrong
    /// shape or patterns that do not compile.
    pub fn from_value(value: &Value) -> Result<Self, RegistrationError> {
        let object = value
            .as_object()
            .ok_or_else(|| RegistrationError::InvalidConstraint {
                key: "<root>".to_string(),
                message: "constraints must be a JSON object".to_string(),
            })?;

        let unknown: Vec<String> = object
            .keys()
            .filter(|key| !ALL_KEYS.contains(&key.as_str()))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(RegistrationError::UnknownConstraintKeys {
                listener: "Constraint",
                keys: unknown,
            });
        }

        let mut constraints = Self::new();
        for (key, raw) in object {
            let matcher = matcher_from_value(key, raw)?;
            match key.as_str() {
                ACTION_ID_KEY => constraints.action_id = Some(matcher),
                BLOCK_ID_KEY => constraints.block_id = Some(matcher),
                CALLBACK_ID_KEY => constraints.callback_id = Some(matcher),
                _ => constraints.payload_type = Some(matcher),
            }
        }
        Ok(constraints)
    }

    /// Reject keys outside the set allowed for a listener kind.
    pub fn validate_keys(
        &self,
        listener: &'static str,
        allowed: &[&str],
    ) -> Result<(), RegistrationError> {
        let unknown: Vec<String> = self
            .keys()
            .into_iter()
            .filter(|key| !allowed.contains(key))
            .map(str::to_string)
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(RegistrationError::UnknownConstraintKeys {
                listener,
                keys: unknown,
            })
        }
    }
}

fn matcher_from_value(key: &str, raw: &Value) -> Result<Matcher, RegistrationError> {
    let invalid = |message: String| RegistrationError::InvalidConstraint {
        key: key.to_string(),
        message,
    };
    match raw {
        Value::String(value) => Ok(Matcher::Exact(value.clone())),
        Value::Object(object) => {
            let pattern = object
                .get("pattern")
                .and_then(Value::as_str)
                .ok_or_else(|| invalid("expected {\"pattern\": \"...\"}".to_string()))?;
            Matcher::pattern(pattern).map_err(|e| invalid(e.to_string()))
        }
        other => Err(invalid(format!("expected a string or pattern object, got {other}"))),
    }
}

// ============================================================================
// Kind Filters
// ============================================================================

struct OnlyKind(EventKind);

#[async_trait]
impl Middleware for OnlyKind {
    async fn handle(&self, args: &EventArgs, next: Next<'_>) -> ListenerResult {
        if args.kind() == self.0 {
            next.run().await
        } else {
            Ok(())
        }
    }
}

pub fn only_events() -> Arc<dyn Middleware> {
    Arc::new(OnlyKind(EventKind::Event))
}

pub fn only_actions() -> Arc<dyn Middleware> {
    Arc::new(OnlyKind(EventKind::Action))
}

pub fn only_commands() -> Arc<dyn Middleware> {
    Arc::new(OnlyKind(EventKind::Command))
}

pub fn only_options() -> Arc<dyn Middleware> {
    Arc::new(OnlyKind(EventKind::Options))
}

pub fn only_view_actions() -> Arc<dyn Middleware> {
    Arc::new(OnlyKind(EventKind::ViewAction))
}

pub fn only_shortcuts() -> Arc<dyn Middleware> {
    Arc::new(OnlyKind(EventKind::Shortcut))
}

// ============================================================================
// Field Matchers
// ============================================================================

struct EventTypeMatcher(Matcher);

#[async_trait]
impl Middleware for EventTypeMatcher {
    async fn handle(&self, args: &EventArgs, next: Next<'_>) -> ListenerResult {
        let event_type = args.payload().get("type").and_then(Value::as_str);
        match event_type {
            Some(event_type) if self.0.check(event_type, args, MATCHES_KEY) => next.run().await,
            _ => Ok(()),
        }
    }
}

/// Continue only for events whose `type` matches.
pub fn match_event_type(matcher: impl Into<Matcher>) -> Arc<dyn Middleware> {
    Arc::new(EventTypeMatcher(matcher.into()))
}

struct MessageMatcher(Matcher);

#[async_trait]
impl Middleware for MessageMatcher {
    async fn handle(&self, args: &EventArgs, next: Next<'_>) -> ListenerResult {
        let Some(text) = args.payload().get("text").and_then(Value::as_str) else {
            return Ok(());
        };
        let matched = match &self.0 {
            Matcher::Exact(needle) => text.contains(needle.as_str()),
            Matcher::Pattern(regex) => capture_into(regex, text, args, MATCHES_KEY),
        };
        if matched {
            next.run().await
        } else {
            Ok(())
        }
    }
}

/// Continue only for messages whose text contains the exact string or matches the pattern.
///
/// Pattern captures are stored in the context under `matches`.
pub fn match_message(matcher: impl Into<Matcher>) -> Arc<dyn Middleware> {
    Arc::new(MessageMatcher(matcher.into()))
}

struct CommandNameMatcher(Matcher);

#[async_trait]
impl Middleware for CommandNameMatcher {
    async fn handle(&self, args: &EventArgs, next: Next<'_>) -> ListenerResult {
        let command = args.payload().get("command").and_then(Value::as_str);
        match command {
            Some(command) if self.0.check(command, args, MATCHES_KEY) => next.run().await,
            _ => Ok(()),
        }
    }
}

pub fn match_command_name(matcher: impl Into<Matcher>) -> Arc<dyn Middleware> {
    Arc::new(CommandNameMatcher(matcher.into()))
}

struct ConstraintMatcher(Constraints);

impl ConstraintMatcher {
    fn matches(&self, args: &EventArgs) -> bool {
        let constraints = &self.0;
        let payload = args.payload();
        let body = args.body();

        if constraints.action_id.is_some() || constraints.block_id.is_some() {
            // Only block payloads carry action and block ids.
            if payload.get(ACTION_ID_KEY).is_none() {
                return false;
            }
            if !field_matches(
                constraints.action_id.as_ref(),
                payload,
                ACTION_ID_KEY,
                ACTION_ID_MATCHES_KEY,
                args,
            ) {
                return false;
            }
            if !field_matches(
                constraints.block_id.as_ref(),
                payload,
                BLOCK_ID_KEY,
                BLOCK_ID_MATCHES_KEY,
                args,
            ) {
                return false;
            }
        }

        if let Some(matcher) = &constraints.callback_id {
            let callback_id = match body.get("view") {
                Some(view) if view.is_object() => view.get(CALLBACK_ID_KEY),
                _ => body.get(CALLBACK_ID_KEY),
            };
            match callback_id.and_then(Value::as_str) {
                Some(callback_id)
                    if matcher.check(callback_id, args, CALLBACK_ID_MATCHES_KEY) => {}
                _ => return false,
            }
        }

        if let Some(matcher) = &constraints.payload_type {
            match body.get(TYPE_KEY).and_then(Value::as_str) {
                Some(body_type) if matcher.is_match(body_type) => {}
                _ => return false,
            }
        }

        true
    }
}

fn field_matches(
    matcher: Option<&Matcher>,
    payload: &Value,
    key: &str,
    captures_key: &str,
    args: &EventArgs,
) -> bool {
    let Some(matcher) = matcher else {
        return true;
    };
    payload
        .get(key)
        .and_then(Value::as_str)
        .map(|value| matcher.check(value, args, captures_key))
        .unwrap_or(false)
}

#[async_trait]
impl Middleware for ConstraintMatcher {
    async fn handle(&self, args: &EventArgs, next: Next<'_>) -> ListenerResult {
        if self.matches(args) {
            next.run().await
        } else {
            Ok(())
        }
    }
}

/// Continue only for interactive payloads satisfying every set constraint.
pub fn match_constraints(constraints: Constraints) -> Arc<dyn Middleware> {
    Arc::new(ConstraintMatcher(constraints))
}

// ============================================================================
// Self Filter
// ============================================================================

struct IgnoreSelf;

impl IgnoreSelf {
    fn is_own_event(args: &EventArgs) -> bool {
        if args.kind() != EventKind::Event {
            return false;
        }
        let event = args.payload();
        let event_type = event.get("type").and_then(Value::as_str);
        let context = args.context();

        if let Some(bot_id) = context.bot_id() {
            let is_bot_message = event_type == Some("message")
                && event.get("subtype").and_then(Value::as_str) == Some("bot_message")
                && event.get("bot_id").and_then(Value::as_str) == Some(bot_id);
            if is_bot_message {
                return true;
            }
        }

        if let Some(bot_user_id) = context.bot_user_id() {
            let kept = event_type
                .map(|t| SELF_EVENTS_KEPT.contains(&t))
                .unwrap_or(false);
            let by_bot_user = event.get("user").and_then(Value::as_str) == Some(bot_user_id);
            if by_bot_user && !kept {
                return true;
            }
        }

        false
    }
}

#[async_trait]
impl Middleware for IgnoreSelf {
    async fn handle(&self, args: &EventArgs, next: Next<'_>) -> ListenerResult {
        if Self::is_own_event(args) {
            debug!(event_kind = %args.kind(), "Ignoring event caused by this app");
            return Ok(());
        }
        next.run().await
    }
}

/// Global middleware dropping events this app caused itself.
///
/// Membership events stay visible even when the bot user is the actor.
pub fn ignore_self() -> Arc<dyn Middleware> {
    Arc::new(IgnoreSelf)
}

#[cfg(test)]
#[path = "builtin_tests.rs"]
mod tests;
