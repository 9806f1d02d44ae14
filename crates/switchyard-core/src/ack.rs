//! Acknowledgment gate.
//!
//! Each event must be acknowledged exactly once. The acknowledgment either
//! hands the response to the transport straight away
//! ([`ResponseMode::Immediate`]) or records it so the receiver can send it
//! after dispatch has settled ([`ResponseMode::Deferred`]). A deadline task
//! warns when an event has not been acknowledged in time; it never cancels
//! any work.

use crate::error::AckError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Default acknowledgment deadline.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_millis(3001);

/// How the acknowledged response reaches the HTTP client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    /// The acknowledgment itself delivers the response.
    #[default]
    Immediate,
    /// The response is stored and sent once dispatch has settled.
    Deferred,
}

/// Body of an acknowledgment.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Empty,
    Text(String),
    Json(Value),
}

impl ResponseBody {
    /// Serialize any value into a JSON response body.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::Json(serde_json::to_value(value)?))
    }
}

impl From<()> for ResponseBody {
    fn from(_: ()) -> Self {
        Self::Empty
    }
}

impl From<&str> for ResponseBody {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for ResponseBody {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Value> for ResponseBody {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

struct AckState {
    mode: ResponseMode,
    acknowledged: AtomicBool,
    deadline_missed: AtomicBool,
    sender: Mutex<Option<oneshot::Sender<ResponseBody>>>,
    stored: Mutex<Option<ResponseBody>>,
}

/// Single-use acknowledgment handle for one event.
///
/// Cloning shares the same underlying state.
#[derive(Clone)]
pub struct Ack {
    state: Arc<AckState>,
}

/// Receiving side of an immediate acknowledgment.
pub type AckSignal = oneshot::Receiver<ResponseBody>;

impl Ack {
    /// Create a handle and the signal the transport waits on in immediate mode.
    pub fn new(mode: ResponseMode) -> (Self, AckSignal) {
        let (sender, receiver) = oneshot::channel();
        let ack = Self {
            state: Arc::new(AckState {
                mode,
                acknowledged: AtomicBool::new(false),
                deadline_missed: AtomicBool::new(false),
                sender: Mutex::new(Some(sender)),
                stored: Mutex::new(None),
            }),
        };
        (ack, receiver)
    }

    pub fn mode(&self) -> ResponseMode {
        self.state.mode
    }

    /// Acknowledge the event.
    ///
    /// # Errors
    ///
    /// Returns `AckError::AlreadyAcknowledged` on every call after the first.
    pub fn acknowledge(&self, response: impl Into<ResponseBody>) -> Result<(), AckError> {
        if self.state.acknowledged.swap(true, Ordering::SeqCst) {
            return Err(AckError::AlreadyAcknowledged);
        }

        let response = response.into();
        match self.state.mode {
            ResponseMode::Immediate => {
                let sender = self
                    .state
                    .sender
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                if let Some(sender) = sender {
                    if sender.send(response).is_err() {
                        debug!("Transport stopped waiting before the acknowledgment arrived");
                    }
                }
                debug!("Acknowledgment sent");
            }
            ResponseMode::Deferred => {
                *self
                    .state
                    .stored
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(response);
                debug!("Acknowledgment stored");
            }
        }
        Ok(())
    }

    pub fn is_acknowledged(&self) -> bool {
        self.state.acknowledged.load(Ordering::SeqCst)
    }

    /// Take the stored response of a deferred acknowledgment.
    pub fn take_response(&self) -> Option<ResponseBody> {
        self.state
            .stored
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Start the deadline timer.
    ///
    /// When `timeout` elapses without an acknowledgment a warning is logged
    /// and [`deadline_missed`](Self::deadline_missed) starts returning `true`.
    pub fn start_deadline(&self, timeout: Duration) -> JoinHandle<()> {
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if !state.acknowledged.load(Ordering::SeqCst) {
                state.deadline_missed.store(true, Ordering::SeqCst);
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "An incoming event was not acknowledged within the deadline. \
                     Ensure that ack() is called by a listener."
                );
            }
        })
    }

    /// Whether the deadline warning has fired.
    pub fn deadline_missed(&self) -> bool {
        self.state.deadline_missed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Ack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ack")
            .field("mode", &self.state.mode)
            .field("acknowledged", &self.is_acknowledged())
            .finish()
    }
}

#[cfg(test)]
#[path = "ack_tests.rs"]
mod tests;
