//! Transport-neutral request handling.
//!
//! [`Receiver::handle`] turns one raw HTTP request into a status code and a
//! body: it authenticates the request, answers the platform's built-in
//! handshakes, and runs the event through the [`App`] under the acknowledgment
//! gate. Any HTTP framework can drive it.

use crate::ack::{Ack, AckSignal, ResponseBody, ResponseMode};
use crate::app::{App, ProcessStatus};
use crate::context::RequestMeta;
use crate::error::{DispatchError, InitializationError};
use crate::verification::{
    RawRequest, RequestAuthenticator, SigningSecret, SigningSecretAuthenticator,
    RETRY_NUM_HEADER, RETRY_REASON_HEADER,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, instrument, warn};

/// Status and body to send back to the platform.
///
/// When dispatch failed, `error` carries the failure so the transport can
/// raise it through its own error channel after sending the response.
#[derive(Debug, Clone)]
pub struct ReceiverResponse {
    pub status: u16,
    pub body: ResponseBody,
    pub error: Option<Arc<DispatchError>>,
}

impl ReceiverResponse {
    pub fn ok(body: ResponseBody) -> Self {
        Self {
            status: 200,
            body,
            error: None,
        }
    }

    pub fn empty(status: u16) -> Self {
        Self {
            status,
            body: ResponseBody::Empty,
            error: None,
        }
    }

    /// Empty 500 carrying the dispatch failure.
    pub fn failed(error: DispatchError) -> Self {
        Self::empty(500).with_error(error)
    }

    pub fn with_error(mut self, error: DispatchError) -> Self {
        self.error = Some(Arc::new(error));
        self
    }
}

/// Compares what goes on the wire; the carried error is ignored.
impl PartialEq for ReceiverResponse {
    fn eq(&self, other: &Self) -> bool {
        self.status == other.status && self.body == other.body
    }
}

type ProcessResult = Result<ProcessStatus, DispatchError>;

/// Receives signed requests and feeds them to an [`App`].
pub struct Receiver {
    app: Arc<App>,
    authenticator: Arc<dyn RequestAuthenticator>,
    mode: ResponseMode,
    ack_timeout: Duration,
}

impl Receiver {
    /// The acknowledgment deadline is taken from the app configuration.
    pub fn new(
        app: Arc<App>,
        authenticator: Arc<dyn RequestAuthenticator>,
        mode: ResponseMode,
    ) -> Self {
        let ack_timeout = app.ack_timeout();
        Self {
            app,
            authenticator,
            mode,
            ack_timeout,
        }
    }

    /// Receiver verifying requests with a signing secret.
    ///
    /// # Errors
    ///
    /// `MissingSigningSecret` when `secret` is empty.
    pub fn with_signing_secret(
        app: Arc<App>,
        secret: SigningSecret,
        mode: ResponseMode,
    ) -> Result<Self, InitializationError> {
        if secret.is_empty() {
            return Err(InitializationError::MissingSigningSecret);
        }
        let authenticator = Arc::new(SigningSecretAuthenticator::new(secret));
        Ok(Self::new(app, authenticator, mode))
    }

    pub fn with_ack_timeout(mut self, ack_timeout: Duration) -> Self {
        self.ack_timeout = ack_timeout;
        self
    }

    pub fn mode(&self) -> ResponseMode {
        self.mode
    }

    pub fn app(&self) -> &Arc<App> {
        &self.app
    }

    /// Handle one request end to end.
    #[instrument(skip_all, fields(mode = ?self.mode))]
    pub async fn handle(&self, request: RawRequest) -> ReceiverResponse {
        let body = match self.authenticator.authenticate(&request).await {
            Ok(body) => body,
            Err(err) => return ReceiverResponse::empty(err.status_code()),
        };

        if is_truthy(body.get("ssl_check")) {
            debug!("Answering SSL check");
            return ReceiverResponse::empty(200);
        }
        if body.get("type").and_then(Value::as_str) == Some("url_verification") {
            info!("Answering URL verification challenge");
            let challenge = body.get("challenge").cloned().unwrap_or(Value::Null);
            return ReceiverResponse::ok(ResponseBody::Json(json!({ "challenge": challenge })));
        }

        let meta = request_meta(&request);
        let (ack, signal) = Ack::new(self.mode);
        let deadline = ack.start_deadline(self.ack_timeout);

        let response = match self.mode {
            ResponseMode::Immediate => self.respond_on_ack(body, ack, signal, meta).await,
            ResponseMode::Deferred => self.respond_after_dispatch(body, ack, meta).await,
        };
        deadline.abort();
        response
    }

    /// Answer as soon as a listener acknowledges; dispatch carries on in the background.
    async fn respond_on_ack(
        &self,
        body: Value,
        ack: Ack,
        mut signal: AckSignal,
        meta: RequestMeta,
    ) -> ReceiverResponse {
        let app = Arc::clone(&self.app);
        let mut dispatch: JoinHandle<ProcessResult> =
            tokio::spawn(async move { app.process_event(body, ack, meta).await });

        tokio::select! {
            biased;
            delivered = &mut signal => match delivered {
                Ok(response) => {
                    tokio::spawn(log_background_result(dispatch));
                    ReceiverResponse::ok(response)
                }
                // Every handle was dropped without acknowledging.
                Err(_) => settled_without_ack(dispatch.await),
            },
            settled = &mut dispatch => match signal.try_recv() {
                Ok(response) => match settled {
                    Ok(Err(err)) => {
                        debug!(error = %err, "Dispatch failed after the event was acknowledged");
                        ReceiverResponse::ok(response).with_error(err)
                    }
                    _ => ReceiverResponse::ok(response),
                },
                Err(_) => settled_without_ack(settled),
            },
        }
    }

    /// Wait for dispatch to settle, then send the stored acknowledgment.
    async fn respond_after_dispatch(
        &self,
        body: Value,
        ack: Ack,
        meta: RequestMeta,
    ) -> ReceiverResponse {
        match self.app.process_event(body, ack.clone(), meta).await {
            Ok(status) => match ack.take_response() {
                Some(response) => ReceiverResponse::ok(response),
                None => {
                    if status == ProcessStatus::Processed {
                        warn!("Event processing finished without an acknowledgment; sending an empty response");
                    }
                    ReceiverResponse::empty(200)
                }
            },
            Err(err) => ReceiverResponse::failed(err),
        }
    }
}

impl std::fmt::Debug for Receiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Receiver")
            .field("mode", &self.mode)
            .field("ack_timeout", &self.ack_timeout)
            .finish_non_exhaustive()
    }
}

fn settled_without_ack(settled: Result<ProcessResult, JoinError>) -> ReceiverResponse {
    match settled {
        Ok(Ok(ProcessStatus::Processed)) => {
            warn!("Event processing finished without an acknowledgment; sending an empty response");
            ReceiverResponse::empty(200)
        }
        Ok(Ok(ProcessStatus::Skipped)) => ReceiverResponse::empty(200),
        Ok(Err(err)) => ReceiverResponse::failed(err),
        Err(join_error) => {
            error!(error = %join_error, "Event processing task aborted");
            ReceiverResponse::empty(500)
        }
    }
}

async fn log_background_result(dispatch: JoinHandle<ProcessResult>) {
    match dispatch.await {
        Ok(Ok(status)) => debug!(status = ?status, "Background dispatch finished"),
        Ok(Err(err)) => debug!(error = %err, "Background dispatch failed after acknowledgment"),
        Err(join_error) => error!(error = %join_error, "Background dispatch task aborted"),
    }
}

fn request_meta(request: &RawRequest) -> RequestMeta {
    RequestMeta {
        retry_num: request
            .header(RETRY_NUM_HEADER)
            .and_then(|value| value.trim().parse().ok()),
        retry_reason: request.header(RETRY_REASON_HEADER).map(str::to_string),
        ..RequestMeta::new()
    }
}

/// Truthiness of a decoded field the way the platform means it: present and not
/// false, zero, empty or null.
fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(number)) => number.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::String(text)) => !text.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

#[cfg(test)]
#[path = "receiver_tests.rs"]
mod tests;
