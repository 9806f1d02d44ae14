use super::*;
use crate::error::ListenerError;
use crate::middleware::listener_fn;
use crate::test_support::*;
use crate::verification::{compute_signature, FixedClock, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::oneshot;

const SECRET: &str = "8f742231b10e8888abcd99yyyzzz85a5";
const NOW: i64 = 1_700_000_000;

fn receiver(app: App, mode: ResponseMode) -> Receiver {
    let authenticator = SigningSecretAuthenticator::new(SigningSecret::new(SECRET))
        .with_clock(Arc::new(FixedClock(Utc.timestamp_opt(NOW, 0).unwrap())));
    Receiver::new(Arc::new(app), Arc::new(authenticator), mode)
}

fn signed(body: &str, content_type: &str) -> RawRequest {
    signed_with(body, content_type, &[])
}

fn signed_with(body: &str, content_type: &str, extra: &[(&str, &str)]) -> RawRequest {
    let timestamp = NOW.to_string();
    let mut headers = HashMap::from([
        (
            SIGNATURE_HEADER.to_string(),
            compute_signature(SECRET, &timestamp, body.as_bytes()),
        ),
        (TIMESTAMP_HEADER.to_string(), timestamp),
        ("Content-Type".to_string(), content_type.to_string()),
    ]);
    for (name, value) in extra {
        headers.insert(name.to_string(), value.to_string());
    }
    RawRequest::new(headers, Bytes::from(body.to_string()))
}

fn signed_json(body: &Value) -> RawRequest {
    signed(&body.to_string(), "application/json")
}

fn failing(message: &'static str) -> Arc<dyn crate::middleware::Listener> {
    listener_fn(move |_args| async move { Err::<(), ListenerError>(message.into()) }.boxed())
}

mod verification_tests {
    use super::*;

    #[tokio::test]
    async fn test_bad_signature_is_unauthorized() {
        let receiver = receiver(test_app(), ResponseMode::Immediate);
        let mut request = signed_json(&slash_command("/deploy"));
        let mut headers = request.headers().clone();
        headers.insert(SIGNATURE_HEADER.to_string(), "v0=deadbeef".to_string());
        request = RawRequest::new(headers, Bytes::from(request.body().to_vec()));

        let response = receiver.handle(request).await;

        assert_eq!(response, ReceiverResponse::empty(401));
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let receiver = receiver(test_app(), ResponseMode::Immediate);

        let response = receiver.handle(signed("{not json", "application/json")).await;

        assert_eq!(response, ReceiverResponse::empty(400));
    }

    #[tokio::test]
    async fn test_empty_signing_secret_is_rejected() {
        let result = Receiver::with_signing_secret(
            Arc::new(test_app()),
            SigningSecret::new(""),
            ResponseMode::Immediate,
        );

        assert!(matches!(
            result,
            Err(InitializationError::MissingSigningSecret)
        ));
    }
}

mod handshake_tests {
    use super::*;

    #[tokio::test]
    async fn test_ssl_check_gets_empty_ok() {
        let receiver = receiver(test_app(), ResponseMode::Immediate);

        let response = receiver
            .handle(signed(
                "ssl_check=1&token=legacy",
                "application/x-www-form-urlencoded",
            ))
            .await;

        assert_eq!(response, ReceiverResponse::empty(200));
    }

    #[tokio::test]
    async fn test_url_verification_echoes_challenge() {
        let receiver = receiver(test_app(), ResponseMode::Deferred);
        let body = json!({"type": "url_verification", "challenge": "3eZbrw1aBm2rZgRNFdxV2595E9CY3gmdALWMmHkvFXO7tYXAYM8P"});

        let response = receiver.handle(signed_json(&body)).await;

        assert_eq!(
            response,
            ReceiverResponse::ok(ResponseBody::Json(json!({
                "challenge": "3eZbrw1aBm2rZgRNFdxV2595E9CY3gmdALWMmHkvFXO7tYXAYM8P"
            })))
        );
    }

    /// App whose global middleware and catch-all command listener record every run.
    fn recording_app(runs: &Arc<Mutex<Vec<&'static str>>>) -> App {
        let mut app = test_app();
        let middleware_runs = Arc::clone(runs);
        app.use_middleware(crate::middleware::middleware_fn(move |_args, next| {
            middleware_runs.lock().unwrap().push("middleware");
            next.run().boxed()
        }));
        let listener_runs = Arc::clone(runs);
        app.command(
            crate::builtin::Matcher::pattern(".*").unwrap(),
            listener_fn(move |args| {
                listener_runs.lock().unwrap().push("listener");
                async move {
                    args.ack("handled")?;
                    Ok(())
                }
                .boxed()
            }),
        );
        app
    }

    /// Handshake bodies that also look like commands still never reach middleware or listeners.
    #[tokio::test]
    async fn test_handshakes_bypass_middleware_and_listeners() {
        for mode in [ResponseMode::Immediate, ResponseMode::Deferred] {
            let runs = Arc::new(Mutex::new(Vec::new()));
            let receiver = receiver(recording_app(&runs), mode);

            let ssl_check = receiver
                .handle(signed(
                    "ssl_check=1&command=%2Fdeploy&team_id=T1&user_id=U1&channel_id=C1",
                    "application/x-www-form-urlencoded",
                ))
                .await;
            let verification = receiver
                .handle(signed_json(&json!({
                    "type": "url_verification",
                    "challenge": "c-1",
                    "command": "/deploy",
                    "team_id": "T1",
                    "user_id": "U1",
                    "channel_id": "C1"
                })))
                .await;

            assert_eq!(ssl_check, ReceiverResponse::empty(200), "mode {mode:?}");
            assert_eq!(
                verification,
                ReceiverResponse::ok(ResponseBody::Json(json!({"challenge": "c-1"}))),
                "mode {mode:?}"
            );
            assert!(runs.lock().unwrap().is_empty(), "mode {mode:?}");
        }
    }

    /// The same app does run both for an ordinary command.
    #[tokio::test]
    async fn test_recording_app_runs_for_commands() {
        let runs = Arc::new(Mutex::new(Vec::new()));
        let receiver = receiver(recording_app(&runs), ResponseMode::Deferred);

        let response = receiver.handle(signed_json(&slash_command("/deploy"))).await;

        assert_eq!(response, ReceiverResponse::ok(ResponseBody::from("handled")));
        assert_eq!(*runs.lock().unwrap(), vec!["middleware", "listener"]);
    }

    #[test]
    fn test_truthiness() {
        assert!(is_truthy(Some(&json!("1"))));
        assert!(is_truthy(Some(&json!(true))));
        assert!(!is_truthy(Some(&json!(""))));
        assert!(!is_truthy(Some(&json!(0))));
        assert!(!is_truthy(Some(&Value::Null)));
        assert!(!is_truthy(None));
    }
}

mod immediate_mode_tests {
    use super::*;

    /// The acknowledgment is answered while the listener is still running.
    #[tokio::test]
    async fn test_ack_answers_before_listener_finishes() {
        let (release, released) = oneshot::channel::<()>();
        let released = Arc::new(Mutex::new(Some(released)));
        let (finished_tx, finished_rx) = oneshot::channel::<()>();
        let finished_tx = Arc::new(Mutex::new(Some(finished_tx)));
        let mut app = test_app();
        app.command(
            "/deploy",
            listener_fn(move |args| {
                let released = released.lock().unwrap().take();
                let finished = finished_tx.lock().unwrap().take();
                async move {
                    args.ack("deploying")?;
                    if let Some(released) = released {
                        let _ = released.await;
                    }
                    if let Some(finished) = finished {
                        let _ = finished.send(());
                    }
                    Ok(())
                }
                .boxed()
            }),
        );
        let receiver = receiver(app, ResponseMode::Immediate);

        let response = receiver.handle(signed_json(&slash_command("/deploy"))).await;

        assert_eq!(response, ReceiverResponse::ok(ResponseBody::from("deploying")));
        release.send(()).unwrap();
        finished_rx.await.unwrap();
    }

    /// Events are acknowledged by the framework with an empty body.
    #[tokio::test]
    async fn test_event_is_answered_empty() {
        let receiver = receiver(test_app(), ResponseMode::Immediate);

        let response = receiver.handle(signed_json(&message_event("hi"))).await;

        assert_eq!(response, ReceiverResponse::empty(200));
    }

    #[tokio::test]
    async fn test_failure_without_ack_is_server_error() {
        let mut app = test_app();
        app.command("/deploy", failing("boom"));
        let receiver = receiver(app, ResponseMode::Immediate);

        let response = receiver.handle(signed_json(&slash_command("/deploy"))).await;

        assert_eq!(response, ReceiverResponse::empty(500));
        let error = response.error.expect("dispatch error is carried");
        assert!(matches!(*error, DispatchError::Listener(_)));
        assert!(error.to_string().contains("boom"));
    }

    /// A failure after the acknowledgment is only reported.
    #[tokio::test]
    async fn test_failure_after_ack_keeps_ack_response() {
        let mut app = test_app();
        app.command(
            "/deploy",
            listener_fn(|args| {
                async move {
                    args.ack("accepted")?;
                    Err::<(), ListenerError>("later failure".into())
                }
                .boxed()
            }),
        );
        let receiver = receiver(app, ResponseMode::Immediate);

        let response = receiver.handle(signed_json(&slash_command("/deploy"))).await;

        assert_eq!(response, ReceiverResponse::ok(ResponseBody::from("accepted")));
    }

    #[tokio::test]
    async fn test_no_ack_gets_empty_ok() {
        let receiver = receiver(test_app(), ResponseMode::Immediate);

        let response = receiver.handle(signed_json(&slash_command("/unheard"))).await;

        assert_eq!(response, ReceiverResponse::empty(200));
    }

    #[tokio::test]
    async fn test_unknown_kind_gets_empty_ok() {
        let receiver = receiver(test_app(), ResponseMode::Immediate);

        let response = receiver.handle(signed_json(&json!({"type": "mystery"}))).await;

        assert_eq!(response, ReceiverResponse::empty(200));
    }
}

mod deferred_mode_tests {
    use super::*;

    #[tokio::test]
    async fn test_stored_ack_sent_after_dispatch() {
        let mut app = test_app();
        app.command(
            "/deploy",
            listener_fn(|args| async move { Ok(args.ack(json!({"text": "done"}))?) }.boxed()),
        );
        let receiver = receiver(app, ResponseMode::Deferred);

        let response = receiver.handle(signed_json(&slash_command("/deploy"))).await;

        assert_eq!(
            response,
            ReceiverResponse::ok(ResponseBody::Json(json!({"text": "done"})))
        );
    }

    /// A dispatch error wins over an earlier acknowledgment.
    #[tokio::test]
    async fn test_failure_after_ack_is_server_error() {
        let mut app = test_app();
        app.command(
            "/deploy",
            listener_fn(|args| {
                async move {
                    args.ack("accepted")?;
                    Err::<(), ListenerError>("later failure".into())
                }
                .boxed()
            }),
        );
        let receiver = receiver(app, ResponseMode::Deferred);

        let response = receiver.handle(signed_json(&slash_command("/deploy"))).await;

        assert_eq!(response, ReceiverResponse::empty(500));
        let error = response.error.expect("dispatch error is carried");
        assert!(error.to_string().contains("later failure"));
    }

    #[tokio::test]
    async fn test_no_ack_gets_empty_ok() {
        let receiver = receiver(test_app(), ResponseMode::Deferred);

        let response = receiver.handle(signed_json(&slash_command("/unheard"))).await;

        assert_eq!(response, ReceiverResponse::empty(200));
    }
}

mod request_meta_tests {
    use super::*;

    /// Retry headers reach the context of the event.
    #[tokio::test]
    async fn test_retry_headers_reach_context() {
        let seen = Arc::new(Mutex::new(None));
        let seen_in_listener = Arc::clone(&seen);
        let mut app = test_app();
        app.any_message(listener_fn(move |args| {
            let request = args.context().request().clone();
            *seen_in_listener.lock().unwrap() = Some((request.retry_num, request.retry_reason));
            async { Ok(()) }.boxed()
        }));
        let receiver = receiver(app, ResponseMode::Deferred);
        let body = message_event("hi").to_string();

        receiver
            .handle(signed_with(
                &body,
                "application/json",
                &[
                    ("X-Platform-Retry-Num", "2"),
                    ("X-Platform-Retry-Reason", "http_timeout"),
                ],
            ))
            .await;

        assert_eq!(
            *seen.lock().unwrap(),
            Some((Some(2), Some("http_timeout".to_string())))
        );
    }
}
