//! # Switchyard HTTP Service
//!
//! axum adapter around [`switchyard_core::Receiver`].
//!
//! This crate provides:
//! - Signed webhook endpoints (POST, one per configured path)
//! - A health check endpoint
//! - Service configuration types and their validation

pub mod config;
pub mod errors;

pub use config::{LoggingConfig, ReceiverConfig, ServerConfig, ServiceConfig};
pub use errors::{ConfigError, ServiceError};

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use serde::Serialize;
use std::{collections::HashMap, sync::Arc, time::Duration};
use switchyard_core::{DispatchError, RawRequest, Receiver, ReceiverResponse, ResponseBody};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};

// ============================================================================
// Router
// ============================================================================

/// Build the HTTP router for `receiver`.
pub fn create_router(receiver: Arc<Receiver>, config: &ServiceConfig) -> Router {
    let mut webhook_routes = Router::new();
    for endpoint in &config.receiver.endpoints {
        webhook_routes = webhook_routes.route(endpoint, post(handle_webhook));
    }

    let health_routes = Router::new().route("/health", get(handle_health_check));

    Router::new()
        .merge(webhook_routes)
        .merge(health_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(receiver)
}

/// Bind the configured address and serve until SIGINT or SIGTERM.
pub async fn start_server(config: ServiceConfig, receiver: Arc<Receiver>) -> Result<(), ServiceError> {
    let app = create_router(receiver, &config);

    let address = format!("{}:{}", config.server.host, config.server.port);
    let listener =
        tokio::net::TcpListener::bind(&address)
            .await
            .map_err(|e| ServiceError::BindFailed {
                address: address.clone(),
                message: e.to_string(),
            })?;

    info!(
        address = %address,
        endpoints = ?config.receiver.endpoints,
        "Starting HTTP server"
    );

    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout_seconds);

    // In-flight requests finish; new connections are refused once the signal fires.
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_timeout))
        .await
        .map_err(|e| ServiceError::ServerFailed {
            message: e.to_string(),
        })?;

    info!("HTTP server shutdown complete");
    Ok(())
}

async fn shutdown_signal(shutdown_timeout: Duration) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown with {}s timeout", shutdown_timeout.as_secs());
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown with {}s timeout", shutdown_timeout.as_secs());
        },
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Hand a signed platform request to the receiver.
#[instrument(skip_all, fields(body_size = body.len()))]
pub async fn handle_webhook(
    State(receiver): State<Arc<Receiver>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = RawRequest::new(header_map(&headers), body);
    into_http_response(receiver.handle(request).await)
}

/// Dispatch failure attached to the HTTP response as an extension.
///
/// Outer layers (tracing, error reporting) read it from
/// `Response::extensions` once the status has been decided.
#[derive(Debug, Clone)]
pub struct DispatchFailure(pub Arc<DispatchError>);

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============================================================================
// Conversions
// ============================================================================

/// Headers with non-UTF-8 values are dropped.
fn header_map(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect()
}

fn into_http_response(response: ReceiverResponse) -> Response {
    let status =
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let mut http_response = match response.body {
        ResponseBody::Empty => status.into_response(),
        ResponseBody::Json(value) => (status, Json(value)).into_response(),
        ResponseBody::Text(text) => {
            let mut http_response = (status, Body::from(text)).into_response();
            http_response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; charset=utf-8"),
            );
            http_response
        }
    };

    if let Some(failure) = response.error {
        error!(
            status = status.as_u16(),
            error = %failure,
            "Event dispatch failed"
        );
        http_response.extensions_mut().insert(DispatchFailure(failure));
    }
    http_response
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
