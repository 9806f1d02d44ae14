//! Request signature verification and body decoding.
//!
//! Every inbound request carries an HMAC-SHA256 signature over
//! `v0:{timestamp}:{raw body}` keyed by the app's signing secret. The
//! timestamp must fall inside a five minute replay window. Only after the
//! signature has been verified is the body decoded, so that "not from the
//! platform" (401) and "could not read the body" (400) stay distinguishable.

use crate::error::{AuthenticityError, BodyParseError, VerificationError};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde_json::{Map, Value};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{debug, instrument, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying `v0=<hex digest>`.
pub const SIGNATURE_HEADER: &str = "x-platform-signature";

/// Header carrying the request timestamp in unix seconds.
pub const TIMESTAMP_HEADER: &str = "x-platform-request-timestamp";

/// Retry counter set by the platform when it re-delivers an event.
pub const RETRY_NUM_HEADER: &str = "x-platform-retry-num";

/// Reason given by the platform for a re-delivery.
pub const RETRY_REASON_HEADER: &str = "x-platform-retry-reason";

pub const CONTENT_TYPE_HEADER: &str = "content-type";

/// Version prefix of the signing scheme.
pub const SIGNATURE_VERSION: &str = "v0";

/// Maximum accepted request age.
pub const MAX_REQUEST_AGE_SECONDS: i64 = 300;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

// ============================================================================
// Raw Request
// ============================================================================

/// Raw HTTP request data as handed over by the transport.
///
/// Header names are lower-cased on construction so lookups are
/// case-insensitive.
#[derive(Debug, Clone)]
pub struct RawRequest {
    headers: HashMap<String, String>,
    body: Bytes,
}

impl RawRequest {
    pub fn new(headers: HashMap<String, String>, body: Bytes) -> Self {
        let headers = headers
            .into_iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value))
            .collect();
        Self { headers, body }
    }

    /// Look up a header by (case-insensitive) name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|value| value.as_str())
    }

    pub fn signature(&self) -> Option<&str> {
        self.header(SIGNATURE_HEADER)
    }

    pub fn timestamp(&self) -> Option<&str> {
        self.header(TIMESTAMP_HEADER)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(CONTENT_TYPE_HEADER)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }
}

// ============================================================================
// Clock
// ============================================================================

/// Source of the current time for replay-window checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock frozen at a fixed instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

// ============================================================================
// Signing Secret
// ============================================================================

/// Shared signing secret. Zeroed on drop and never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SigningSecret(String);

impl SigningSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SigningSecret(<REDACTED>)")
    }
}

/// Compute the `v0=<hex>` signature for a request.
///
/// # Examples
///
/// ```rust
/// use switchyard_core::verification::compute_signature;
///
/// let signature = compute_signature("secret", "1531420618", b"token=abc");
/// assert!(signature.starts_with("v0="));
/// assert_eq!(signature.len(), 3 + 64);
/// ```
pub fn compute_signature(secret: &str, timestamp: &str, body: &[u8]) -> String {
    format!(
        "{}={}",
        SIGNATURE_VERSION,
        hex::encode(hmac_digest(secret, timestamp, body))
    )
}

fn hmac_digest(secret: &str, timestamp: &str, body: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length, so construction cannot fail.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return Vec::new(),
    };
    mac.update(SIGNATURE_VERSION.as_bytes());
    mac.update(b":");
    mac.update(timestamp.as_bytes());
    mac.update(b":");
    mac.update(body);
    mac.finalize().into_bytes().to_vec()
}

fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

// ============================================================================
// Authenticators
// ============================================================================

/// Turns a raw request into a verified, decoded body.
#[async_trait]
pub trait RequestAuthenticator: Send + Sync {
    /// Verify the request and decode its body into a JSON object.
    async fn authenticate(&self, request: &RawRequest) -> Result<Value, VerificationError>;
}

/// Default authenticator: HMAC-SHA256 signature plus replay window.
pub struct SigningSecretAuthenticator {
    secret: SigningSecret,
    clock: Arc<dyn Clock>,
    max_age_seconds: i64,
}

impl SigningSecretAuthenticator {
    pub fn new(secret: SigningSecret) -> Self {
        Self {
            secret,
            clock: Arc::new(SystemClock),
            max_age_seconds: MAX_REQUEST_AGE_SECONDS,
        }
    }

    /// Replace the clock used for the replay window.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Check the signature and timestamp headers without decoding the body.
    pub fn verify(&self, request: &RawRequest) -> Result<(), AuthenticityError> {
        let (signature, raw_timestamp) = match (request.signature(), request.timestamp()) {
            (Some(signature), Some(timestamp)) => (signature, timestamp),
            _ => return Err(AuthenticityError::MissingHeaders),
        };

        let timestamp: i64 =
            raw_timestamp
                .trim()
                .parse()
                .map_err(|_| AuthenticityError::InvalidTimestamp {
                    value: raw_timestamp.to_string(),
                })?;

        let oldest_accepted = self.clock.now().timestamp() - self.max_age_seconds;
        if timestamp < oldest_accepted {
            return Err(AuthenticityError::StaleRequest {
                timestamp,
                max_age_seconds: self.max_age_seconds,
            });
        }

        let received = match signature.split_once('=') {
            Some((version, digest)) if version == SIGNATURE_VERSION => digest,
            _ => return Err(AuthenticityError::SignatureMismatch),
        };
        let expected = hex::encode(hmac_digest(
            self.secret.expose_secret(),
            raw_timestamp,
            request.body(),
        ));

        if constant_time_compare(received.as_bytes(), expected.as_bytes()) {
            Ok(())
        } else {
            Err(AuthenticityError::SignatureMismatch)
        }
    }
}

impl std::fmt::Debug for SigningSecretAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningSecretAuthenticator")
            .field("secret", &"<REDACTED>")
            .field("max_age_seconds", &self.max_age_seconds)
            .finish()
    }
}

#[async_trait]
impl RequestAuthenticator for SigningSecretAuthenticator {
    #[instrument(skip(self, request), fields(body_len = request.body().len()))]
    async fn authenticate(&self, request: &RawRequest) -> Result<Value, VerificationError> {
        if let Err(e) = self.verify(request) {
            warn!(error = %e, "Rejecting request that failed signature verification");
            return Err(e.into());
        }

        let body = parse_body(request.content_type(), request.body()).map_err(|e| {
            warn!(error = %e, "Rejecting authentic request with malformed body");
            e
        })?;
        debug!("Request signature verified and body decoded");
        Ok(body)
    }
}

// ============================================================================
// Body Decoding
// ============================================================================

/// Decode a verified body into a JSON object.
///
/// Form-encoded bodies become an object of string values, unless they carry a
/// `payload` field, in which case that field is decoded as JSON and becomes
/// the body. Any other content type is parsed as JSON.
pub fn parse_body(content_type: Option<&str>, body: &[u8]) -> Result<Value, BodyParseError> {
    let decoded = if is_form_encoded(content_type) {
        let mut fields = Map::new();
        for (key, value) in url::form_urlencoded::parse(body) {
            fields.insert(key.into_owned(), Value::String(value.into_owned()));
        }
        match fields.remove("payload") {
            Some(Value::String(payload)) => {
                serde_json::from_str(&payload).map_err(BodyParseError::Payload)?
            }
            _ => Value::Object(fields),
        }
    } else {
        serde_json::from_slice(body)?
    };

    if decoded.is_object() {
        Ok(decoded)
    } else {
        Err(BodyParseError::NotAnObject)
    }
}

fn is_form_encoded(content_type: Option<&str>) -> bool {
    content_type
        .and_then(|value| value.split(';').next())
        .map(|mime| mime.trim().eq_ignore_ascii_case(FORM_CONTENT_TYPE))
        .unwrap_or(false)
}

#[cfg(test)]
#[path = "verification_tests.rs"]
mod tests;
