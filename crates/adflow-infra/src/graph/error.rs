//! Normalization of Graph API failures into [`PlatformError`] classes.

use adflow_types::error::PlatformError;
use serde::Deserialize;

/// Graph error codes that signal throttling (app, user, account and
/// business-use-case limits).
const RATE_LIMIT_CODES: &[i64] = &[4, 17, 32, 613, 80000, 80003, 80004, 80014];

/// Graph error codes for invalid or expired credentials.
const AUTH_CODES: &[i64] = &[102, 190];

/// Error envelope returned by the Graph API: `{"error": {...}}`.
#[derive(Debug, Default, Deserialize)]
struct Envelope {
    #[serde(default)]
    error: GraphErrorBody,
}

#[derive(Debug, Default, Deserialize)]
pub struct GraphErrorBody {
    #[serde(default)]
    pub message: String,
    pub code: Option<i64>,
    pub error_subcode: Option<i64>,
    #[serde(default)]
    pub is_transient: bool,
}

impl GraphErrorBody {
    /// Parse the error envelope; a non-JSON body becomes the message.
    pub fn parse(body: &str) -> Self {
        match serde_json::from_str::<Envelope>(body) {
            Ok(envelope) => envelope.error,
            Err(_) => Self {
                message: body.trim().to_string(),
                ..Self::default()
            },
        }
    }

    fn describe(&self, status: u16) -> String {
        let message = if self.message.is_empty() {
            "no error message"
        } else {
            self.message.as_str()
        };
        match (self.code, self.error_subcode) {
            (Some(code), Some(sub)) => format!("HTTP {status}: {message} (code {code}, subcode {sub})"),
            (Some(code), None) => format!("HTTP {status}: {message} (code {code})"),
            _ => format!("HTTP {status}: {message}"),
        }
    }

    fn is_duplicate(&self) -> bool {
        let message = self.message.to_ascii_lowercase();
        message.contains("duplicate") || message.contains("already exists")
    }
}

/// Classify a failed Graph response.
///
/// Precedence: rate limited, auth, conflict, transient, validation.
pub fn classify_error(status: u16, body: &str, retry_after_ms: Option<u64>) -> PlatformError {
    let error = GraphErrorBody::parse(body);
    let message = error.describe(status);
    let code = error.code.unwrap_or_default();

    if status == 429 || RATE_LIMIT_CODES.contains(&code) {
        return PlatformError::rate_limited(message, retry_after_ms);
    }
    if status == 401 || status == 403 || AUTH_CODES.contains(&code) {
        return PlatformError::auth(message);
    }
    if status == 409 || error.is_duplicate() {
        return PlatformError::conflict(message);
    }
    if status >= 500 || status == 408 || error.is_transient || code == 1 || code == 2 {
        return PlatformError::transient(message);
    }
    PlatformError::validation(message)
}

/// Classify a transport-level failure (no HTTP response).
pub fn classify_transport(err: &reqwest::Error) -> PlatformError {
    if err.is_timeout() {
        PlatformError::transient(format!("request timed out: {err}"))
    } else if err.is_decode() {
        PlatformError::transient(format!("invalid response body: {err}"))
    } else {
        PlatformError::transient(format!("HTTP request failed: {err}"))
    }
}

/// Whether a failed lookup means the object does not exist (HTTP 404, or
/// Graph code 100 with subcode 33).
pub fn is_missing_object(status: u16, body: &str) -> bool {
    if status == 404 {
        return true;
    }
    let error = GraphErrorBody::parse(body);
    error.code == Some(100) && error.error_subcode == Some(33)
}
