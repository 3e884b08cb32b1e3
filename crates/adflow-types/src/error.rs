use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Retry-relevant class of a collaborator failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Validation,
    Auth,
    RateLimited,
    Transient,
    Conflict,
}

/// Normalized error returned by every ad platform capability.
///
/// Adapters map transport and API specific failures onto exactly these five
/// classes before anything reaches the retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "class", rename_all = "snake_case")]
pub enum PlatformError {
    /// The request was malformed or rejected on its content.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Credentials are invalid or expired.
    #[error("authentication error: {message}")]
    Auth { message: String },

    /// The platform throttled the caller.
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry_after_ms: Option<u64>,
    },

    /// Server-side or network failure that may succeed on retry.
    #[error("transient error: {message}")]
    Transient { message: String },

    /// The operation conflicts with existing state (e.g. duplicate name).
    #[error("resource conflict: {message}")]
    Conflict { message: String },
}

impl PlatformError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    pub fn rate_limited(message: impl Into<String>, retry_after_ms: Option<u64>) -> Self {
        Self::RateLimited {
            message: message.into(),
            retry_after_ms,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// The retry class of this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            PlatformError::Validation { .. } => ErrorClass::Validation,
            PlatformError::Auth { .. } => ErrorClass::Auth,
            PlatformError::RateLimited { .. } => ErrorClass::RateLimited,
            PlatformError::Transient { .. } => ErrorClass::Transient,
            PlatformError::Conflict { .. } => ErrorClass::Conflict,
        }
    }

    /// Platform-supplied wait hint, if any.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            PlatformError::RateLimited { retry_after_ms, .. } => *retry_after_ms,
            _ => None,
        }
    }
}

/// Errors from repository operations (used by trait definitions in adflow-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_error_class() {
        assert_eq!(PlatformError::validation("x").class(), ErrorClass::Validation);
        assert_eq!(PlatformError::auth("x").class(), ErrorClass::Auth);
        assert_eq!(
            PlatformError::rate_limited("x", None).class(),
            ErrorClass::RateLimited
        );
        assert_eq!(PlatformError::transient("x").class(), ErrorClass::Transient);
        assert_eq!(PlatformError::conflict("x").class(), ErrorClass::Conflict);
    }

    #[test]
    fn test_platform_error_display() {
        let err = PlatformError::conflict("duplicate campaign name");
        assert_eq!(err.to_string(), "resource conflict: duplicate campaign name");
    }

    #[test]
    fn test_retry_after_only_on_rate_limit() {
        assert_eq!(
            PlatformError::rate_limited("slow down", Some(1500)).retry_after_ms(),
            Some(1500)
        );
        assert_eq!(PlatformError::transient("502").retry_after_ms(), None);
    }

    #[test]
    fn test_platform_error_serde_tagged() {
        let err = PlatformError::rate_limited("throttled", Some(200));
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["class"], "rate_limited");
        let parsed: PlatformError = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, err);
    }

    #[test]
    fn test_repository_error_display() {
        let err = RepositoryError::Query("syntax error".to_string());
        assert_eq!(err.to_string(), "query error: syntax error");
    }
}
