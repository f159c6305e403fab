//! Error types for the session SDK
//!
//! Every failure maps onto one of four families: the identity provider
//! rejected us (authentication), the network let us down (transient), the
//! secure store failed (local state), or the SDK was misused
//! (configuration). Callers branch on [`AuthError::is_transient`] and
//! [`AuthError::is_definitive_rejection`] rather than on variants.

use hostauth_common::ConfigurationError;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;

/// Result type for session operations
pub type AuthResult<T> = Result<T, AuthError>;

/// Session SDK errors
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Identity provider answered with a non-success status
    #[error("Authentication failed with status {status}: {body}")]
    Authentication {
        status: StatusCode,
        headers: HeaderMap,
        body: String,
    },

    /// Timeout, DNS, refused connection and friends
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Secure credential store read/write failure
    #[error("Credential storage error: {0}")]
    StorageError(String),

    /// Configuration rejected or incomplete
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// SDK used before `configure`
    #[error("SDK is not configured")]
    NotConfigured,

    /// Operation needs a signed-in session
    #[error("No authenticated session")]
    NotAuthenticated,

    /// Unknown region key
    #[error("Unknown region: {0}")]
    InvalidRegion(String),

    /// Caller passed an unusable argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Token could not be decoded
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Successful status with a body we could not use
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// PKCE verifier missing or unusable
    #[error("PKCE error: {0}")]
    PkceError(String),

    /// Another refresh already holds the in-flight slot
    #[error("Token refresh already in progress")]
    RefreshInProgress,

    /// Result arrived after the session it belonged to was cleared
    #[error("Session was cleared while the request was in flight")]
    SessionCleared,

    /// Generic IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}

impl AuthError {
    /// Whether retrying later may succeed without user interaction
    pub fn is_transient(&self) -> bool {
        match self {
            AuthError::NetworkError(_) => true,
            AuthError::Authentication { status, .. } => !Self::status_is_definitive(*status),
            _ => false,
        }
    }

    /// Whether the identity provider definitively refused the credentials
    ///
    /// 4xx answers are final except 408 and 429; 5xx answers are treated as
    /// a provider outage and leave the session intact.
    pub fn is_definitive_rejection(&self) -> bool {
        match self {
            AuthError::Authentication { status, .. } => Self::status_is_definitive(*status),
            _ => false,
        }
    }

    /// Response headers of an authentication failure
    pub fn headers(&self) -> Option<&HeaderMap> {
        match self {
            AuthError::Authentication { headers, .. } => Some(headers),
            _ => None,
        }
    }

    fn status_is_definitive(status: StatusCode) -> bool {
        status.is_client_error()
            && status != StatusCode::REQUEST_TIMEOUT
            && status != StatusCode::TOO_MANY_REQUESTS
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            AuthError::InvalidResponse(err.to_string())
        } else {
            AuthError::NetworkError(err.to_string())
        }
    }
}

impl From<ConfigurationError> for AuthError {
    fn from(err: ConfigurationError) -> Self {
        AuthError::ConfigError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejection(status: u16) -> AuthError {
        AuthError::Authentication {
            status: StatusCode::from_u16(status).unwrap(),
            headers: HeaderMap::new(),
            body: String::new(),
        }
    }

    #[test]
    fn test_client_errors_are_definitive() {
        assert!(rejection(400).is_definitive_rejection());
        assert!(rejection(401).is_definitive_rejection());
        assert!(!rejection(401).is_transient());
    }

    #[test]
    fn test_throttling_and_outages_are_transient() {
        for status in [408, 429, 500, 503] {
            let err = rejection(status);
            assert!(err.is_transient(), "{status} should be transient");
            assert!(!err.is_definitive_rejection());
        }
    }

    #[test]
    fn test_network_error_is_transient() {
        assert!(AuthError::NetworkError("connection refused".into()).is_transient());
        assert!(!AuthError::StorageError("disk full".into()).is_transient());
        assert!(!AuthError::NotConfigured.is_transient());
    }

    #[test]
    fn test_headers_exposed_on_rejection() {
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", "abc".parse().unwrap());
        let err = AuthError::Authentication {
            status: StatusCode::UNAUTHORIZED,
            headers,
            body: "{}".into(),
        };
        assert_eq!(err.headers().unwrap()["x-request-id"], "abc");
        assert!(AuthError::NotConfigured.headers().is_none());
    }
}
