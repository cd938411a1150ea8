// Error handling module
// Defines client error types and the refresh failure taxonomy

use thiserror::Error;

/// Why a request was rejected with 401
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    /// Access token rejected; eligible for one refresh-and-retry
    #[error("access token expired")]
    Expired,

    /// Rejected after the retry, or the refresh itself failed. Terminal.
    #[error("credentials invalid")]
    Invalid,
}

/// Errors returned by the portal client
#[derive(Error, Debug)]
pub enum ClientError {
    /// Transport failure, no response received (includes timeouts)
    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),

    /// 401 from the backend
    #[error("Unauthorized ({reason}): {body}")]
    Unauthorized { reason: AuthError, body: String },

    /// Any other non-2xx response
    #[error("HTTP error: {status} - {body}")]
    Http { status: u16, body: String },

    /// Response body did not match the expected shape
    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    /// Request could not be built
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Backend answered 2xx but without the fields we need
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ClientError {
    /// HTTP status carried by this error, if a response was received
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Unauthorized { .. } => Some(401),
            ClientError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Terminal authentication failure; callers should send the user to a login surface
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            ClientError::Unauthorized {
                reason: AuthError::Invalid,
                ..
            }
        )
    }

    pub fn is_network(&self) -> bool {
        matches!(self, ClientError::Network(_))
    }
}

/// Outcome of a failed token refresh, shared by every caller awaiting it
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshFailure {
    #[error("no refresh token stored")]
    NoRefreshToken,

    #[error("refresh rejected with status {status}")]
    Rejected { status: u16 },

    #[error("refresh request failed: {0}")]
    Network(String),

    #[error("refresh response does not contain accessToken")]
    MissingAccessToken,

    #[error("refresh response is not valid JSON: {0}")]
    InvalidResponse(String),

    /// The session was replaced (login) or ended (logout) while the refresh ran
    #[error("session changed during refresh")]
    Superseded,

    #[error("refresh task aborted: {0}")]
    Aborted(String),
}

impl From<tokio::task::JoinError> for RefreshFailure {
    fn from(err: tokio::task::JoinError) -> Self {
        RefreshFailure::Aborted(err.to_string())
    }
}

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ClientError::Unauthorized {
            reason: AuthError::Invalid,
            body: "token revoked".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Unauthorized (credentials invalid): token revoked"
        );

        let err = ClientError::Http {
            status: 404,
            body: "Not found".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP error: 404 - Not found");

        let err = ClientError::InvalidRequest("path must be relative".to_string());
        assert_eq!(err.to_string(), "Invalid request: path must be relative");
    }

    #[test]
    fn test_status() {
        let err = ClientError::Unauthorized {
            reason: AuthError::Expired,
            body: String::new(),
        };
        assert_eq!(err.status(), Some(401));

        let err = ClientError::Http {
            status: 503,
            body: String::new(),
        };
        assert_eq!(err.status(), Some(503));

        let err = ClientError::InvalidResponse("missing accessToken".to_string());
        assert_eq!(err.status(), None);
    }

    #[test]
    fn test_only_invalid_is_terminal() {
        let expired = ClientError::Unauthorized {
            reason: AuthError::Expired,
            body: String::new(),
        };
        let invalid = ClientError::Unauthorized {
            reason: AuthError::Invalid,
            body: String::new(),
        };
        assert!(!expired.is_auth_failure());
        assert!(invalid.is_auth_failure());
        assert!(!ClientError::Http {
            status: 403,
            body: String::new()
        }
        .is_auth_failure());
    }

    #[test]
    fn test_decode_error_conversion() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: ClientError = parse_err.into();
        assert!(matches!(err, ClientError::Decode(_)));
        assert!(!err.is_network());
    }

    #[test]
    fn test_refresh_failure_messages() {
        assert_eq!(
            RefreshFailure::Rejected { status: 401 }.to_string(),
            "refresh rejected with status 401"
        );
        assert_eq!(
            RefreshFailure::NoRefreshToken.to_string(),
            "no refresh token stored"
        );
    }
}
