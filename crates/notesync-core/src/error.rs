//! Error types for notesync-core

use thiserror::Error;

/// Result type alias using notesync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in notesync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A record failed local data validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote backend error
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Expired, invalid or missing session
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Another sync run holds the sync lock
    #[error("A sync is already in progress")]
    SyncAlreadyInProgress,

    /// A run did not finish within its execution grace period
    #[error("Sync did not finish within {0:?}")]
    DeadlineExceeded(std::time::Duration),

    /// Transaction-level failure
    #[error("Transaction error: {0}")]
    Transaction(String),
}

impl Error {
    /// Whether retrying the failed operation can succeed.
    ///
    /// Only transport failures, 5xx and 429 responses qualify. Local errors,
    /// authentication failures and client errors never do.
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Remote(error) => error.is_retryable(),
            _ => false,
        }
    }

    /// Whether this error means the session is no longer usable.
    pub const fn is_auth(&self) -> bool {
        match self {
            Self::Auth(_) => true,
            Self::Remote(error) => error.is_auth(),
            _ => false,
        }
    }

    /// Whether this error is an HTTP 429 response.
    pub const fn is_rate_limited(&self) -> bool {
        matches!(self, Self::Remote(RemoteError::Http { status: 429, .. }))
    }
}

/// Failure reported by the remote data backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The request timed out
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// No network connectivity
    #[error("No connectivity: {0}")]
    Offline(String),

    /// Host name resolution failed
    #[error("DNS lookup failed: {0}")]
    Dns(String),

    /// The connection was reset mid-request
    #[error("Connection reset: {0}")]
    ConnectionReset(String),

    /// Non-success HTTP response
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The response body could not be decoded
    #[error("Invalid response payload: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Create an HTTP error from a status code and message.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Offline(_) | Self::Dns(_) | Self::ConnectionReset(_) => true,
            Self::Http { status, .. } => *status == 429 || (*status >= 500 && *status <= 599),
            Self::Decode(_) => false,
        }
    }

    pub const fn is_auth(&self) -> bool {
        matches!(self, Self::Http { status: 401 | 403, .. })
    }

    /// Whether the backend reported the resource as already gone.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Http { status: 404, .. })
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(error: reqwest::Error) -> Self {
        let message = error.to_string();
        if error.is_timeout() {
            return Self::Timeout(message);
        }
        if let Some(status) = error.status() {
            return Self::http(status.as_u16(), message);
        }
        if error.is_decode() || error.is_body() {
            return Self::Decode(message);
        }

        let detail = source_chain(&error).to_ascii_lowercase();
        if detail.contains("dns") || detail.contains("failed to lookup address") {
            Self::Dns(message)
        } else if detail.contains("reset") || detail.contains("broken pipe") {
            Self::ConnectionReset(message)
        } else if error.is_connect() || error.is_request() {
            Self::Offline(message)
        } else {
            Self::ConnectionReset(message)
        }
    }
}

fn source_chain(error: &dyn std::error::Error) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_remote_errors_are_retryable() {
        for error in [
            RemoteError::Timeout("t".into()),
            RemoteError::Offline("o".into()),
            RemoteError::Dns("d".into()),
            RemoteError::ConnectionReset("r".into()),
            RemoteError::http(500, "boom"),
            RemoteError::http(503, "unavailable"),
            RemoteError::http(429, "slow down"),
        ] {
            assert!(Error::from(error).is_retryable());
        }
    }

    #[test]
    fn client_and_auth_errors_are_terminal() {
        for status in [400, 401, 403, 404] {
            assert!(!Error::from(RemoteError::http(status, "no")).is_retryable());
        }
        assert!(!Error::Validation("bad".into()).is_retryable());
        assert!(!Error::Auth("expired".into()).is_retryable());
        assert!(!Error::SyncAlreadyInProgress.is_retryable());
    }

    #[test]
    fn auth_classification() {
        assert!(Error::from(RemoteError::http(401, "expired")).is_auth());
        assert!(Error::from(RemoteError::http(403, "denied")).is_auth());
        assert!(Error::Auth("missing".into()).is_auth());
        assert!(!Error::from(RemoteError::http(404, "gone")).is_auth());
        assert!(!Error::from(RemoteError::Timeout("t".into())).is_auth());
    }

    #[test]
    fn rate_limit_detection() {
        assert!(Error::from(RemoteError::http(429, "slow down")).is_rate_limited());
        assert!(!Error::from(RemoteError::http(503, "busy")).is_rate_limited());
    }
}
