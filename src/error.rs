use thiserror::Error;

/// Error taxonomy for the collector core.
///
/// The variants map directly onto the retry policy: only `Connection` is
/// ever retried. `Auth` is fatal under basic auth and triggers a
/// re-authentication under session auth; everything else terminates the
/// operation that raised it.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// Transport-level failure (connect refused, timeout, reset).
    #[error("connection failed: {0}")]
    Connection(String),

    /// Credentials rejected by the cluster.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Unexpected HTTP status or response shape. Never retried.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A field the API contract guarantees was missing or non-numeric.
    #[error("data invariant violated: {0}")]
    DataInvariant(String),

    /// A bounded retry loop ran out of attempts.
    #[error("retry limit exhausted: {0}")]
    RetryExhausted(String),

    /// A required sink setting is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),
}

impl CollectorError {
    /// Whether the enclosing operation may retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    /// Classify a reqwest transport error.
    ///
    /// Connect-phase and timeout errors are the retryable connection class;
    /// anything else (bad TLS handshake, malformed response) is a protocol
    /// error and surfaces immediately.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            Self::Connection(err.to_string())
        } else {
            Self::Protocol(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, CollectorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_connection_is_retryable() {
        assert!(CollectorError::Connection("refused".into()).is_retryable());
        assert!(!CollectorError::Auth("denied".into()).is_retryable());
        assert!(!CollectorError::Protocol("418".into()).is_retryable());
        assert!(!CollectorError::DataInvariant("cpu".into()).is_retryable());
        assert!(!CollectorError::RetryExhausted("writes".into()).is_retryable());
        assert!(!CollectorError::Config("port".into()).is_retryable());
    }
}
