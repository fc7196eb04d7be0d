use thiserror::Error;

/// Why a single fetch failed. Never fatal to a run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("HTTP status {0}")]
    HttpStatus(u16),

    #[error("network error: {0}")]
    Network(String),
}

impl FetchError {
    /// Rate limiting and server errors are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::HttpStatus(429) | FetchError::HttpStatus(500..=599))
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if let Some(status) = err.status() {
            FetchError::HttpStatus(status.as_u16())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    #[error("required field `{0}` not found")]
    MissingRequiredField(&'static str),
}

/// Page-level failures. The page is skipped, the run continues.
#[derive(Debug, Error)]
pub enum PageError {
    #[error("could not open session: {0}")]
    Session(FetchError),

    #[error("listing fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("listing page yielded no cards (blocked, or genuinely empty)")]
    EmptyResult,
}

/// Durability failure. Aborts the run.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_only_rate_limits_and_server_errors() {
        assert!(FetchError::HttpStatus(429).is_retryable());
        assert!(FetchError::HttpStatus(503).is_retryable());
        assert!(!FetchError::HttpStatus(403).is_retryable());
        assert!(!FetchError::HttpStatus(404).is_retryable());
        assert!(!FetchError::Timeout.is_retryable());
        assert!(!FetchError::Network("reset".into()).is_retryable());
    }
}
