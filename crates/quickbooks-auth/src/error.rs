//! Error types for OAuth operations against Intuit

/// Errors from OAuth and authenticated-call operations.
///
/// `Http` and `Timeout` are transport failures; every other variant means the
/// vendor answered and said no.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("authorization code exchange failed: {0}")]
    AuthExchange(String),

    #[error("token refresh rejected: {0}")]
    Refresh(String),

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl Error {
    /// Map a reqwest send error, keeping timeouts distinguishable.
    pub(crate) fn from_send(context: &str, e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(format!("{context}: {e}"))
        } else {
            Error::Http(format!("{context}: {e}"))
        }
    }

    /// Whether a single retry of the same request is worthwhile.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Http(_) | Error::Timeout(_))
    }
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
