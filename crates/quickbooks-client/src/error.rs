//! Error types for QuickBooks resource calls

/// Tagged failure of a QuickBooks call, as seen by controllers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No usable token set; the vendor was never contacted.
    #[error("not authenticated with QuickBooks")]
    Unauthenticated,

    /// The refresh token is dead. The caller must clear stored credentials.
    #[error("QuickBooks token refresh failed: {0}")]
    Refresh(String),

    /// Vendor answered with a non-success status (including a second 401).
    #[error("QuickBooks API returned {status}: {message}")]
    ApiCall { status: u16, message: String },

    #[error("QuickBooks request timed out: {0}")]
    Timeout(String),

    #[error("QuickBooks request failed: {0}")]
    Transport(String),

    #[error("unexpected QuickBooks response: {0}")]
    Decode(String),
}

impl From<quickbooks_auth::Error> for Error {
    fn from(e: quickbooks_auth::Error) -> Self {
        use quickbooks_auth::Error as Auth;
        match e {
            Auth::Refresh(msg) => Error::Refresh(msg),
            Auth::Timeout(msg) => Error::Timeout(msg),
            Auth::Http(msg) => Error::Transport(msg),
            Auth::Decode(msg) | Auth::CredentialParse(msg) => Error::Decode(msg),
            Auth::AuthExchange(msg) | Auth::Io(msg) => Error::Transport(msg),
        }
    }
}

/// Result alias for resource calls.
pub type Result<T> = std::result::Result<T, Error>;
