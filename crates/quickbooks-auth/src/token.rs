//! Token set model and the Intuit token endpoint response

use std::fmt;

use serde::{Deserialize, Serialize};

/// The one credential the dashboard holds: a bearer token pair bound to a
/// QuickBooks company (`realm_id`).
///
/// Valid only when all three fields are non-empty. A refresh replaces both
/// tokens and keeps `realm_id`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: String,
    pub realm_id: String,
}

impl TokenSet {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        realm_id: impl Into<String>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            realm_id: realm_id.into(),
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.access_token.is_empty() && !self.refresh_token.is_empty() && !self.realm_id.is_empty()
    }
}

// Token values must never reach logs, so Debug only shows the realm.
impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("realm_id", &self.realm_id)
            .finish()
    }
}

/// Response from the token endpoint for both exchange and refresh.
///
/// Intuit rotates the refresh token on every refresh, so the returned
/// `refresh_token` always supersedes the one that was sent.
#[derive(Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// Seconds until the access token expires
    #[serde(default)]
    pub expires_in: u64,
    /// Seconds until the refresh token expires
    #[serde(default)]
    pub x_refresh_token_expires_in: u64,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl TokenResponse {
    /// Bind the issued tokens to a company.
    pub fn into_token_set(self, realm_id: impl Into<String>) -> TokenSet {
        TokenSet {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            realm_id: realm_id.into(),
        }
    }
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("expires_in", &self.expires_in)
            .field("x_refresh_token_expires_in", &self.x_refresh_token_expires_in)
            .field("token_type", &self.token_type)
            .finish_non_exhaustive()
    }
}
