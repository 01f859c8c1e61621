//! Intuit OAuth and QuickBooks Online endpoints
//!
//! These identify public endpoints only. The client secret and the issued
//! tokens never appear here.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// Authorization endpoint the browser is sent to for consent
pub const AUTHORIZE_ENDPOINT: &str = "https://appcenter.intuit.com/connect/oauth2";

/// Token endpoint for both the authorization-code and refresh-token grants
pub const TOKEN_ENDPOINT: &str = "https://oauth.platform.intuit.com/oauth2/v1/tokens/bearer";

/// Revocation endpoint used on disconnect
pub const REVOKE_ENDPOINT: &str = "https://developer.api.intuit.com/v2/oauth2/tokens/revoke";

/// Accounting API host for sandbox companies
pub const SANDBOX_API_HOST: &str = "https://sandbox-quickbooks.api.intuit.com";

/// Accounting API host for production companies
pub const PRODUCTION_API_HOST: &str = "https://quickbooks.api.intuit.com";

/// Scope granting read access to the accounting API
pub const ACCOUNTING_SCOPE: &str = "com.intuit.quickbooks.accounting";

/// Minor version pinned on every accounting API request
pub const MINOR_VERSION: &str = "75";

/// Which Intuit environment the app credentials belong to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Sandbox,
    Production,
}

impl Environment {
    /// Accounting API host for this environment.
    pub fn api_host(self) -> &'static str {
        match self {
            Environment::Sandbox => SANDBOX_API_HOST,
            Environment::Production => PRODUCTION_API_HOST,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Sandbox => "sandbox",
            Environment::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    /// Case-insensitive; an empty value selects the sandbox.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" => Ok(Environment::Production),
            "sandbox" | "" => Ok(Environment::Sandbox),
            other => Err(format!(
                "unknown QuickBooks environment {other:?} (expected sandbox or production)"
            )),
        }
    }
}
