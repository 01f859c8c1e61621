//! QuickBooks Online OAuth library
//!
//! Authorization URL generation, authorization-code exchange, token refresh,
//! bearer-authenticated calls, and the single-slot credential store. This
//! crate has no dependency on the HTTP service and can be tested on its own.
//!
//! Credential flow:
//! 1. Service calls `authorize::generate_state()` and
//!    `OAuthClient::build_authorize_url()`
//! 2. The user consents at Intuit, which redirects back with `code` + `realmId`
//! 3. Service calls `OAuthClient::exchange_code_for_tokens()` with the callback URL
//! 4. The token set is stored via `CredentialStore::set()`
//! 5. On a 401, the caller runs `OAuthClient::refresh()` and stores the result

pub mod authorize;
pub mod client;
pub mod constants;
pub mod credentials;
pub mod error;
pub mod token;

pub use authorize::{CallbackParams, generate_state, parse_callback};
pub use client::{ApiResponse, DEFAULT_TIMEOUT, OAuthApi, OAuthClient, OAuthSettings};
pub use constants::*;
pub use credentials::CredentialStore;
pub use error::{Error, Result};
pub use token::{TokenResponse, TokenSet};
