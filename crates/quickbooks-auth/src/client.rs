//! Intuit OAuth client
//!
//! Speaks the authorization-code and refresh-token grants against the Intuit
//! token endpoint and issues bearer-authenticated GETs against the accounting
//! API. This layer never retries and never refreshes on its own; that policy
//! belongs to the caller.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use common::Secret;
use reqwest::Url;
use reqwest::header::ACCEPT;
use tracing::{debug, info, instrument, warn};

use crate::authorize::{build_authorize_url, parse_callback};
use crate::constants::{AUTHORIZE_ENDPOINT, Environment, REVOKE_ENDPOINT, TOKEN_ENDPOINT};
use crate::error::{Error, Result};
use crate::token::{TokenResponse, TokenSet};

/// Longest vendor error body copied into an error message.
const MAX_ERROR_BODY: usize = 512;

/// Default bound on every outbound vendor call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Static OAuth application configuration.
#[derive(Debug, Clone)]
pub struct OAuthSettings {
    pub client_id: String,
    pub client_secret: Secret<String>,
    pub redirect_uri: String,
    pub environment: Environment,
    pub authorize_endpoint: String,
    pub token_endpoint: String,
    pub revoke_endpoint: String,
    pub timeout: Duration,
}

impl OAuthSettings {
    /// Settings pointing at the public Intuit endpoints.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: Secret<String>,
        redirect_uri: impl Into<String>,
        environment: Environment,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
            redirect_uri: redirect_uri.into(),
            environment,
            authorize_endpoint: AUTHORIZE_ENDPOINT.to_string(),
            token_endpoint: TOKEN_ENDPOINT.to_string(),
            revoke_endpoint: REVOKE_ENDPOINT.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Raw outcome of an authenticated API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

/// The two OAuth operations the refresh-on-401 policy depends on.
///
/// Boxed futures keep the trait dyn-compatible so callers can hold an
/// `Arc<dyn OAuthApi>` and tests can substitute scripted fakes.
pub trait OAuthApi: Send + Sync {
    /// Refresh-token grant. Must return a set with the same `realm_id`.
    fn refresh<'a>(
        &'a self,
        tokens: &'a TokenSet,
    ) -> Pin<Box<dyn Future<Output = Result<TokenSet>> + Send + 'a>>;

    /// Bearer-authenticated GET. Non-2xx statuses are returned, not raised.
    fn call_api<'a>(
        &'a self,
        tokens: &'a TokenSet,
        url: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<ApiResponse>> + Send + 'a>>;
}

pub struct OAuthClient {
    settings: OAuthSettings,
    authorize_endpoint: Url,
    http: reqwest::Client,
}

impl OAuthClient {
    pub fn new(settings: OAuthSettings, http: reqwest::Client) -> Result<Self> {
        let authorize_endpoint = Url::parse(&settings.authorize_endpoint)
            .map_err(|e| Error::Decode(format!("invalid authorize endpoint: {e}")))?;
        Ok(Self {
            settings,
            authorize_endpoint,
            http,
        })
    }

    pub fn environment(&self) -> Environment {
        self.settings.environment
    }

    pub fn redirect_uri(&self) -> &str {
        &self.settings.redirect_uri
    }

    /// Authorization URL for the consent screen. No network call.
    pub fn build_authorize_url(&self, scopes: &[String], state: &str) -> String {
        build_authorize_url(
            &self.authorize_endpoint,
            &self.settings.client_id,
            &self.settings.redirect_uri,
            scopes,
            state,
        )
    }

    /// Exchange the code carried by `callback_url` for a token set.
    ///
    /// The realm comes from the callback's `realmId`. A rejected code is an
    /// `AuthExchange` error and is never retried.
    #[instrument(skip_all)]
    pub async fn exchange_code_for_tokens(&self, callback_url: &str) -> Result<TokenSet> {
        let params = parse_callback(callback_url)?;

        let response = self
            .http
            .post(&self.settings.token_endpoint)
            .basic_auth(
                &self.settings.client_id,
                Some(self.settings.client_secret.expose()),
            )
            .header(ACCEPT, "application/json")
            .timeout(self.settings.timeout)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", params.code.as_str()),
                ("redirect_uri", self.settings.redirect_uri.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::from_send("token exchange request failed", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = read_error_body(response).await;
            warn!(status = status.as_u16(), "authorization code rejected");
            return Err(Error::AuthExchange(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        let token_response = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| Error::AuthExchange(format!("invalid token response: {e}")))?;

        info!(realm_id = %params.realm_id, "authorization code exchanged");
        Ok(token_response.into_token_set(params.realm_id))
    }

    /// Refresh-token grant. The returned set keeps `tokens.realm_id`.
    ///
    /// 400/401/403 mean the refresh token is dead and map to `Refresh`.
    #[instrument(skip_all, fields(realm_id = %tokens.realm_id))]
    pub async fn refresh(&self, tokens: &TokenSet) -> Result<TokenSet> {
        let response = self
            .http
            .post(&self.settings.token_endpoint)
            .basic_auth(
                &self.settings.client_id,
                Some(self.settings.client_secret.expose()),
            )
            .header(ACCEPT, "application/json")
            .timeout(self.settings.timeout)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", tokens.refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::from_send("token refresh request failed", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = read_error_body(response).await;
            if matches!(status.as_u16(), 400 | 401 | 403) {
                return Err(Error::Refresh(format!(
                    "refresh token rejected ({status}): {body}"
                )));
            }
            return Err(Error::Http(format!(
                "token refresh returned {status}: {body}"
            )));
        }

        let token_response = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| Error::Decode(format!("invalid refresh response: {e}")))?;

        debug!("access token refreshed");
        Ok(token_response.into_token_set(tokens.realm_id.clone()))
    }

    /// Authenticated GET against an absolute URL.
    #[instrument(skip_all, fields(realm_id = %tokens.realm_id))]
    pub async fn call_api(&self, tokens: &TokenSet, url: &str) -> Result<ApiResponse> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&tokens.access_token)
            .header(ACCEPT, "application/json")
            .timeout(self.settings.timeout)
            .send()
            .await
            .map_err(|e| Error::from_send("QuickBooks API request failed", e))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| Error::from_send("reading QuickBooks API response", e))?;

        debug!(status, bytes = body.len(), "QuickBooks API responded");
        Ok(ApiResponse { status, body })
    }

    /// Revoke a token at Intuit. Revoking the refresh token also kills the
    /// access tokens issued from it.
    #[instrument(skip_all)]
    pub async fn revoke(&self, token: &str) -> Result<()> {
        let response = self
            .http
            .post(&self.settings.revoke_endpoint)
            .basic_auth(
                &self.settings.client_id,
                Some(self.settings.client_secret.expose()),
            )
            .header(ACCEPT, "application/json")
            .timeout(self.settings.timeout)
            .json(&serde_json::json!({ "token": token }))
            .send()
            .await
            .map_err(|e| Error::from_send("token revoke request failed", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = read_error_body(response).await;
            return Err(Error::Http(format!("revoke returned {status}: {body}")));
        }
        info!("token revoked");
        Ok(())
    }
}

impl OAuthApi for OAuthClient {
    fn refresh<'a>(
        &'a self,
        tokens: &'a TokenSet,
    ) -> Pin<Box<dyn Future<Output = Result<TokenSet>> + Send + 'a>> {
        Box::pin(OAuthClient::refresh(self, tokens))
    }

    fn call_api<'a>(
        &'a self,
        tokens: &'a TokenSet,
        url: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<ApiResponse>> + Send + 'a>> {
        Box::pin(OAuthClient::call_api(self, tokens, url))
    }
}

async fn read_error_body(response: reqwest::Response) -> String {
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("<no body>"));
    truncate(&body, MAX_ERROR_BODY)
}

/// Truncate on a char boundary, marking the cut with `...`.
pub fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}
