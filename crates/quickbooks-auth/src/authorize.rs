//! Authorization URL construction, anti-forgery state, and callback parsing
//!
//! The browser leg of the authorization-code flow: the dashboard sends the
//! user to Intuit with a random `state`, and Intuit redirects back with
//! `code`, `realmId`, and the same `state`.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use reqwest::Url;

use crate::error::{Error, Result};

/// Generate a random anti-forgery `state` value.
///
/// 32 random bytes, URL-safe base64 without padding (43 characters).
pub fn generate_state() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Build the authorization URL with all required OAuth parameters.
///
/// Pure function of its inputs; no network call. Scopes are space-joined
/// per RFC 6749 section 3.3.
pub fn build_authorize_url(
    endpoint: &Url,
    client_id: &str,
    redirect_uri: &str,
    scopes: &[String],
    state: &str,
) -> String {
    let mut url = endpoint.clone();
    url.query_pairs_mut()
        .append_pair("client_id", client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("response_type", "code")
        .append_pair("scope", &scopes.join(" "))
        .append_pair("state", state);
    url.into()
}

/// Query parameters Intuit appends to the redirect URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: String,
    pub realm_id: String,
    pub state: Option<String>,
}

/// Parse a callback URL, absolute or path-only.
///
/// A vendor-reported `error` (for example the user pressing "Cancel" on the
/// consent screen) and a missing `code` or `realmId` all fail the login.
pub fn parse_callback(callback_url: &str) -> Result<CallbackParams> {
    let url = Url::parse(callback_url)
        .or_else(|_| Url::parse("http://localhost/").and_then(|base| base.join(callback_url)))
        .map_err(|e| Error::AuthExchange(format!("malformed callback URL: {e}")))?;

    let mut code = None;
    let mut realm_id = None;
    let mut state = None;
    let mut vendor_error = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "realmId" => realm_id = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => vendor_error = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(err) = vendor_error {
        return Err(Error::AuthExchange(format!("authorization denied: {err}")));
    }

    let code = code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| Error::AuthExchange("callback is missing the authorization code".into()))?;
    let realm_id = realm_id
        .filter(|r| !r.is_empty())
        .ok_or_else(|| Error::AuthExchange("callback is missing realmId".into()))?;

    Ok(CallbackParams {
        code,
        realm_id,
        state,
    })
}
