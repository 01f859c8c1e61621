//! OAuth connection flow for the dashboard
//!
//! `GET /api/auth/url` hands the frontend a consent URL carrying a fresh
//! state value. Intuit redirects the browser to the callback, which checks
//! the state, exchanges the code, stores the token set and bounces the
//! browser back to the frontend with `?connected=true` or `?error=auth_failed`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::{OriginalUri, State};
use axum::response::Html;
use quickbooks_auth::{generate_state, parse_callback};
use reqwest::Url;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::AppState;
use crate::error::ApiError;

/// How long a consent URL stays usable.
pub const STATE_TTL: Duration = Duration::from_secs(600);

/// Outstanding authorization requests keyed by state value.
///
/// Each state is accepted once. Expired entries are swept lazily whenever a
/// new state is issued.
#[derive(Clone, Default)]
pub struct PendingStates {
    inner: Arc<Mutex<HashMap<String, Instant>>>,
}

impl PendingStates {
    pub async fn issue(&self) -> String {
        let state = generate_state();
        let now = Instant::now();
        let mut pending = self.inner.lock().await;
        pending.retain(|_, issued| now.duration_since(*issued) < STATE_TTL);
        pending.insert(state.clone(), now);
        state
    }

    /// Remove `state`, returning whether it was outstanding and unexpired.
    pub async fn consume(&self, state: &str) -> bool {
        let mut pending = self.inner.lock().await;
        pending
            .remove(state)
            .is_some_and(|issued| issued.elapsed() < STATE_TTL)
    }
}

/// `GET /api/auth/url`
pub async fn auth_url(State(state): State<AppState>) -> Json<Value> {
    let csrf = state.pending.issue().await;
    let url = state.oauth.build_authorize_url(&state.scopes, &csrf);
    Json(json!({ "authUrl": url }))
}

/// `GET /api/callback` and `GET /callback`
///
/// Always answers with an HTML page that redirects to the frontend; the
/// browser is mid-navigation here and has no use for JSON.
pub async fn callback(State(state): State<AppState>, OriginalUri(uri): OriginalUri) -> Html<String> {
    let callback_url = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    match complete_authorization(&state, callback_url).await {
        Ok(realm_id) => {
            info!(%realm_id, "QuickBooks connected");
            redirect_page(
                "Connected to QuickBooks",
                &frontend_redirect(&state.frontend_url, "connected", "true"),
            )
        }
        Err(reason) => {
            warn!(%reason, "QuickBooks authorization failed");
            redirect_page(
                "QuickBooks connection failed",
                &frontend_redirect(&state.frontend_url, "error", "auth_failed"),
            )
        }
    }
}

async fn complete_authorization(state: &AppState, callback_url: &str) -> Result<String, String> {
    let params = parse_callback(callback_url).map_err(|e| e.to_string())?;
    let Some(csrf) = params.state.as_deref() else {
        return Err("callback is missing the state parameter".into());
    };
    if !state.pending.consume(csrf).await {
        return Err("unknown or expired state parameter".into());
    }

    let tokens = state
        .oauth
        .exchange_code_for_tokens(callback_url)
        .await
        .map_err(|e| e.to_string())?;
    let realm_id = tokens.realm_id.clone();
    state
        .store
        .set(tokens)
        .await
        .map_err(|e| format!("storing tokens: {e}"))?;
    Ok(realm_id)
}

/// `GET /api/auth/status`
pub async fn status(State(state): State<AppState>) -> Json<Value> {
    let tokens = state.store.get().await;
    let connected = tokens.as_ref().is_some_and(|t| t.is_valid());
    let realm_id = tokens
        .as_ref()
        .filter(|t| !t.realm_id.is_empty())
        .map(|t| t.realm_id.clone());
    Json(json!({
        "connected": connected,
        "hasTokens": tokens.is_some(),
        "realmId": realm_id,
    }))
}

/// `POST /api/auth/disconnect`
///
/// The store is cleared before Intuit is told, so a slow or failing revoke
/// never leaves the dashboard connected.
pub async fn disconnect(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let previous = state
        .store
        .clear()
        .await
        .map_err(|e| ApiError::Internal(format!("clearing tokens: {e}")))?;

    if let Some(tokens) = previous {
        info!(realm_id = %tokens.realm_id, "QuickBooks disconnected");
        if let Err(e) = state.oauth.revoke(&tokens.refresh_token).await {
            crate::metrics::record_upstream_error("intuit_revoke");
            warn!(error = %e, "token revoke failed, tokens were still cleared locally");
        }
    }

    Ok(Json(json!({
        "success": true,
        "message": "Disconnected from QuickBooks",
    })))
}

fn frontend_redirect(frontend_url: &str, key: &str, value: &str) -> String {
    match Url::parse(frontend_url) {
        Ok(mut url) => {
            url.query_pairs_mut().append_pair(key, value);
            url.to_string()
        }
        Err(_) => format!("{frontend_url}?{key}={value}"),
    }
}

fn redirect_page(title: &str, target: &str) -> Html<String> {
    let target = escape_html(target);
    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <meta http-equiv="refresh" content="0;url={target}">
    <title>{title}</title>
</head>
<body>
    <p>{title}. Returning to the dashboard&hellip;</p>
    <p><a href="{target}">Continue</a></p>
</body>
</html>"#
    ))
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
