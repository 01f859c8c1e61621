//! QuickBooks data controllers
//!
//! Each handler runs behind `gate::require_connected` and receives the token
//! snapshot the gate attached. Refreshed tokens are written back to the
//! store unless the connection changed meanwhile; a dead refresh token
//! disconnects the dashboard.

use axum::Json;
use axum::extract::{Extension, State};
use quickbooks_auth::TokenSet;
use quickbooks_client::{CallOutcome, Entity};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::AppState;
use crate::error::ApiError;

/// `GET /api/{entity}`
pub async fn list_entity(
    state: &AppState,
    tokens: TokenSet,
    entity: Entity,
) -> Result<Json<Vec<Value>>, ApiError> {
    let outcome = state.resources.query_entity(entity, &tokens).await;
    let records = settle(state, &tokens, outcome).await?;
    Ok(Json(records))
}

/// `GET /api/company-info`
pub async fn company_info(
    State(state): State<AppState>,
    Extension(tokens): Extension<TokenSet>,
) -> Result<Json<Value>, ApiError> {
    let outcome = state.resources.company_info(&tokens).await;
    let info = settle(&state, &tokens, outcome).await?;
    Ok(Json(info))
}

/// Apply the side effects a call outcome asks for, then surface its result.
async fn settle<T>(
    state: &AppState,
    used: &TokenSet,
    outcome: CallOutcome<T>,
) -> Result<T, ApiError> {
    if let Some(fresh) = outcome.refreshed {
        match state.store.set_if_current(used, fresh).await {
            Ok(true) => {}
            Ok(false) => info!(realm_id = %used.realm_id, "connection changed during refresh, refreshed tokens discarded"),
            Err(e) => warn!(error = %e, "failed to persist refreshed tokens"),
        }
    }

    if let Err(quickbooks_client::Error::Refresh(_)) = &outcome.result {
        match state.store.clear_if_current(used).await {
            Ok(true) => info!(realm_id = %used.realm_id, "refresh token rejected, QuickBooks disconnected"),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "failed to clear rejected tokens"),
        }
    }

    outcome.result.map_err(ApiError::from)
}

/// Non-secret settings the frontend needs to render its connection panel.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicConfig {
    pub environment: String,
    pub redirect_uri: String,
    pub frontend_url: String,
    pub entities: Vec<&'static str>,
    pub shopify_configured: bool,
    pub shopify_store_domain: Option<String>,
}

/// `GET /api/config`
pub async fn public_config(State(state): State<AppState>) -> Json<PublicConfig> {
    Json((*state.public_config).clone())
}
