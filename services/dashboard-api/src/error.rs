//! Request-time errors and their JSON rendering
//!
//! Every JSON endpoint fails with `{"error": ..., "message": ...}`. The OAuth
//! callback is the exception and renders HTML itself.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error(transparent)]
    QuickBooks(#[from] quickbooks_client::Error),

    #[error("Shopify is not configured")]
    ShopifyNotConfigured,

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        use quickbooks_client::Error as Qb;
        match self {
            ApiError::NotAuthenticated | ApiError::QuickBooks(Qb::Unauthenticated) => (
                StatusCode::UNAUTHORIZED,
                "Not authenticated",
                "Connect to QuickBooks first".into(),
            ),
            ApiError::QuickBooks(Qb::Refresh(_)) => (
                StatusCode::UNAUTHORIZED,
                "QuickBooks session expired",
                "Reconnect to QuickBooks to continue".into(),
            ),
            ApiError::QuickBooks(Qb::ApiCall { status, message }) => (
                StatusCode::from_u16(*status)
                    .ok()
                    .filter(|s| s.is_client_error() || s.is_server_error())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                "QuickBooks API error",
                message.clone(),
            ),
            ApiError::QuickBooks(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "QuickBooks request failed",
                e.to_string(),
            ),
            ApiError::ShopifyNotConfigured => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Shopify not configured",
                "Set SHOPIFY_STORE_DOMAIN and SHOPIFY_ACCESS_TOKEN".into(),
            ),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "Bad request", msg.clone()),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error",
                msg.clone(),
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = self.parts();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error, %message, "request failed");
        }
        (status, Json(serde_json::json!({ "error": error, "message": message }))).into_response()
    }
}
