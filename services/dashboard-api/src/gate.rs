//! Connection gate for the QuickBooks data routes
//!
//! Runs before every data controller. When the store holds a complete token
//! set, a snapshot of it rides along as a request extension; otherwise the
//! request ends here with 401 and no vendor call is made.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tracing::debug;

use crate::AppState;
use crate::error::ApiError;

pub async fn require_connected(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    match state.store.get().await {
        Some(tokens) if tokens.is_valid() => {
            request.extensions_mut().insert(tokens);
            Ok(next.run(request).await)
        }
        _ => {
            debug!(path = %request.uri().path(), "rejecting request, QuickBooks not connected");
            Err(ApiError::NotAuthenticated)
        }
    }
}
