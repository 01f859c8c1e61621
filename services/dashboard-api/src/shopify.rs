//! Shopify Admin REST proxy
//!
//! `GET /api/shopify/{*path}` becomes `GET {base}/{path}.json` with the
//! inbound query string forwarded verbatim and the store's access token
//! injected. The upstream response (status, headers minus hop-by-hop, body)
//! is returned as-is, so Shopify's own error bodies reach the frontend.

use std::time::Duration;

use axum::body::Body;
use axum::extract::{Extension, Path, RawQuery, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use common::Secret;
use reqwest::Url;
use tracing::{error, info, instrument, warn};

use crate::AppState;
use crate::error::ApiError;
use crate::metrics::{RequestId, record_upstream_error};

const ACCESS_TOKEN_HEADER: &str = "x-shopify-access-token";

/// Headers to strip from the upstream response (hop-by-hop per RFC 2616 Section 13.5.1)
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Timeouts get one retry after this delay; nothing else is retried.
const MAX_ATTEMPTS: u32 = 2;
const RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Clone)]
pub struct ShopifyState {
    pub client: reqwest::Client,
    /// `https://{store}/admin/api/{version}`
    pub base_url: Url,
    pub access_token: Secret<String>,
    pub store_domain: String,
    pub timeout: Duration,
}

fn error_response(status: StatusCode, error: &str, message: &str, request_id: &str) -> Response {
    let body = serde_json::json!({
        "error": error,
        "message": message,
        "request_id": request_id,
    });
    (status, axum::Json(body)).into_response()
}

/// Upstream URL for a decoded resource path, or `None` if the path could
/// escape the API root.
///
/// Segments are pushed one by one so nothing in them is read as a separator.
fn resource_url(base: &Url, path: &str, query: Option<&str>) -> Option<Url> {
    let path = path.trim_matches('/');
    if path.is_empty() {
        return None;
    }
    let mut segments: Vec<&str> = path.split('/').collect();
    if !segments.iter().all(|seg| is_plain_segment(seg)) {
        return None;
    }
    let last = segments.pop()?;
    let last = if last.ends_with(".json") {
        last.to_string()
    } else {
        format!("{last}.json")
    };

    let mut url = base.clone();
    url.path_segments_mut()
        .ok()?
        .pop_if_empty()
        .extend(segments)
        .push(&last);
    url.set_query(query.filter(|q| !q.is_empty()));
    Some(url)
}

/// `\` is a path separator for http(s) URLs, so it is refused outright
/// along with dot segments, URL delimiters and control characters.
fn is_plain_segment(seg: &str) -> bool {
    !seg.is_empty()
        && seg != "."
        && seg != ".."
        && !seg
            .chars()
            .any(|c| matches!(c, '\\' | '?' | '#') || c.is_control())
}

/// `GET /api/shopify/{*path}`
pub async fn proxy(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
) -> Response {
    let Some(shopify) = &state.shopify else {
        return ApiError::ShopifyNotConfigured.into_response();
    };
    forward(shopify, &path, query.as_deref(), &request_id).await
}

#[instrument(skip(shopify, query, request_id), fields(store = %shopify.store_domain))]
async fn forward(
    shopify: &ShopifyState,
    path: &str,
    query: Option<&str>,
    request_id: &str,
) -> Response {
    let Some(upstream_url) = resource_url(&shopify.base_url, path, query) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Bad request",
            "invalid Shopify resource path",
            request_id,
        );
    };

    let token = match HeaderValue::from_str(shopify.access_token.expose()) {
        Ok(mut v) => {
            v.set_sensitive(true);
            v
        }
        Err(_) => {
            error!("Shopify access token is not a valid header value");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error",
                "Shopify access token is malformed",
                request_id,
            );
        }
    };

    for attempt in 0..MAX_ATTEMPTS {
        if attempt > 0 {
            warn!(attempt, "retrying after Shopify timeout");
            tokio::time::sleep(RETRY_DELAY).await;
        }

        let req = shopify
            .client
            .get(upstream_url.clone())
            .header(ACCESS_TOKEN_HEADER, token.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(shopify.timeout);

        match req.send().await {
            Ok(upstream) => {
                let status = upstream.status();
                let headers = upstream.headers().clone();
                return match upstream.bytes().await {
                    Ok(body) => {
                        if !status.is_success() {
                            info!(status = status.as_u16(), "Shopify returned an error status");
                        }
                        let mut response = Response::builder().status(status);
                        for (name, value) in &headers {
                            if !is_hop_by_hop(name.as_str()) {
                                response = response.header(name, value);
                            }
                        }
                        response.body(Body::from(body)).unwrap_or_else(|e| {
                            error_response(
                                StatusCode::INTERNAL_SERVER_ERROR,
                                "Internal error",
                                &format!("response build error: {e}"),
                                request_id,
                            )
                        })
                    }
                    Err(e) => {
                        record_upstream_error("shopify_body");
                        error!(error = %e, "failed to read Shopify response body");
                        error_response(
                            StatusCode::BAD_GATEWAY,
                            "Shopify request failed",
                            &format!("upstream response read error: {e}"),
                            request_id,
                        )
                    }
                };
            }
            Err(e) if e.is_timeout() && attempt + 1 < MAX_ATTEMPTS => continue,
            Err(e) if e.is_timeout() => {
                record_upstream_error("shopify_timeout");
                error!(error = %e, attempts = MAX_ATTEMPTS, "Shopify timeout after retry");
                return error_response(
                    StatusCode::GATEWAY_TIMEOUT,
                    "Shopify request timed out",
                    &format!(
                        "no response after {}s ({MAX_ATTEMPTS} attempts)",
                        shopify.timeout.as_secs()
                    ),
                    request_id,
                );
            }
            Err(e) => {
                record_upstream_error("shopify_connection");
                error!(error = %e, "Shopify request failed");
                return error_response(
                    StatusCode::BAD_GATEWAY,
                    "Shopify request failed",
                    &format!("upstream error: {e}"),
                    request_id,
                );
            }
        }
    }

    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal error",
        "unexpected retry exhaustion",
        request_id,
    )
}

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}
