//! Prometheus metrics exposition
//!
//! - `dashboard_requests_total` (counter): labels `route`, `status`, `method`
//! - `dashboard_request_duration_seconds` (histogram): labels `route`, `status`
//! - `dashboard_upstream_errors_total` (counter): label `error_type`
//!
//! The QuickBooks client crate adds `quickbooks_api_calls_total` and
//! `quickbooks_token_refresh_total` to the same recorder.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use axum::extract::{MatchedPath, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use tracing::Instrument;

const DURATION_METRIC: &str = "dashboard_request_duration_seconds";

/// 5ms up to the 60s ceiling of a slow vendor call plus one retry.
const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

/// Counters surfaced on `/health`.
#[derive(Clone)]
pub struct ServiceMetrics {
    pub requests_total: Arc<AtomicU64>,
    pub errors_total: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            requests_total: Arc::new(AtomicU64::new(0)),
            errors_total: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }
}

fn builder() -> PrometheusBuilder {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(DURATION_METRIC.to_string()), DURATION_BUCKETS)
        .expect("histogram buckets are non-empty")
}

/// Install the global Prometheus recorder and return a handle for `/metrics`.
pub fn install_recorder() -> PrometheusHandle {
    builder()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record a completed request.
pub fn record_request(route: &str, status: u16, method: &str, duration_secs: f64) {
    let status = status.to_string();
    metrics::counter!(
        "dashboard_requests_total",
        "route" => route.to_string(),
        "status" => status.clone(),
        "method" => method.to_string()
    )
    .increment(1);
    metrics::histogram!(DURATION_METRIC, "route" => route.to_string(), "status" => status)
        .record(duration_secs);
}

/// Record an upstream (Shopify or Intuit) failure by kind.
pub fn record_upstream_error(error_type: &str) {
    metrics::counter!("dashboard_upstream_errors_total", "error_type" => error_type.to_string())
        .increment(1);
}

/// `req_<uuid>` assigned to every inbound request.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Middleware counting every request by its route template and running the
/// handler inside a span that carries the request id.
///
/// Unrouted paths are grouped under `unmatched` so scanners cannot blow up
/// label cardinality.
pub async fn track(
    State(service): State<ServiceMetrics>,
    mut request: Request,
    next: Next,
) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let method = request.method().to_string();
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    request
        .extensions_mut()
        .insert(RequestId(request_id.clone()));
    let span = tracing::info_span!("request", %request_id, %method, %route);
    let start = Instant::now();

    let response = next.run(request).instrument(span).await;

    let status = response.status();
    service.requests_total.fetch_add(1, Ordering::Relaxed);
    if status.is_server_error() {
        service.errors_total.fetch_add(1, Ordering::Relaxed);
    }
    record_request(&route, status.as_u16(), &method, start.elapsed().as_secs_f64());
    response
}
