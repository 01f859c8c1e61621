//! Dashboard API
//!
//! Single-binary backend for the finance dashboard:
//! 1. Runs the QuickBooks Online OAuth flow and holds the resulting token set
//! 2. Serves QuickBooks entity lists, refreshing the access token on 401
//! 3. Proxies read-only Shopify Admin REST calls with the store's access token
//! 4. Exposes `/health` and Prometheus `/metrics`

mod auth;
mod config;
mod controllers;
mod error;
mod gate;
mod metrics;
mod shopify;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::{Extension, State};
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use quickbooks_auth::{CredentialStore, OAuthClient, TokenSet};
use quickbooks_client::{Entity, Resources};
use reqwest::Url;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::auth::PendingStates;
use crate::config::Config;
use crate::controllers::PublicConfig;
use crate::metrics::ServiceMetrics;
use crate::shopify::ShopifyState;

/// How long in-flight requests get to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    store: Arc<CredentialStore>,
    oauth: Arc<OAuthClient>,
    resources: Arc<Resources>,
    pending: PendingStates,
    scopes: Arc<Vec<String>>,
    frontend_url: Arc<str>,
    shopify: Option<ShopifyState>,
    public_config: Arc<PublicConfig>,
    metrics: ServiceMetrics,
    prometheus: PrometheusHandle,
}

/// Wire the vendor clients and the credential store from a validated config.
async fn build_state(config: &Config, prometheus: PrometheusHandle) -> Result<AppState> {
    let http = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;

    let oauth = Arc::new(
        OAuthClient::new(config.oauth_settings()?, http.clone())
            .context("failed to configure QuickBooks OAuth client")?,
    );

    let store = match &config.server.token_file {
        Some(path) => CredentialStore::load(path.clone())
            .await
            .with_context(|| format!("failed to load tokens from {}", path.display()))?,
        None => CredentialStore::in_memory(),
    };

    let resources = Resources::new(oauth.clone(), config.api_base_url());

    let shopify = match &config.shopify {
        Some(shopify) => Some(ShopifyState {
            client: http.clone(),
            base_url: Url::parse(&shopify.base_url())
                .context("invalid Shopify API base URL")?,
            access_token: shopify
                .access_token
                .clone()
                .context("Shopify access token missing after validation")?,
            store_domain: shopify.store_domain.clone(),
            timeout: config.timeout(),
        }),
        None => None,
    };

    let public_config = PublicConfig {
        environment: oauth.environment().as_str().to_string(),
        redirect_uri: oauth.redirect_uri().to_string(),
        frontend_url: config.server.frontend_url.clone(),
        entities: Entity::ALL.iter().map(|e| e.route()).collect(),
        shopify_configured: shopify.is_some(),
        shopify_store_domain: config.shopify.as_ref().map(|s| s.store_domain.clone()),
    };

    Ok(AppState {
        store: Arc::new(store),
        oauth,
        resources: Arc::new(resources),
        pending: PendingStates::default(),
        scopes: Arc::new(config.quickbooks.scopes.clone()),
        frontend_url: Arc::from(config.server.frontend_url.as_str()),
        shopify,
        public_config: Arc::new(public_config),
        metrics: ServiceMetrics::new(),
        prometheus,
    })
}

/// Build the axum router with all routes and shared state.
///
/// QuickBooks data routes sit behind the connection gate. Everything is
/// wrapped in request metrics and a concurrency limit of `max_connections`.
fn build_router(state: AppState, max_connections: usize) -> Router {
    let mut data = Router::new().route("/api/company-info", get(controllers::company_info));
    for entity in Entity::ALL {
        data = data.route(
            &format!("/api/{}", entity.route()),
            get(
                move |State(state): State<AppState>, Extension(tokens): Extension<TokenSet>| async move {
                    controllers::list_entity(&state, tokens, entity).await
                },
            ),
        );
    }
    let data = data.route_layer(middleware::from_fn_with_state(
        state.clone(),
        gate::require_connected,
    ));

    Router::new()
        .route("/api/auth/url", get(auth::auth_url))
        .route("/api/callback", get(auth::callback))
        .route("/callback", get(auth::callback))
        .route("/api/auth/status", get(auth::status))
        .route("/api/auth/disconnect", post(auth::disconnect))
        .route("/api/config", get(controllers::public_config))
        .route("/api/shopify/{*path}", get(shopify::proxy))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .merge(data)
        .layer(middleware::from_fn_with_state(
            state.metrics.clone(),
            metrics::track,
        ))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs, filter from LOG_LEVEL then RUST_LOG
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting dashboard-api");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    match &config_path {
        Some(path) => info!(path = %path.display(), "loading configuration"),
        None => info!("no config file, using environment only"),
    }

    let config = Config::load(config_path.as_deref()).context("failed to load configuration")?;

    info!(
        listen_addr = %config.server.listen_addr,
        environment = %config.quickbooks.environment,
        frontend_url = %config.server.frontend_url,
        persistent_tokens = config.server.token_file.is_some(),
        shopify = config.shopify.is_some(),
        "configuration loaded"
    );

    let state = build_state(&config, prometheus_handle).await?;
    let metrics = state.metrics.clone();
    let app = build_router(state, config.server.max_connections);

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timer starts at signal receipt, not at server start.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => info!("all in-flight requests drained"),
        Ok(Ok(Err(e))) => error!(error = %e, "server error during shutdown"),
        Ok(Err(e)) => error!(error = %e, "server task panicked"),
        Err(_) => warn!(
            drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "drain timeout exceeded, forcing shutdown"
        ),
    }

    info!(
        requests_served = metrics.requests_total.load(Ordering::Relaxed),
        "shutdown complete"
    );
    Ok(())
}

/// Liveness plus connection state. Always 200: a disconnected QuickBooks
/// company is an operator action, not a service fault.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.metrics.started_at.elapsed().as_secs();
    let requests = state.metrics.requests_total.load(Ordering::Relaxed);
    let errors = state.metrics.errors_total.load(Ordering::Relaxed);
    let quickbooks = if state.store.has().await {
        "connected"
    } else {
        "disconnected"
    };
    let shopify = if state.shopify.is_some() {
        "configured"
    } else {
        "not_configured"
    };

    axum::Json(serde_json::json!({
        "status": "healthy",
        "quickbooks": quickbooks,
        "shopify": shopify,
        "uptime_seconds": uptime,
        "requests_served": requests,
        "errors_total": errors,
    }))
}

/// Prometheus metrics endpoint, text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::extract::{Form, Query};
    use axum::http::{HeaderMap, Request, StatusCode};
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use tower::ServiceExt;

    /// Create a PrometheusHandle without installing a global recorder.
    fn test_prometheus_handle() -> PrometheusHandle {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .build_recorder()
            .handle()
    }

    async fn spawn(app: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[derive(Default)]
    struct IntuitCounters {
        refreshes: AtomicUsize,
        revokes: AtomicUsize,
        api_calls: AtomicUsize,
    }

    fn token_body(access: &str, refresh: &str) -> String {
        format!(
            r#"{{"access_token":"{access}","refresh_token":"{refresh}","expires_in":3600,"x_refresh_token_expires_in":8726400,"token_type":"bearer"}}"#
        )
    }

    /// Mock Intuit: code "good" and refresh tokens "rt_live" and "rt_slow"
    /// (answered after 400ms) are accepted; access token "at_expired" gets
    /// 401 from the accounting API.
    async fn start_intuit() -> (String, Arc<IntuitCounters>) {
        let counters = Arc::new(IntuitCounters::default());

        let token_counters = counters.clone();
        let revoke_counters = counters.clone();
        let query_counters = counters.clone();

        let app = Router::new()
            .route(
                "/token",
                post(move |Form(form): Form<HashMap<String, String>>| {
                    let counters = token_counters.clone();
                    async move {
                        match (
                            form.get("grant_type").map(String::as_str),
                            form.get("code").or(form.get("refresh_token")).map(String::as_str),
                        ) {
                            (Some("authorization_code"), Some("good")) => {
                                (StatusCode::OK, token_body("at_1", "rt_1"))
                            }
                            (Some("refresh_token"), Some("rt_live")) => {
                                counters.refreshes.fetch_add(1, Ordering::SeqCst);
                                (StatusCode::OK, token_body("at_fresh", "rt_fresh"))
                            }
                            (Some("refresh_token"), Some("rt_slow")) => {
                                counters.refreshes.fetch_add(1, Ordering::SeqCst);
                                tokio::time::sleep(Duration::from_millis(400)).await;
                                (StatusCode::OK, token_body("at_fresh", "rt_fresh"))
                            }
                            _ => (
                                StatusCode::BAD_REQUEST,
                                r#"{"error":"invalid_grant"}"#.to_string(),
                            ),
                        }
                    }
                }),
            )
            .route(
                "/revoke",
                post(move || {
                    let counters = revoke_counters.clone();
                    async move {
                        counters.revokes.fetch_add(1, Ordering::SeqCst);
                        StatusCode::OK
                    }
                }),
            )
            .route(
                "/v3/company/{realm}/query",
                get(
                    move |headers: HeaderMap, Query(params): Query<HashMap<String, String>>| {
                        let counters = query_counters.clone();
                        async move {
                            counters.api_calls.fetch_add(1, Ordering::SeqCst);
                            let auth = headers
                                .get("authorization")
                                .and_then(|v| v.to_str().ok())
                                .unwrap_or_default();
                            if auth == "Bearer at_expired" {
                                return (
                                    StatusCode::UNAUTHORIZED,
                                    r#"{"Fault":{"Error":[{"Message":"AuthenticationFailed"}],"type":"AUTHENTICATION"}}"#
                                        .to_string(),
                                );
                            }
                            let table = params
                                .get("query")
                                .and_then(|q| q.split_whitespace().nth(3))
                                .unwrap_or("Unknown")
                                .to_string();
                            if table == "Bill" {
                                return (
                                    StatusCode::BAD_REQUEST,
                                    r#"{"Fault":{"Error":[{"Message":"Error parsing query","Detail":"QueryParserError"}],"type":"ValidationFault"}}"#
                                        .to_string(),
                                );
                            }
                            (
                                StatusCode::OK,
                                format!(r#"{{"QueryResponse":{{"{table}":[{{"Id":"1"}},{{"Id":"2"}}]}}}}"#),
                            )
                        }
                    },
                ),
            )
            .route(
                "/v3/company/{realm}/companyinfo/{id}",
                get(|| async { r#"{"CompanyInfo":{"CompanyName":"Sandbox Company_US_1"}}"# }),
            );

        (spawn(app).await, counters)
    }

    /// Mock Shopify that echoes what it received; `missing.json` is a 404.
    async fn start_shopify() -> String {
        let app = Router::new().fallback(|request: Request<Body>| async move {
            let path = request.uri().path().to_string();
            if path.ends_with("/missing.json") {
                return (
                    StatusCode::NOT_FOUND,
                    [("link", "")],
                    r#"{"errors":"Not Found"}"#.to_string(),
                );
            }
            let body = serde_json::json!({
                "path": path,
                "query": request.uri().query().unwrap_or(""),
                "token": request
                    .headers()
                    .get("x-shopify-access-token")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or(""),
            });
            (
                StatusCode::OK,
                [("link", "<https://next>; rel=\"next\"")],
                body.to_string(),
            )
        });
        spawn(app).await
    }

    fn test_config(intuit: &str, shopify: Option<&str>) -> Config {
        let mut toml = format!(
            r#"
[server]
timeout_secs = 2

[quickbooks]
client_id = "client-id"
authorize_endpoint = "{intuit}/authorize"
token_endpoint = "{intuit}/token"
revoke_endpoint = "{intuit}/revoke"
api_base_url = "{intuit}"
"#
        );
        if let Some(shop) = shopify {
            toml.push_str(&format!(
                "\n[shopify]\nstore_domain = \"demo.myshopify.com\"\napi_base_url = \"{shop}/admin/api/2024-10\"\n"
            ));
        }
        Config::from_sources(&toml, |key| match key {
            "QB_CLIENT_SECRET" => Some("client-secret".into()),
            "SHOPIFY_ACCESS_TOKEN" => Some("shpat_test".into()),
            _ => None,
        })
        .unwrap()
    }

    async fn test_app(intuit: &str, shopify: Option<&str>) -> (Router, AppState) {
        let config = test_config(intuit, shopify);
        let state = build_state(&config, test_prometheus_handle()).await.unwrap();
        (build_router(state.clone(), 1000), state)
    }

    async fn call(app: &Router, method: &str, uri: &str) -> (StatusCode, HeaderMap, String) {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        (status, headers, String::from_utf8(body.to_vec()).unwrap())
    }

    fn json(body: &str) -> serde_json::Value {
        serde_json::from_str(body).unwrap()
    }

    #[tokio::test]
    async fn health_reports_disconnected_quickbooks() {
        let (app, state) = test_app("http://127.0.0.1:1", None).await;
        state.metrics.requests_total.fetch_add(5, Ordering::Relaxed);

        let (status, _, body) = call(&app, "GET", "/health").await;
        assert_eq!(status, StatusCode::OK);
        let body = json(&body);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["quickbooks"], "disconnected");
        assert_eq!(body["shopify"], "not_configured");
        assert_eq!(body["requests_served"], 5);
        assert!(body["uptime_seconds"].is_u64());
    }

    #[tokio::test]
    async fn health_reports_connected_quickbooks() {
        let (app, state) = test_app("http://127.0.0.1:1", None).await;
        state
            .store
            .set(TokenSet::new("a", "r", "123"))
            .await
            .unwrap();

        let (_, _, body) = call(&app, "GET", "/health").await;
        assert_eq!(json(&body)["quickbooks"], "connected");
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_prometheus_format() {
        let (app, _) = test_app("http://127.0.0.1:1", None).await;
        let (status, headers, _) = call(&app, "GET", "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(
            headers["content-type"]
                .to_str()
                .unwrap()
                .contains("text/plain")
        );
    }

    #[tokio::test]
    async fn data_routes_require_connection() {
        let (intuit, counters) = start_intuit().await;
        let (app, _) = test_app(&intuit, None).await;

        for entity in Entity::ALL {
            let (status, _, body) = call(&app, "GET", &format!("/api/{}", entity.route())).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{}", entity.route());
            assert_eq!(json(&body)["error"], "Not authenticated");
        }
        let (status, _, _) = call(&app, "GET", "/api/company-info").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(counters.api_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn incomplete_token_set_is_not_connected() {
        let (intuit, counters) = start_intuit().await;
        let (app, state) = test_app(&intuit, None).await;
        state
            .store
            .set(TokenSet::new("at", "rt", ""))
            .await
            .unwrap();

        let (status, _, _) = call(&app, "GET", "/api/invoices").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(counters.api_calls.load(Ordering::SeqCst), 0);

        let (_, _, body) = call(&app, "GET", "/api/auth/status").await;
        let body = json(&body);
        assert_eq!(body["connected"], false);
        assert_eq!(body["hasTokens"], true);
        assert!(body["realmId"].is_null());
    }

    #[tokio::test]
    async fn connect_flow_stores_tokens_and_redirects() {
        let (intuit, _) = start_intuit().await;
        let (app, state) = test_app(&intuit, None).await;

        let (status, _, body) = call(&app, "GET", "/api/auth/url").await;
        assert_eq!(status, StatusCode::OK);
        let auth_url = json(&body)["authUrl"].as_str().unwrap().to_string();
        assert!(auth_url.starts_with(&format!("{intuit}/authorize?")));
        let url = reqwest::Url::parse(&auth_url).unwrap();
        let params: HashMap<String, String> = url.query_pairs().into_owned().collect();
        assert_eq!(params["client_id"], "client-id");
        assert_eq!(params["response_type"], "code");
        let csrf = params["state"].clone();

        let (status, _, page) = call(
            &app,
            "GET",
            &format!("/api/callback?code=good&realmId=4620816365&state={csrf}"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(page.contains("http://localhost:5173/?connected=true"), "{page}");
        assert!(!page.contains("at_1"), "tokens must not appear in the page");
        assert_eq!(
            state.store.get().await,
            Some(TokenSet::new("at_1", "rt_1", "4620816365"))
        );

        let (_, _, body) = call(&app, "GET", "/api/auth/status").await;
        let body = json(&body);
        assert_eq!(body["connected"], true);
        assert_eq!(body["hasTokens"], true);
        assert_eq!(body["realmId"], "4620816365");
        assert!(!body.to_string().contains("at_1"));
    }

    #[tokio::test]
    async fn callback_alias_path_works() {
        let (intuit, _) = start_intuit().await;
        let (app, state) = test_app(&intuit, None).await;
        let csrf = state.pending.issue().await;

        let (_, _, page) = call(
            &app,
            "GET",
            &format!("/callback?code=good&realmId=42&state={csrf}"),
        )
        .await;
        assert!(page.contains("connected=true"));
        assert!(state.store.has().await);
    }

    #[tokio::test]
    async fn callback_with_unknown_state_fails() {
        let (intuit, _) = start_intuit().await;
        let (app, state) = test_app(&intuit, None).await;
        state.pending.issue().await;

        let (_, _, page) = call(
            &app,
            "GET",
            "/api/callback?code=good&realmId=42&state=forged",
        )
        .await;
        assert!(page.contains("error=auth_failed"));
        assert!(state.store.get().await.is_none());
    }

    #[tokio::test]
    async fn callback_state_cannot_be_replayed() {
        let (intuit, _) = start_intuit().await;
        let (app, state) = test_app(&intuit, None).await;
        let csrf = state.pending.issue().await;
        let uri = format!("/api/callback?code=good&realmId=42&state={csrf}");

        let (_, _, first) = call(&app, "GET", &uri).await;
        assert!(first.contains("connected=true"));
        state.store.clear().await.unwrap();

        let (_, _, second) = call(&app, "GET", &uri).await;
        assert!(second.contains("error=auth_failed"));
        assert!(state.store.get().await.is_none());
    }

    #[tokio::test]
    async fn callback_with_rejected_code_fails() {
        let (intuit, _) = start_intuit().await;
        let (app, state) = test_app(&intuit, None).await;
        let csrf = state.pending.issue().await;

        let (_, _, page) = call(
            &app,
            "GET",
            &format!("/api/callback?code=used&realmId=42&state={csrf}"),
        )
        .await;
        assert!(page.contains("error=auth_failed"));
        assert!(state.store.get().await.is_none());
    }

    #[tokio::test]
    async fn callback_with_vendor_error_fails() {
        let (intuit, _) = start_intuit().await;
        let (app, state) = test_app(&intuit, None).await;
        let csrf = state.pending.issue().await;

        let (_, _, page) = call(
            &app,
            "GET",
            &format!("/api/callback?error=access_denied&state={csrf}"),
        )
        .await;
        assert!(page.contains("error=auth_failed"));
        assert!(state.store.get().await.is_none());
    }

    #[tokio::test]
    async fn entity_list_returns_records() {
        let (intuit, counters) = start_intuit().await;
        let (app, state) = test_app(&intuit, None).await;
        state
            .store
            .set(TokenSet::new("at_ok", "rt_live", "123"))
            .await
            .unwrap();

        let (status, _, body) = call(&app, "GET", "/api/customers").await;
        assert_eq!(status, StatusCode::OK);
        let records = json(&body);
        assert_eq!(records.as_array().unwrap().len(), 2);
        assert_eq!(records[0]["Id"], "1");
        assert_eq!(counters.refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn company_info_returns_object() {
        let (intuit, _) = start_intuit().await;
        let (app, state) = test_app(&intuit, None).await;
        state
            .store
            .set(TokenSet::new("at_ok", "rt_live", "123"))
            .await
            .unwrap();

        let (status, _, body) = call(&app, "GET", "/api/company-info").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["CompanyName"], "Sandbox Company_US_1");
    }

    #[tokio::test]
    async fn expired_access_token_is_refreshed_and_stored() {
        let (intuit, counters) = start_intuit().await;
        let (app, state) = test_app(&intuit, None).await;
        state
            .store
            .set(TokenSet::new("at_expired", "rt_live", "123"))
            .await
            .unwrap();

        let (status, _, body) = call(&app, "GET", "/api/invoices").await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(json(&body).as_array().unwrap().len(), 2);
        assert_eq!(counters.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(counters.api_calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            state.store.get().await,
            Some(TokenSet::new("at_fresh", "rt_fresh", "123"))
        );
        assert!(!body.contains("at_fresh"));
    }

    #[tokio::test]
    async fn disconnect_during_refresh_stays_disconnected() {
        let (intuit, counters) = start_intuit().await;
        let (app, state) = test_app(&intuit, None).await;
        state
            .store
            .set(TokenSet::new("at_expired", "rt_slow", "123"))
            .await
            .unwrap();

        let data_app = app.clone();
        let pending = tokio::spawn(async move { call(&data_app, "GET", "/api/invoices").await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        let (status, _, _) = call(&app, "POST", "/api/auth/disconnect").await;
        assert_eq!(status, StatusCode::OK);

        let (status, _, body) = pending.await.unwrap();
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(counters.refreshes.load(Ordering::SeqCst), 1);
        assert!(state.store.get().await.is_none());

        let (_, _, body) = call(&app, "GET", "/api/auth/status").await;
        assert_eq!(json(&body)["connected"], false);
        assert_eq!(json(&body)["hasTokens"], false);
    }

    #[tokio::test]
    async fn reconnect_during_refresh_keeps_new_connection() {
        let (intuit, _) = start_intuit().await;
        let (app, state) = test_app(&intuit, None).await;
        state
            .store
            .set(TokenSet::new("at_expired", "rt_slow", "123"))
            .await
            .unwrap();

        let data_app = app.clone();
        let pending = tokio::spawn(async move { call(&data_app, "GET", "/api/invoices").await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        let newer = TokenSet::new("at_other", "rt_other", "456");
        state.store.set(newer.clone()).await.unwrap();

        pending.await.unwrap();
        assert_eq!(state.store.get().await, Some(newer));
    }

    #[tokio::test]
    async fn rejected_refresh_token_disconnects() {
        let (intuit, _) = start_intuit().await;
        let (app, state) = test_app(&intuit, None).await;
        state
            .store
            .set(TokenSet::new("at_expired", "rt_revoked", "123"))
            .await
            .unwrap();

        let (status, _, body) = call(&app, "GET", "/api/invoices").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json(&body)["error"], "QuickBooks session expired");
        assert!(!body.contains("rt_revoked"));
        assert!(state.store.get().await.is_none());

        let (_, _, body) = call(&app, "GET", "/api/auth/status").await;
        assert_eq!(json(&body)["connected"], false);
    }

    #[tokio::test]
    async fn vendor_error_is_mirrored() {
        let (intuit, counters) = start_intuit().await;
        let (app, state) = test_app(&intuit, None).await;
        state
            .store
            .set(TokenSet::new("at_ok", "rt_live", "123"))
            .await
            .unwrap();

        let (status, _, body) = call(&app, "GET", "/api/bills").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body = json(&body);
        assert_eq!(body["error"], "QuickBooks API error");
        assert!(body["message"].as_str().unwrap().contains("Error parsing query"));
        assert_eq!(counters.refreshes.load(Ordering::SeqCst), 0);
        assert!(state.store.has().await);
    }

    #[tokio::test]
    async fn unreachable_vendor_is_500() {
        let (app, state) = test_app("http://127.0.0.1:1", None).await;
        state
            .store
            .set(TokenSet::new("at_ok", "rt_live", "123"))
            .await
            .unwrap();

        let (status, _, body) = call(&app, "GET", "/api/items").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json(&body)["error"], "QuickBooks request failed");
        assert!(state.store.has().await, "transport failures keep the connection");
    }

    #[tokio::test]
    async fn disconnect_clears_and_revokes() {
        let (intuit, counters) = start_intuit().await;
        let (app, state) = test_app(&intuit, None).await;
        state
            .store
            .set(TokenSet::new("at_ok", "rt_live", "123"))
            .await
            .unwrap();

        let (status, _, body) = call(&app, "POST", "/api/auth/disconnect").await;
        assert_eq!(status, StatusCode::OK);
        let body = json(&body);
        assert_eq!(body["success"], true);
        assert!(body["message"].is_string());
        assert!(state.store.get().await.is_none());
        assert_eq!(counters.revokes.load(Ordering::SeqCst), 1);

        let (status, _, _) = call(&app, "GET", "/api/invoices").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn disconnect_succeeds_when_revoke_fails() {
        let (app, state) = test_app("http://127.0.0.1:1", None).await;
        state
            .store
            .set(TokenSet::new("at_ok", "rt_live", "123"))
            .await
            .unwrap();

        let (status, _, body) = call(&app, "POST", "/api/auth/disconnect").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["success"], true);
        assert!(state.store.get().await.is_none());
    }

    #[tokio::test]
    async fn disconnect_when_disconnected_is_ok() {
        let (intuit, counters) = start_intuit().await;
        let (app, _) = test_app(&intuit, None).await;

        let (status, _, _) = call(&app, "POST", "/api/auth/disconnect").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(counters.revokes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn public_config_hides_secrets() {
        let shop = start_shopify().await;
        let (app, _) = test_app("http://127.0.0.1:1", Some(&shop)).await;

        let (status, _, body) = call(&app, "GET", "/api/config").await;
        assert_eq!(status, StatusCode::OK);
        let config = json(&body);
        assert_eq!(config["environment"], "sandbox");
        assert_eq!(config["redirectUri"], "http://localhost:3001/api/callback");
        assert_eq!(config["shopifyConfigured"], true);
        assert_eq!(config["shopifyStoreDomain"], "demo.myshopify.com");
        assert!(!body.contains("client-secret"));
        assert!(!body.contains("shpat_test"));
    }

    #[tokio::test]
    async fn shopify_proxy_forwards_path_query_and_token() {
        let shop = start_shopify().await;
        let (app, _) = test_app("http://127.0.0.1:1", Some(&shop)).await;

        let (status, headers, body) = call(
            &app,
            "GET",
            "/api/shopify/orders?status=any&limit=50&created_at_min=2024-01-01T00%3A00%3A00Z",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let echoed = json(&body);
        assert_eq!(echoed["path"], "/admin/api/2024-10/orders.json");
        assert_eq!(
            echoed["query"],
            "status=any&limit=50&created_at_min=2024-01-01T00%3A00%3A00Z"
        );
        assert_eq!(echoed["token"], "shpat_test");
        assert_eq!(headers["link"], "<https://next>; rel=\"next\"");
    }

    #[tokio::test]
    async fn shopify_proxy_mirrors_upstream_error_status() {
        let shop = start_shopify().await;
        let (app, _) = test_app("http://127.0.0.1:1", Some(&shop)).await;

        let (status, _, body) = call(&app, "GET", "/api/shopify/missing").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json(&body)["errors"], "Not Found");
    }

    #[tokio::test]
    async fn shopify_proxy_rejects_traversal() {
        let shop = start_shopify().await;
        let (app, _) = test_app("http://127.0.0.1:1", Some(&shop)).await;

        let (status, _, _) = call(&app, "GET", "/api/shopify/orders/%2E%2E/%2E%2E/oauth").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn shopify_proxy_rejects_backslash_traversal() {
        let shop = start_shopify().await;
        let (app, _) = test_app("http://127.0.0.1:1", Some(&shop)).await;

        let (status, _, body) =
            call(&app, "GET", "/api/shopify/orders%5C..%5C..%5C..%5Cshop").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!body.contains("shpat_test"));
    }

    #[tokio::test]
    async fn shopify_proxy_unreachable_is_502() {
        let (app, _) = test_app("http://127.0.0.1:1", Some("http://127.0.0.1:1")).await;

        let (status, _, body) = call(&app, "GET", "/api/shopify/orders").await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        let body = json(&body);
        assert_eq!(body["error"], "Shopify request failed");
        assert!(body["request_id"].as_str().unwrap().starts_with("req_"));
    }

    #[tokio::test]
    async fn shopify_unconfigured_is_503() {
        let (app, _) = test_app("http://127.0.0.1:1", None).await;
        let (status, _, body) = call(&app, "GET", "/api/shopify/orders").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json(&body)["error"], "Shopify not configured");
    }

    #[tokio::test]
    async fn persisted_tokens_are_served_after_restart() {
        let (intuit, _) = start_intuit().await;
        let dir = tempfile::tempdir().unwrap();
        let token_file = dir.path().join("tokens.json");

        let mut config = test_config(&intuit, None);
        config.server.token_file = Some(token_file.clone());
        let state = build_state(&config, test_prometheus_handle()).await.unwrap();
        state
            .store
            .set(TokenSet::new("at_ok", "rt_live", "123"))
            .await
            .unwrap();
        drop(state);

        let restarted = build_state(&config, test_prometheus_handle()).await.unwrap();
        let app = build_router(restarted, 1000);
        let (status, _, _) = call(&app, "GET", "/api/accounts").await;
        assert_eq!(status, StatusCode::OK);
    }
}
