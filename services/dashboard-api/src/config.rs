//! Configuration types and loading
//!
//! Precedence: env vars > config file > defaults. The config file is
//! optional; a deployment can run purely from environment variables.
//! Secrets (QuickBooks client secret, Shopify access token) come from env
//! vars or `*_file` paths, never from the TOML body.

use common::Secret;
use quickbooks_auth::{ACCOUNTING_SCOPE, Environment, OAuthSettings};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "dashboard-api.toml";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub quickbooks: QuickBooksConfig,
    pub shopify: Option<ShopifyConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Bound on every outbound vendor call
    pub timeout_secs: u64,
    pub max_connections: usize,
    /// Where the browser lands after the OAuth callback
    pub frontend_url: String,
    /// Persist the token set here; in-memory only when unset
    pub token_file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 3001)),
            timeout_secs: 30,
            max_connections: 1000,
            frontend_url: "http://localhost:5173".into(),
            token_file: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct QuickBooksConfig {
    pub client_id: String,
    #[serde(skip)]
    pub client_secret: Option<Secret<String>>,
    pub client_secret_file: Option<PathBuf>,
    pub redirect_uri: String,
    pub environment: Environment,
    pub scopes: Vec<String>,
    pub authorize_endpoint: Option<String>,
    pub token_endpoint: Option<String>,
    pub revoke_endpoint: Option<String>,
    /// Accounting API base; defaults to the host for `environment`
    pub api_base_url: Option<String>,
}

impl Default for QuickBooksConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: None,
            client_secret_file: None,
            redirect_uri: "http://localhost:3001/api/callback".into(),
            environment: Environment::Sandbox,
            scopes: vec![ACCOUNTING_SCOPE.to_string()],
            authorize_endpoint: None,
            token_endpoint: None,
            revoke_endpoint: None,
            api_base_url: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ShopifyConfig {
    /// e.g. `my-store.myshopify.com`
    pub store_domain: String,
    #[serde(default = "default_shopify_api_version")]
    pub api_version: String,
    #[serde(skip)]
    pub access_token: Option<Secret<String>>,
    #[serde(default)]
    pub access_token_file: Option<PathBuf>,
    /// Overrides `https://{store_domain}/admin/api/{api_version}`
    #[serde(default)]
    pub api_base_url: Option<String>,
}

fn default_shopify_api_version() -> String {
    "2024-10".into()
}

impl ShopifyConfig {
    fn empty(store_domain: String) -> Self {
        Self {
            store_domain,
            api_version: default_shopify_api_version(),
            access_token: None,
            access_token_file: None,
            api_base_url: None,
        }
    }

    pub fn base_url(&self) -> String {
        match &self.api_base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!(
                "https://{}/admin/api/{}",
                self.store_domain, self.api_version
            ),
        }
    }
}

impl Config {
    /// Load from an optional TOML file, then overlay the process environment.
    pub fn load(path: Option<&Path>) -> common::Result<Self> {
        let contents = match path {
            Some(p) => std::fs::read_to_string(p)?,
            None => String::new(),
        };
        Self::from_sources(&contents, |key| std::env::var(key).ok())
    }

    /// Parse `toml`, apply overrides from `lookup`, resolve secrets, validate.
    pub fn from_sources(
        toml: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> common::Result<Self> {
        let mut config: Config = toml::from_str(toml)?;
        config.apply_overrides(&lookup)?;
        config.resolve_secrets(&lookup)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) -> common::Result<()> {
        if let Some(port) = lookup("PORT") {
            let port: u16 = port
                .trim()
                .parse()
                .map_err(|e| common::Error::Config(format!("PORT must be a port number: {e}")))?;
            self.server.listen_addr.set_port(port);
        }
        if let Some(url) = lookup("FRONTEND_URL") {
            self.server.frontend_url = url;
        }
        if let Some(path) = lookup("TOKEN_FILE") {
            self.server.token_file = Some(PathBuf::from(path));
        }

        let qb = &mut self.quickbooks;
        if let Some(id) = lookup("QB_CLIENT_ID") {
            qb.client_id = id;
        }
        if let Some(uri) = lookup("QB_REDIRECT_URI") {
            qb.redirect_uri = uri;
        }
        if let Some(env) = lookup("QB_ENVIRONMENT") {
            qb.environment = env.parse().map_err(common::Error::Config)?;
        }

        if let Some(domain) = lookup("SHOPIFY_STORE_DOMAIN") {
            match &mut self.shopify {
                Some(shopify) => shopify.store_domain = domain,
                None => self.shopify = Some(ShopifyConfig::empty(domain)),
            }
        }
        if let Some(shopify) = &mut self.shopify
            && let Some(version) = lookup("SHOPIFY_API_VERSION")
        {
            shopify.api_version = version;
        }
        Ok(())
    }

    /// Env var takes precedence over the `*_file` path.
    fn resolve_secrets(&mut self, lookup: &impl Fn(&str) -> Option<String>) -> common::Result<()> {
        let qb = &mut self.quickbooks;
        qb.client_secret = match lookup("QB_CLIENT_SECRET").and_then(Secret::non_empty) {
            Some(secret) => Some(secret),
            None => match &qb.client_secret_file {
                Some(path) => Secret::from_file(path)?,
                None => None,
            },
        };

        if let Some(shopify) = &mut self.shopify {
            shopify.access_token = match lookup("SHOPIFY_ACCESS_TOKEN").and_then(Secret::non_empty) {
                Some(token) => Some(token),
                None => match &shopify.access_token_file {
                    Some(path) => Secret::from_file(path)?,
                    None => None,
                },
            };
        }
        Ok(())
    }

    fn validate(&self) -> common::Result<()> {
        let qb = &self.quickbooks;
        if qb.client_id.trim().is_empty() {
            return Err(common::Error::missing("quickbooks.client_id", "QB_CLIENT_ID"));
        }
        if qb.client_secret.is_none() {
            return Err(common::Error::missing(
                "quickbooks client secret",
                "QB_CLIENT_SECRET or quickbooks.client_secret_file",
            ));
        }
        if qb.scopes.is_empty() {
            return Err(common::Error::Config(
                "quickbooks.scopes must not be empty".into(),
            ));
        }
        require_http("quickbooks.redirect_uri", &qb.redirect_uri)?;
        require_http("server.frontend_url", &self.server.frontend_url)?;
        for (name, value) in [
            ("quickbooks.authorize_endpoint", &qb.authorize_endpoint),
            ("quickbooks.token_endpoint", &qb.token_endpoint),
            ("quickbooks.revoke_endpoint", &qb.revoke_endpoint),
            ("quickbooks.api_base_url", &qb.api_base_url),
        ] {
            if let Some(url) = value {
                require_http(name, url)?;
            }
        }

        if self.server.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }
        if self.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if let Some(shopify) = &self.shopify {
            let domain = shopify.store_domain.trim();
            if domain.is_empty() || domain.contains('/') || domain.contains("://") {
                return Err(common::Error::Config(format!(
                    "shopify.store_domain must be a bare host like my-store.myshopify.com, got: {domain:?}"
                )));
            }
            if shopify.api_version.trim().is_empty() {
                return Err(common::Error::Config(
                    "shopify.api_version must not be empty".into(),
                ));
            }
            if shopify.access_token.is_none() {
                return Err(common::Error::missing(
                    "shopify access token",
                    "SHOPIFY_ACCESS_TOKEN or shopify.access_token_file",
                ));
            }
            if let Some(url) = &shopify.api_base_url {
                require_http("shopify.api_base_url", url)?;
            }
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.server.timeout_secs)
    }

    /// OAuth client settings with any endpoint overrides applied.
    pub fn oauth_settings(&self) -> common::Result<OAuthSettings> {
        let qb = &self.quickbooks;
        let secret = qb.client_secret.clone().ok_or_else(|| {
            common::Error::missing("quickbooks client secret", "QB_CLIENT_SECRET")
        })?;
        let mut settings = OAuthSettings::new(
            qb.client_id.clone(),
            secret,
            qb.redirect_uri.clone(),
            qb.environment,
        );
        if let Some(url) = &qb.authorize_endpoint {
            settings.authorize_endpoint = url.clone();
        }
        if let Some(url) = &qb.token_endpoint {
            settings.token_endpoint = url.clone();
        }
        if let Some(url) = &qb.revoke_endpoint {
            settings.revoke_endpoint = url.clone();
        }
        settings.timeout = self.timeout();
        Ok(settings)
    }

    pub fn api_base_url(&self) -> String {
        match &self.quickbooks.api_base_url {
            Some(url) => url.clone(),
            None => quickbooks_client::api_base_url(self.quickbooks.environment).to_string(),
        }
    }

    /// Resolve config file path: CLI arg > CONFIG_PATH env var > default file
    /// in the working directory (only if it exists).
    pub fn resolve_path(cli_path: Option<&str>) -> Option<PathBuf> {
        if let Some(p) = cli_path {
            return Some(PathBuf::from(p));
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return Some(PathBuf::from(p));
        }
        let default = PathBuf::from(DEFAULT_CONFIG_FILE);
        default.exists().then_some(default)
    }
}

fn require_http(name: &str, value: &str) -> common::Result<()> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(common::Error::Config(format!(
            "{name} must start with http:// or https://, got: {value}"
        )))
    }
}
