//! Entity queries and company info, shaped for the dashboard controllers

use std::sync::Arc;

use quickbooks_auth::{OAuthApi, TokenSet};
use serde_json::Value;
use tracing::instrument;

use crate::endpoints::{company_info_url, query_url};
use crate::entity::{Entity, extract_company_info};
use crate::error::Error;
use crate::manager::{CallOutcome, TokenManager};

pub struct Resources {
    manager: TokenManager,
    base_url: String,
}

impl Resources {
    /// `base_url` is normally `endpoints::api_base_url(environment)`.
    pub fn new(api: Arc<dyn OAuthApi>, base_url: impl Into<String>) -> Self {
        Self {
            manager: TokenManager::new(api),
            base_url: base_url.into(),
        }
    }

    /// All records of one entity type.
    #[instrument(skip(self, tokens), fields(realm_id = %tokens.realm_id))]
    pub async fn query_entity(&self, entity: Entity, tokens: &TokenSet) -> CallOutcome<Vec<Value>> {
        if !tokens.is_valid() {
            return unauthenticated();
        }
        let url = match query_url(&self.base_url, &tokens.realm_id, &entity.query()) {
            Ok(url) => url,
            Err(e) => return failed(e),
        };
        self.manager
            .call_with_auto_refresh(&url, tokens)
            .await
            .map(|body| entity.extract(body))
    }

    /// The connected company's `CompanyInfo` record.
    #[instrument(skip_all, fields(realm_id = %tokens.realm_id))]
    pub async fn company_info(&self, tokens: &TokenSet) -> CallOutcome<Value> {
        if !tokens.is_valid() {
            return unauthenticated();
        }
        let url = match company_info_url(&self.base_url, &tokens.realm_id) {
            Ok(url) => url,
            Err(e) => return failed(e),
        };
        self.manager
            .call_with_auto_refresh(&url, tokens)
            .await
            .map(extract_company_info)
    }
}

fn unauthenticated<T>() -> CallOutcome<T> {
    failed(Error::Unauthenticated)
}

fn failed<T>(e: Error) -> CallOutcome<T> {
    CallOutcome {
        refreshed: None,
        result: Err(e),
    }
}
