//! Refresh-on-401 call wrapper
//!
//! `TokenManager::call_with_auto_refresh` is the only place that decides when
//! a token set is refreshed:
//!
//! 1. Call the API with the given tokens.
//! 2. 2xx: return the parsed body and no new token set.
//! 3. 401: refresh once, retry once with the fresh tokens, and report the
//!    fresh tokens whatever the retry returns. Never loops.
//! 4. Any other status: `ApiCall` error, not retried.
//!
//! Transport failures and timeouts get one immediate retry of the same call,
//! separate from the 401 path. The manager never writes to the credential
//! store; the caller persists `CallOutcome::refreshed`.
//!
//! Refreshes are single-flight per realm. Intuit rotates refresh tokens, so
//! two concurrent refreshes with the same token would race; instead the
//! second caller waits and reuses the first caller's result.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use quickbooks_auth::{ApiResponse, OAuthApi, TokenSet};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::status::{CallStatus, classify_status, vendor_message};

/// Pause before the single retry of a transport failure.
const TRANSIENT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Result of a managed call plus the token set that superseded the caller's,
/// if a refresh happened.
#[derive(Debug)]
pub struct CallOutcome<T = Value> {
    pub refreshed: Option<TokenSet>,
    pub result: Result<T>,
}

impl<T> CallOutcome<T> {
    fn unchanged(result: Result<T>) -> Self {
        Self {
            refreshed: None,
            result,
        }
    }

    /// Transform the success value, keeping `refreshed` either way.
    pub fn map<U>(self, f: impl FnOnce(T) -> Result<U>) -> CallOutcome<U> {
        CallOutcome {
            refreshed: self.refreshed,
            result: self.result.and_then(f),
        }
    }
}

pub struct TokenManager {
    api: Arc<dyn OAuthApi>,
    gate: RefreshGate,
}

impl TokenManager {
    pub fn new(api: Arc<dyn OAuthApi>) -> Self {
        Self {
            api,
            gate: RefreshGate::default(),
        }
    }

    pub async fn call_with_auto_refresh(&self, url: &str, tokens: &TokenSet) -> CallOutcome {
        let first = match self.call_once(tokens, url).await {
            Ok(r) => r,
            Err(e) => return CallOutcome::unchanged(Err(e)),
        };

        match classify_status(first.status) {
            CallStatus::Success => CallOutcome::unchanged(parse_body(&first)),
            CallStatus::Failed => CallOutcome::unchanged(Err(api_call_error(&first))),
            CallStatus::Unauthorized => {
                info!(realm_id = %tokens.realm_id, "access token rejected, refreshing");
                let fresh = match self.gate.refresh(self.api.as_ref(), tokens).await {
                    Ok(t) => t,
                    Err(e) => {
                        warn!(realm_id = %tokens.realm_id, error = %e, "token refresh failed");
                        return CallOutcome::unchanged(Err(e));
                    }
                };

                let result = match self.call_once(&fresh, url).await {
                    Ok(retry) if classify_status(retry.status) == CallStatus::Success => {
                        parse_body(&retry)
                    }
                    Ok(retry) => {
                        warn!(
                            realm_id = %tokens.realm_id,
                            status = retry.status,
                            "call failed again after refresh, giving up"
                        );
                        Err(api_call_error(&retry))
                    }
                    Err(e) => Err(e),
                };

                CallOutcome {
                    refreshed: Some(fresh),
                    result,
                }
            }
        }
    }

    /// One API call, retried once on a transport failure or timeout.
    async fn call_once(&self, tokens: &TokenSet, url: &str) -> Result<ApiResponse> {
        let response = match self.api.call_api(tokens, url).await {
            Err(e) if e.is_transient() => {
                warn!(error = %e, "QuickBooks call failed in transit, retrying once");
                tokio::time::sleep(TRANSIENT_RETRY_DELAY).await;
                self.api.call_api(tokens, url).await
            }
            other => other,
        };

        match response {
            Ok(r) => {
                metrics::counter!("quickbooks_api_calls_total", "status" => r.status.to_string())
                    .increment(1);
                Ok(r)
            }
            Err(e) => {
                let kind = if matches!(e, quickbooks_auth::Error::Timeout(_)) {
                    "timeout"
                } else {
                    "transport"
                };
                metrics::counter!("quickbooks_api_calls_total", "status" => kind).increment(1);
                Err(e.into())
            }
        }
    }
}

fn parse_body(response: &ApiResponse) -> Result<Value> {
    serde_json::from_str(&response.body)
        .map_err(|e| Error::Decode(format!("response is not JSON: {e}")))
}

fn api_call_error(response: &ApiResponse) -> Error {
    Error::ApiCall {
        status: response.status,
        message: vendor_message(&response.body),
    }
}

/// Last refresh performed for a realm.
struct Rotation {
    /// Refresh token that was spent to obtain `current`
    spent: String,
    current: TokenSet,
}

#[derive(Default)]
struct RealmSlot {
    last: Option<Rotation>,
    /// Refresh token the vendor already refused
    rejected: Option<String>,
}

/// Per-realm single-flight guard around `OAuthApi::refresh`.
#[derive(Default)]
struct RefreshGate {
    realms: Mutex<HashMap<String, Arc<Mutex<RealmSlot>>>>,
}

impl RefreshGate {
    async fn refresh(&self, api: &dyn OAuthApi, tokens: &TokenSet) -> Result<TokenSet> {
        let slot = {
            let mut realms = self.realms.lock().await;
            realms.entry(tokens.realm_id.clone()).or_default().clone()
        };
        let mut slot = slot.lock().await;

        if let Some(last) = &slot.last
            && last.spent == tokens.refresh_token
        {
            debug!(realm_id = %tokens.realm_id, "reusing tokens from concurrent refresh");
            metrics::counter!("quickbooks_token_refresh_total", "outcome" => "shared").increment(1);
            return Ok(last.current.clone());
        }
        if slot.rejected.as_deref() == Some(tokens.refresh_token.as_str()) {
            metrics::counter!("quickbooks_token_refresh_total", "outcome" => "rejected")
                .increment(1);
            return Err(Error::Refresh("refresh token was already rejected".into()));
        }

        match api.refresh(tokens).await {
            Ok(fresh) => {
                metrics::counter!("quickbooks_token_refresh_total", "outcome" => "success")
                    .increment(1);
                info!(realm_id = %fresh.realm_id, "access token refreshed");
                slot.last = Some(Rotation {
                    spent: tokens.refresh_token.clone(),
                    current: fresh.clone(),
                });
                Ok(fresh)
            }
            Err(e) => {
                if matches!(e, quickbooks_auth::Error::Refresh(_)) {
                    metrics::counter!("quickbooks_token_refresh_total", "outcome" => "rejected")
                        .increment(1);
                    slot.rejected = Some(tokens.refresh_token.clone());
                } else {
                    metrics::counter!("quickbooks_token_refresh_total", "outcome" => "error")
                        .increment(1);
                }
                Err(e.into())
            }
        }
    }
}
