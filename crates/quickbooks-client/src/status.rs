//! Classification of QuickBooks API responses
//!
//! A 401 from the accounting API means the access token expired (Intuit
//! issues one-hour access tokens) and is the only status that triggers a
//! refresh. Everything else outside 2xx is surfaced as-is.

use quickbooks_auth::client::truncate;
use serde_json::Value;

/// Longest raw body used as an error message when no fault is present.
const MAX_MESSAGE_LEN: usize = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Success,
    /// Access token rejected; refresh and retry once.
    Unauthorized,
    /// Any other non-success status; never retried.
    Failed,
}

pub fn classify_status(status: u16) -> CallStatus {
    match status {
        200..=299 => CallStatus::Success,
        401 => CallStatus::Unauthorized,
        _ => CallStatus::Failed,
    }
}

/// Human-readable message from a QuickBooks error body.
///
/// Prefers the first `Fault.Error` entry (`Message: Detail`). The 401 fault
/// uses lowercase keys, so both spellings are accepted. Falls back to the
/// truncated raw body.
pub fn vendor_message(body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        let fault = json.get("Fault").or_else(|| json.get("fault"));
        let first = fault
            .and_then(|f| f.get("Error").or_else(|| f.get("error")))
            .and_then(|errors| errors.get(0));
        if let Some(err) = first {
            let field = |upper: &str, lower: &str| {
                err.get(upper)
                    .or_else(|| err.get(lower))
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned)
            };
            match (field("Message", "message"), field("Detail", "detail")) {
                (Some(m), Some(d)) => return format!("{m}: {d}"),
                (Some(m), None) => return m,
                (None, Some(d)) => return d,
                (None, None) => {}
            }
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty response body".to_string();
    }
    truncate(trimmed, MAX_MESSAGE_LEN)
}
