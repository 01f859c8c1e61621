//! Accounting API URL composition
//!
//! `realm_id` is always written as a single percent-encoded path segment so
//! no value can change the path structure.

use quickbooks_auth::{Environment, MINOR_VERSION};
use reqwest::Url;

use crate::error::{Error, Result};

/// Base URL of the accounting API for an environment.
pub fn api_base_url(environment: Environment) -> &'static str {
    environment.api_host()
}

/// `{base}/v3/company/{realm}/query?query=...&minorversion=N`
pub fn query_url(base: &str, realm_id: &str, query: &str) -> Result<String> {
    let mut url = company_url(base, realm_id, &["query"])?;
    url.query_pairs_mut()
        .append_pair("query", query)
        .append_pair("minorversion", MINOR_VERSION);
    Ok(url.into())
}

/// `{base}/v3/company/{realm}/companyinfo/{realm}?minorversion=N`
pub fn company_info_url(base: &str, realm_id: &str) -> Result<String> {
    let mut url = company_url(base, realm_id, &["companyinfo", realm_id])?;
    url.query_pairs_mut()
        .append_pair("minorversion", MINOR_VERSION);
    Ok(url.into())
}

fn company_url(base: &str, realm_id: &str, rest: &[&str]) -> Result<Url> {
    let mut url =
        Url::parse(base).map_err(|e| Error::Decode(format!("invalid API base URL {base}: {e}")))?;
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| Error::Decode(format!("API base URL cannot carry a path: {base}")))?;
        segments
            .pop_if_empty()
            .extend(["v3", "company", realm_id])
            .extend(rest);
    }
    Ok(url)
}
