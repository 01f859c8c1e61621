//! QuickBooks Online resource access with transparent token refresh
//!
//! Wraps authenticated accounting API calls so that an expired access token
//! (HTTP 401) is refreshed once and the call retried once. Controllers receive
//! a `CallOutcome` carrying the result and, when a refresh happened, the new
//! token set they must store.
//!
//! Call lifecycle:
//! 1. Controller asks `Resources` for an entity list or company info
//! 2. `endpoints` builds the realm-scoped URL for the configured environment
//! 3. `TokenManager` calls the API, refreshing on 401 (single-flight per realm)
//! 4. `entity` extracts records from the QBO response envelope

pub mod endpoints;
pub mod entity;
pub mod error;
pub mod manager;
pub mod resources;
pub mod status;

pub use endpoints::api_base_url;
pub use entity::Entity;
pub use error::{Error, Result};
pub use manager::{CallOutcome, TokenManager};
pub use resources::Resources;
pub use status::{CallStatus, classify_status, vendor_message};
