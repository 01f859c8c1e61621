//! Shared types for the dashboard backend crates

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
