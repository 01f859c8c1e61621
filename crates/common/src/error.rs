//! Configuration and startup errors shared by the service crates

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Shorthand for a missing required setting, naming both places it can come from.
    pub fn missing(key: &str, env_var: &str) -> Self {
        Error::Config(format!("{key} is required (set it in the config file or via {env_var})"))
    }
}

/// Result alias using common Error
pub type Result<T> = std::result::Result<T, Error>;
