//! Redacting wrapper for client secrets and static API tokens

use std::fmt;
use std::path::Path;
use zeroize::Zeroize;

/// Sensitive value. Redacted in Debug/Display, zeroed on drop.
pub struct Secret<T: Zeroize>(T);

impl<T: Zeroize> Secret<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Expose the inner value (use sparingly)
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl Secret<String> {
    /// Read a secret from a file, trimming surrounding whitespace.
    ///
    /// A file that is empty after trimming yields `None` so callers can fall
    /// through to their "not configured" handling.
    pub fn from_file(path: &Path) -> crate::Result<Option<Self>> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            crate::Error::Config(format!("failed to read secret file {}: {e}", path.display()))
        })?;
        let value = raw.trim();
        if value.is_empty() {
            return Ok(None);
        }
        Ok(Some(Self(value.to_owned())))
    }

    /// Wrap a non-empty string, treating empty input as absent.
    pub fn non_empty(value: String) -> Option<Self> {
        if value.trim().is_empty() {
            None
        } else {
            Some(Self(value))
        }
    }
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> Drop for Secret<T> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<T: Zeroize + Clone> Clone for Secret<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}
