//! Single-slot credential store for the connected QuickBooks company
//!
//! Holds at most one `TokenSet`. Writes replace the slot wholesale
//! (last-write-wins). By default the slot lives only in memory; when a path
//! is given, every write is mirrored to disk with an atomic temp-file + rename
//! so a restart does not force the operator to reconnect.

use std::path::{Path, PathBuf};

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::token::TokenSet;

pub struct CredentialStore {
    path: Option<PathBuf>,
    slot: RwLock<Option<TokenSet>>,
}

impl CredentialStore {
    /// Store that forgets its token set on process exit.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            slot: RwLock::new(None),
        }
    }

    /// Load the slot from `path`, starting empty if the file does not exist.
    ///
    /// A file holding an incomplete token set is ignored with a warning; the
    /// operator simply has to reconnect.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let tokens = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading token file: {e}")))?;
            let stored: Option<TokenSet> = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing token file: {e}")))?;
            match stored {
                Some(tokens) if tokens.is_valid() => {
                    info!(path = %path.display(), realm_id = %tokens.realm_id, "loaded persisted QuickBooks tokens");
                    Some(tokens)
                }
                Some(_) => {
                    warn!(path = %path.display(), "persisted token set is incomplete, ignoring");
                    None
                }
                None => None,
            }
        } else {
            info!(path = %path.display(), "token file not found, starting disconnected");
            None
        };

        Ok(Self {
            path: Some(path),
            slot: RwLock::new(tokens),
        })
    }

    /// Current token set, or `None` when disconnected.
    pub async fn get(&self) -> Option<TokenSet> {
        self.slot.read().await.clone()
    }

    /// True iff a token set is present and all of its fields are non-empty.
    pub async fn has(&self) -> bool {
        self.slot
            .read()
            .await
            .as_ref()
            .is_some_and(TokenSet::is_valid)
    }

    /// Replace the slot unconditionally.
    ///
    /// The in-memory slot is updated even if persisting fails; the error is
    /// still returned so the caller can report it.
    pub async fn set(&self, tokens: TokenSet) -> Result<()> {
        let mut slot = self.slot.write().await;
        debug!(realm_id = %tokens.realm_id, "storing token set");
        *slot = Some(tokens);
        match &self.path {
            Some(path) => write_atomic(path, slot.as_ref()).await,
            None => Ok(()),
        }
    }

    /// Reset the slot to absent, returning what was there.
    pub async fn clear(&self) -> Result<Option<TokenSet>> {
        let mut slot = self.slot.write().await;
        let previous = slot.take();
        if let Some(path) = &self.path {
            match tokio::fs::remove_file(path).await {
                Ok(()) => debug!(path = %path.display(), "removed token file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::Io(format!("removing token file: {e}"))),
            }
        }
        Ok(previous)
    }

    /// Replace the slot only if it still holds `expected`'s refresh token.
    ///
    /// Tokens refreshed from `expected` must not revive a connection that was
    /// disconnected or replaced while the refresh was in flight.
    pub async fn set_if_current(&self, expected: &TokenSet, tokens: TokenSet) -> Result<bool> {
        let mut slot = self.slot.write().await;
        if !holds(&slot, expected) {
            debug!(realm_id = %tokens.realm_id, "token set changed during refresh, discarding");
            return Ok(false);
        }
        *slot = Some(tokens);
        if let Some(path) = &self.path {
            write_atomic(path, slot.as_ref()).await?;
        }
        Ok(true)
    }

    /// Clear only if the slot still holds `expected`'s refresh token.
    ///
    /// A request whose refresh failed must not disconnect a token set that a
    /// concurrent request already replaced.
    pub async fn clear_if_current(&self, expected: &TokenSet) -> Result<bool> {
        let mut slot = self.slot.write().await;
        if !holds(&slot, expected) {
            return Ok(false);
        }
        *slot = None;
        if let Some(path) = &self.path {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::Io(format!("removing token file: {e}"))),
            }
        }
        Ok(true)
    }
}

fn holds(slot: &Option<TokenSet>, expected: &TokenSet) -> bool {
    slot.as_ref()
        .is_some_and(|current| current.refresh_token == expected.refresh_token)
}

/// Write the slot to a file atomically with 0600 permissions.
async fn write_atomic(path: &Path, tokens: Option<&TokenSet>) -> Result<()> {
    let json = serde_json::to_string_pretty(&tokens)
        .map_err(|e| Error::CredentialParse(format!("serializing tokens: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("token path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".tokens.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp token file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting token file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp token file: {e}")))?;

    debug!(path = %path.display(), "persisted tokens");
    Ok(())
}
