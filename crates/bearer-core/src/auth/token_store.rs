use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::config::ConfigLocator;

use super::{AuthError, TokenSet};

/// Persistence abstraction for the current token set.
///
/// Implementations must write and remove all fields of a [`TokenSet`] together.
pub trait TokenStore: Send + Sync {
    fn load(&self) -> Result<Option<TokenSet>, AuthError>;
    fn save(&self, tokens: &TokenSet) -> Result<(), AuthError>;
    fn clear(&self) -> Result<(), AuthError>;
}

/// Process-local token storage.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    inner: Mutex<Option<TokenSet>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(tokens: TokenSet) -> Self {
        Self {
            inner: Mutex::new(Some(tokens)),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<TokenSet>, AuthError> {
        Ok(self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn save(&self, tokens: &TokenSet) -> Result<(), AuthError> {
        *self.inner.lock().unwrap_or_else(|e| e.into_inner()) = Some(tokens.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), AuthError> {
        *self.inner.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}

/// Filesystem-backed token storage located in the user configuration directory.
///
/// Tokens are stored in clear text with user-only permissions.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn for_profile(locator: &ConfigLocator, profile: &str) -> Self {
        Self::new(locator.tokens_file(profile))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<TokenSet>, AuthError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)?;
        let envelope: TokenEnvelope = serde_json::from_str(&raw)?;
        Ok(Some(envelope.tokens))
    }

    fn save(&self, tokens: &TokenSet) -> Result<(), AuthError> {
        let envelope = TokenEnvelope {
            version: 1,
            tokens: tokens.clone(),
        };
        let payload = serde_json::to_string_pretty(&envelope)?;
        write_private_file(&self.path, payload.as_bytes())
    }

    fn clear(&self) -> Result<(), AuthError> {
        remove_if_present(&self.path)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TokenEnvelope {
    version: u32,
    tokens: TokenSet,
}

/// Write `payload` next to `path` and rename it into place so readers never see a partial file.
///
/// The staging file is owner-only from creation and removed again if any step fails.
pub(crate) fn write_private_file(path: &Path, payload: &[u8]) -> Result<(), AuthError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let staging = path.with_extension("tmp");
    let result = stage_and_rename(&staging, path, payload);
    if result.is_err() {
        let _ = fs::remove_file(&staging);
    }
    result
}

fn stage_and_rename(staging: &Path, path: &Path, payload: &[u8]) -> Result<(), AuthError> {
    let mut options = OpenOptions::new();
    options.create(true).write(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(staging)?;

    // A leftover staging file keeps its old mode; tighten it before any secret is written.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }

    file.write_all(payload)?;
    file.sync_all()?;
    drop(file);
    fs::rename(staging, path)?;
    Ok(())
}

pub(crate) fn remove_if_present(path: &Path) -> Result<(), AuthError> {
    match fs::remove_file(path) {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}
