use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;

use crate::config::ConfigLocator;

use super::token_store::{remove_if_present, write_private_file};
use super::AuthError;

const NONCE_BYTES: usize = 32;

/// Generate a fresh `state` value: 32 random bytes, base64url without padding.
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; NONCE_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Holds the single outstanding authorization nonce.
pub trait NonceStore: Send + Sync {
    /// Store `nonce`, replacing any previous unconsumed value.
    fn put(&self, nonce: &str) -> Result<(), AuthError>;
    /// Remove and return the stored nonce.
    fn take(&self) -> Result<Option<String>, AuthError>;
    /// Whether an unconsumed nonce exists.
    fn pending(&self) -> Result<bool, AuthError>;
}

#[derive(Debug, Default)]
pub struct MemoryNonceStore {
    inner: Mutex<Option<String>>,
}

impl MemoryNonceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NonceStore for MemoryNonceStore {
    fn put(&self, nonce: &str) -> Result<(), AuthError> {
        *self.inner.lock().unwrap_or_else(|e| e.into_inner()) = Some(nonce.to_owned());
        Ok(())
    }

    fn take(&self) -> Result<Option<String>, AuthError> {
        Ok(self.inner.lock().unwrap_or_else(|e| e.into_inner()).take())
    }

    fn pending(&self) -> Result<bool, AuthError> {
        Ok(self.inner.lock().unwrap_or_else(|e| e.into_inner()).is_some())
    }
}

/// Keeps the nonce on disk so the callback can be handled by a later process.
#[derive(Debug, Clone)]
pub struct FileNonceStore {
    path: PathBuf,
}

impl FileNonceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn for_profile(locator: &ConfigLocator, profile: &str) -> Self {
        Self::new(locator.pending_state_file(profile))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl NonceStore for FileNonceStore {
    fn put(&self, nonce: &str) -> Result<(), AuthError> {
        write_private_file(&self.path, nonce.as_bytes())
    }

    fn take(&self) -> Result<Option<String>, AuthError> {
        let value = match fs::read_to_string(&self.path) {
            Ok(value) => value,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        remove_if_present(&self.path)?;
        Ok(Some(value.trim().to_owned()))
    }

    fn pending(&self) -> Result<bool, AuthError> {
        Ok(self.path.exists())
    }
}
