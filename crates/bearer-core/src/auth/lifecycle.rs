use std::sync::Arc;

use chrono::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::token::DEFAULT_EXPIRY_BUFFER_SECS;
use super::{AuthError, OAuthClient, TokenSet, TokenStore};

/// Decides whether the stored access token is usable and refreshes it when it is not.
///
/// Refreshes are single-flight: callers that observed the same stale token while another
/// refresh was in progress receive that refresh's result instead of issuing their own.
pub struct TokenLifecycle {
    oauth: OAuthClient,
    store: Arc<dyn TokenStore>,
    expiry_buffer: Duration,
    refresh_lock: Mutex<()>,
}

impl TokenLifecycle {
    pub fn new(oauth: OAuthClient, store: Arc<dyn TokenStore>) -> Self {
        Self {
            oauth,
            store,
            expiry_buffer: Duration::seconds(DEFAULT_EXPIRY_BUFFER_SECS),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn with_expiry_buffer(mut self, buffer: Duration) -> Self {
        self.expiry_buffer = buffer;
        self
    }

    pub fn current(&self) -> Result<Option<TokenSet>, AuthError> {
        self.store.load()
    }

    /// True when nothing is stored, no expiry is recorded, or the buffered expiry has passed.
    pub fn is_expired(&self) -> Result<bool, AuthError> {
        Ok(self
            .store
            .load()?
            .map_or(true, |tokens| tokens.is_expired(self.expiry_buffer)))
    }

    /// Access token present and not expired. Never refreshes.
    pub fn is_authenticated(&self) -> Result<bool, AuthError> {
        Ok(self
            .store
            .load()?
            .is_some_and(|tokens| !tokens.is_expired(self.expiry_buffer)))
    }

    /// Return a usable access token, refreshing first if the stored one has expired.
    pub async fn ensure_valid(&self) -> Result<String, AuthError> {
        let tokens = self.store.load()?.ok_or(AuthError::NotAuthorized)?;
        if !tokens.is_expired(self.expiry_buffer) {
            return Ok(tokens.access_token);
        }
        debug!(expires_at = ?tokens.expires_at, "access token expired, refreshing");
        let fresh = self.refresh_after(&tokens.access_token).await?;
        Ok(fresh.access_token)
    }

    /// Exchange the stored refresh token for a new access token.
    pub async fn refresh(&self) -> Result<TokenSet, AuthError> {
        let observed = self.store.load()?.ok_or(AuthError::NoRefreshToken)?;
        self.refresh_after(&observed.access_token).await
    }

    /// Refresh unless another caller already replaced `stale` with a token that is still valid.
    pub(crate) async fn refresh_after(&self, stale: &str) -> Result<TokenSet, AuthError> {
        let _guard = self.refresh_lock.lock().await;

        let current = self.store.load()?.ok_or(AuthError::NoRefreshToken)?;
        if current.access_token != stale && !current.is_expired(self.expiry_buffer) {
            debug!("token already refreshed by a concurrent caller");
            return Ok(current);
        }

        let refresh_token = current
            .refresh_token
            .clone()
            .ok_or(AuthError::NoRefreshToken)?;

        match self.oauth.refresh(&refresh_token).await {
            Ok(mut fresh) => {
                if fresh.refresh_token.is_none() {
                    fresh.refresh_token = Some(refresh_token);
                }
                self.store.save(&fresh)?;
                info!(expires_at = ?fresh.expires_at, "access token refreshed");
                Ok(fresh)
            }
            Err(err) => {
                warn!(error = %err, "token refresh failed, clearing stored tokens");
                if let Err(clear_err) = self.store.clear() {
                    warn!(error = %clear_err, "failed to clear stored tokens");
                }
                Err(err)
            }
        }
    }

    pub fn clear_tokens(&self) -> Result<(), AuthError> {
        self.store.clear()?;
        info!("stored tokens cleared");
        Ok(())
    }
}
