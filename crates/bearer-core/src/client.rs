use std::sync::Arc;

use chrono::Duration;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use crate::auth::{
    AuthError, AuthStatus, AuthorizationFlow, FileNonceStore, FileTokenStore, MemoryNonceStore, MemoryTokenStore, NonceStore,
    OAuthClient, OAuthConfig, OAuthEndpoints, TokenLifecycle, TokenSet, TokenStore,
    DEFAULT_EXPIRY_BUFFER_SECS,
};
use crate::config::ConfigLocator;
use crate::http::{RequestDescriptor, RequestDispatcher};
use crate::USER_AGENT;

/// Authorization flow, token lifecycle and request dispatch sharing one pair of stores.
pub struct AuthClient {
    flow: AuthorizationFlow,
    lifecycle: Arc<TokenLifecycle>,
    dispatcher: RequestDispatcher,
    nonces: Arc<dyn NonceStore>,
}

impl AuthClient {
    pub fn builder(config: OAuthConfig, endpoints: OAuthEndpoints) -> AuthClientBuilder {
        AuthClientBuilder {
            config,
            endpoints,
            tokens: None,
            nonces: None,
            http: None,
            expiry_buffer: Duration::seconds(DEFAULT_EXPIRY_BUFFER_SECS),
        }
    }

    /// Start an authorization round trip. The host navigates to the returned URL.
    pub fn build_authorization_url(&self, scopes: &[String]) -> Result<Url, AuthError> {
        self.flow.build_authorization_url(scopes)
    }

    /// Finish the round trip with the `code` and `state` the provider sent back.
    pub async fn consume_callback(&self, code: &str, state: &str) -> Result<TokenSet, AuthError> {
        self.flow.consume_callback(code, state).await
    }

    /// Finish the round trip from the full redirect URL.
    pub async fn complete_from_redirect(&self, redirect: &Url) -> Result<TokenSet, AuthError> {
        self.flow.complete_from_redirect(redirect).await
    }

    pub async fn ensure_valid(&self) -> Result<String, AuthError> {
        self.lifecycle.ensure_valid().await
    }

    pub async fn refresh(&self) -> Result<TokenSet, AuthError> {
        self.lifecycle.refresh().await
    }

    pub fn is_expired(&self) -> Result<bool, AuthError> {
        self.lifecycle.is_expired()
    }

    pub fn is_authenticated(&self) -> Result<bool, AuthError> {
        self.lifecycle.is_authenticated()
    }

    pub fn tokens(&self) -> Result<Option<TokenSet>, AuthError> {
        self.lifecycle.current()
    }

    /// A pending nonce means a redirect is outstanding; otherwise stored tokens mean authenticated.
    pub fn status(&self) -> Result<AuthStatus, AuthError> {
        if self.nonces.pending()? {
            return Ok(AuthStatus::AwaitingCallback);
        }
        match self.lifecycle.current()? {
            Some(_) => Ok(AuthStatus::Authenticated),
            None => Ok(AuthStatus::Unauthenticated),
        }
    }

    pub fn clear_tokens(&self) -> Result<(), AuthError> {
        self.lifecycle.clear_tokens()
    }

    pub async fn make_request(&self, descriptor: &RequestDescriptor) -> Result<Value, AuthError> {
        self.dispatcher.make_request(descriptor).await
    }

    pub async fn make_request_as<T>(&self, descriptor: &RequestDescriptor) -> Result<T, AuthError>
    where
        T: DeserializeOwned,
    {
        self.dispatcher.make_request_as(descriptor).await
    }
}

/// Configures the stores and transport behind an [`AuthClient`].
///
/// Both stores default to in-memory implementations.
pub struct AuthClientBuilder {
    config: OAuthConfig,
    endpoints: OAuthEndpoints,
    tokens: Option<Arc<dyn TokenStore>>,
    nonces: Option<Arc<dyn NonceStore>>,
    http: Option<Client>,
    expiry_buffer: Duration,
}

impl AuthClientBuilder {
    pub fn token_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.tokens = Some(store);
        self
    }

    pub fn nonce_store(mut self, store: Arc<dyn NonceStore>) -> Self {
        self.nonces = Some(store);
        self
    }

    /// File-backed token and nonce stores for `profile` in the per-user config directory.
    pub fn profile_stores(self, profile: &str) -> Result<Self, AuthError> {
        let locator = ConfigLocator::new()?;
        Ok(self.profile_stores_in(&locator, profile))
    }

    pub fn profile_stores_in(self, locator: &ConfigLocator, profile: &str) -> Self {
        self.token_store(Arc::new(FileTokenStore::for_profile(locator, profile)))
            .nonce_store(Arc::new(FileNonceStore::for_profile(locator, profile)))
    }

    pub fn http_client(mut self, http: Client) -> Self {
        self.http = Some(http);
        self
    }

    pub fn expiry_buffer(mut self, buffer: Duration) -> Self {
        self.expiry_buffer = buffer;
        self
    }

    pub fn build(self) -> Result<AuthClient, AuthError> {
        let http = match self.http {
            Some(http) => http,
            None => Client::builder().user_agent(USER_AGENT).build()?,
        };
        let tokens = self
            .tokens
            .unwrap_or_else(|| Arc::new(MemoryTokenStore::new()));
        let nonces = self
            .nonces
            .unwrap_or_else(|| Arc::new(MemoryNonceStore::new()));

        let oauth = OAuthClient::with_http(http.clone(), self.config, self.endpoints);
        let flow = AuthorizationFlow::new(oauth.clone(), tokens.clone(), nonces.clone());
        let lifecycle =
            Arc::new(TokenLifecycle::new(oauth, tokens).with_expiry_buffer(self.expiry_buffer));
        let dispatcher = RequestDispatcher::new(http, lifecycle.clone());

        Ok(AuthClient {
            flow,
            lifecycle,
            dispatcher,
            nonces,
        })
    }
}
