use std::sync::Arc;

use tracing::{info, warn};
use url::Url;

use super::nonce::generate_nonce;
use super::{AuthError, NonceStore, OAuthClient, TokenSet, TokenStore};

/// Query parameters the provider appends to the redirect URI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    pub fn new(code: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            state: Some(state.into()),
            ..Self::default()
        }
    }

    /// Read `code`, `state` and `error` from the URL the provider redirected to.
    pub fn from_redirect_url(url: &Url) -> Self {
        let mut params = Self::default();
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "code" => params.code = Some(value.into_owned()),
                "state" => params.state = Some(value.into_owned()),
                "error" => params.error = Some(value.into_owned()),
                "error_description" => params.error_description = Some(value.into_owned()),
                _ => {}
            }
        }
        params
    }
}

/// Both halves of the authorization-code round trip, joined only by the nonce and token stores.
#[derive(Clone)]
pub struct AuthorizationFlow {
    oauth: OAuthClient,
    tokens: Arc<dyn TokenStore>,
    nonces: Arc<dyn NonceStore>,
}

impl AuthorizationFlow {
    pub fn new(
        oauth: OAuthClient,
        tokens: Arc<dyn TokenStore>,
        nonces: Arc<dyn NonceStore>,
    ) -> Self {
        Self {
            oauth,
            tokens,
            nonces,
        }
    }

    /// Issue a fresh nonce and return the URL the host should navigate to.
    ///
    /// Any previously issued nonce is invalidated.
    pub fn build_authorization_url(&self, scopes: &[String]) -> Result<Url, AuthError> {
        let nonce = generate_nonce();
        self.nonces.put(&nonce)?;
        let url = self.oauth.authorization_url(&nonce, scopes);
        info!(
            authorization_url = %self.oauth.endpoints().authorization_url,
            "authorization nonce issued"
        );
        Ok(url)
    }

    /// Validate `state` against the stored nonce and exchange `code` for tokens.
    pub async fn consume_callback(&self, code: &str, state: &str) -> Result<TokenSet, AuthError> {
        self.consume(CallbackParams::new(code, state)).await
    }

    /// Same as [`consume_callback`](Self::consume_callback), reading the parameters from the redirect URL.
    pub async fn complete_from_redirect(&self, redirect: &Url) -> Result<TokenSet, AuthError> {
        self.consume(CallbackParams::from_redirect_url(redirect)).await
    }

    pub async fn consume(&self, params: CallbackParams) -> Result<TokenSet, AuthError> {
        // Single use: the nonce is gone whatever happens next.
        let expected = self.nonces.take()?;

        match (expected.as_deref(), params.state.as_deref()) {
            (Some(expected), Some(received)) if expected == received => {}
            (None, _) => {
                warn!("callback received without a pending authorization");
                return Err(AuthError::CsrfMismatch);
            }
            _ => {
                warn!("callback state does not match the issued nonce");
                return Err(AuthError::CsrfMismatch);
            }
        }

        if let Some(error) = params.error {
            let detail = match params.error_description {
                Some(description) => format!("{error}: {description}"),
                None => error,
            };
            warn!(%detail, "provider denied authorization");
            return Err(AuthError::AccessDenied(detail));
        }

        let code = params.code.ok_or(AuthError::MissingAuthorizationCode)?;
        let tokens = self.oauth.exchange_code(&code).await?;
        self.tokens.save(&tokens)?;
        info!(expires_at = ?tokens.expires_at, "authorization code exchanged");
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{
        Credentials, MemoryNonceStore, MemoryTokenStore, OAuthConfig, OAuthEndpoints,
    };
    use httpmock::prelude::*;

    struct Fixture {
        flow: AuthorizationFlow,
        tokens: Arc<MemoryTokenStore>,
        nonces: Arc<MemoryNonceStore>,
    }

    fn fixture(server: &MockServer) -> Fixture {
        let config = OAuthConfig::new(
            Credentials::new("client", "secret"),
            Url::parse("http://localhost/callback").unwrap(),
        );
        let endpoints = OAuthEndpoints {
            authorization_url: Url::parse("http://localhost/authorize").unwrap(),
            token_url: Url::parse(&server.url("/token")).unwrap(),
        };
        let oauth = OAuthClient::new(config, endpoints).unwrap();
        let tokens = Arc::new(MemoryTokenStore::new());
        let nonces = Arc::new(MemoryNonceStore::new());
        Fixture {
            flow: AuthorizationFlow::new(oauth, tokens.clone(), nonces.clone()),
            tokens,
            nonces,
        }
    }

    fn state_of(url: &Url) -> String {
        url.query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap()
    }

    #[tokio::test]
    async fn wrong_state_is_rejected_without_network() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/token");
            then.status(200);
        });
        let fx = fixture(&server);
        fx.flow.build_authorization_url(&["scope-a".into()]).unwrap();

        let err = fx.flow.consume_callback("x", "wrong").await.unwrap_err();
        assert!(matches!(err, AuthError::CsrfMismatch));
        mock.assert_hits(0);
        assert!(!fx.nonces.pending().unwrap());
        assert!(fx.tokens.load().unwrap().is_none());
    }

    #[tokio::test]
    async fn second_authorize_invalidates_first_nonce() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/token");
            then.status(200);
        });
        let fx = fixture(&server);
        let first = fx.flow.build_authorization_url(&[]).unwrap();
        let second = fx.flow.build_authorization_url(&[]).unwrap();
        assert_ne!(state_of(&first), state_of(&second));

        let err = fx
            .flow
            .consume_callback("code", &state_of(&first))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::CsrfMismatch));
        mock.assert_hits(0);
    }

    #[tokio::test]
    async fn provider_error_consumes_nonce() {
        let server = MockServer::start();
        let fx = fixture(&server);
        let url = fx.flow.build_authorization_url(&[]).unwrap();
        let redirect = Url::parse(&format!(
            "http://localhost/callback?error=access_denied&error_description=user+said+no&state={}",
            state_of(&url)
        ))
        .unwrap();

        let err = fx.flow.complete_from_redirect(&redirect).await.unwrap_err();
        match err {
            AuthError::AccessDenied(detail) => assert_eq!(detail, "access_denied: user said no"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!fx.nonces.pending().unwrap());
    }

    #[tokio::test]
    async fn missing_code_is_reported() {
        let server = MockServer::start();
        let fx = fixture(&server);
        let url = fx.flow.build_authorization_url(&[]).unwrap();
        let params = CallbackParams {
            state: Some(state_of(&url)),
            ..CallbackParams::default()
        };
        let err = fx.flow.consume(params).await.unwrap_err();
        assert!(matches!(err, AuthError::MissingAuthorizationCode));
    }

    #[tokio::test]
    async fn failed_exchange_leaves_tokens_untouched() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/token");
            then.status(400).json_body_obj(&serde_json::json!({ "error": "invalid_grant" }));
        });
        let fx = fixture(&server);
        let existing = TokenSet::new("old", Some("r".into()), None);
        fx.tokens.save(&existing).unwrap();
        let url = fx.flow.build_authorization_url(&[]).unwrap();

        let err = fx
            .flow
            .consume_callback("code", &state_of(&url))
            .await
            .unwrap_err();
        match err {
            AuthError::TokenExchangeFailed { detail, .. } => assert_eq!(detail, "invalid_grant"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(fx.tokens.load().unwrap(), Some(existing));
    }

    #[test]
    fn callback_params_from_redirect() {
        let url = Url::parse("http://localhost/callback?code=abc&state=xyz&extra=1").unwrap();
        assert_eq!(
            CallbackParams::from_redirect_url(&url),
            CallbackParams::new("abc", "xyz")
        );
    }
}
