use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::{AuthError, Credentials, TokenSet};
use crate::USER_AGENT;

/// OAuth client configuration supplied by consumers.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub credentials: Credentials,
    pub redirect_uri: Url,
    /// Scopes requested when the caller does not name any.
    pub scopes: Vec<String>,
}

impl OAuthConfig {
    pub fn new(credentials: Credentials, redirect_uri: Url) -> Self {
        Self {
            credentials,
            redirect_uri,
            scopes: vec![],
        }
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }
}

/// Provider endpoints. Each client instance carries its own.
#[derive(Debug, Clone)]
pub struct OAuthEndpoints {
    pub authorization_url: Url,
    pub token_url: Url,
}

impl OAuthEndpoints {
    pub fn parse(authorization_url: &str, token_url: &str) -> Result<Self, AuthError> {
        Ok(Self {
            authorization_url: Url::parse(authorization_url)?,
            token_url: Url::parse(token_url)?,
        })
    }
}

/// Talks to the provider's authorization and token endpoints.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    http: Client,
    config: OAuthConfig,
    endpoints: OAuthEndpoints,
}

impl OAuthClient {
    pub fn new(config: OAuthConfig, endpoints: OAuthEndpoints) -> Result<Self, AuthError> {
        let http = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self::with_http(http, config, endpoints))
    }

    /// Reuse an existing HTTP client (connection pool shared with the request dispatcher).
    pub fn with_http(http: Client, config: OAuthConfig, endpoints: OAuthEndpoints) -> Self {
        Self {
            http,
            config,
            endpoints,
        }
    }

    pub fn endpoints(&self) -> &OAuthEndpoints {
        &self.endpoints
    }

    /// Authorization URL for `state`. Falls back to the configured scopes when `scopes` is empty.
    pub fn authorization_url(&self, state: &str, scopes: &[String]) -> Url {
        let scopes = if scopes.is_empty() {
            &self.config.scopes
        } else {
            scopes
        };
        let mut url = self.endpoints.authorization_url.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("client_id", &self.config.credentials.client_id);
            pairs.append_pair("redirect_uri", self.config.redirect_uri.as_str());
            pairs.append_pair("response_type", "code");
            pairs.append_pair("scope", &scopes.join(" "));
            pairs.append_pair("state", state);
            pairs.append_pair("access_type", "offline");
            pairs.append_pair("prompt", "consent");
        }
        url
    }

    /// Exchange an authorization code for a token set.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenSet, AuthError> {
        let credentials = &self.config.credentials;
        let form = [
            ("code", code),
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.expose()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ];

        debug!(token_url = %self.endpoints.token_url, "exchanging authorization code");
        self.request_tokens(&form)
            .await
            .map_err(|failure| AuthError::TokenExchangeFailed {
                status: failure.status,
                detail: failure.detail,
            })
    }

    /// Exchange a refresh token for a new access token.
    ///
    /// The returned set carries `refresh_token` only when the provider issued a new one.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, AuthError> {
        let credentials = &self.config.credentials;
        let form = [
            ("refresh_token", refresh_token),
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.expose()),
            ("grant_type", "refresh_token"),
        ];

        debug!(token_url = %self.endpoints.token_url, "refreshing access token");
        self.request_tokens(&form)
            .await
            .map_err(|failure| AuthError::RefreshFailed {
                status: failure.status,
                detail: failure.detail,
            })
    }

    async fn request_tokens(&self, form: &[(&str, &str)]) -> Result<TokenSet, EndpointFailure> {
        let response = self
            .http
            .post(self.endpoints.token_url.clone())
            .form(form)
            .send()
            .await
            .map_err(EndpointFailure::transport)?;

        let status = response.status();
        let received_at = Utc::now();
        let body = response.text().await.map_err(EndpointFailure::transport)?;

        if !status.is_success() {
            return Err(EndpointFailure {
                status: Some(status),
                detail: provider_detail(&body),
            });
        }

        let payload: TokenResponse =
            serde_json::from_str(&body).map_err(|err| EndpointFailure {
                status: Some(status),
                detail: format!("invalid token response: {err}"),
            })?;

        TokenSet::issued_at(
            payload.access_token,
            payload.refresh_token,
            payload.expires_in,
            received_at,
        )
        .ok_or_else(|| EndpointFailure {
            status: Some(status),
            detail: "invalid token response: expires_in out of range".to_owned(),
        })
    }
}

struct EndpointFailure {
    status: Option<StatusCode>,
    detail: String,
}

impl EndpointFailure {
    fn transport(err: reqwest::Error) -> Self {
        Self {
            status: err.status(),
            detail: err.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    error: String,
    error_description: Option<String>,
}

/// Extract a readable message from an RFC 6749 error body, or fall back to the raw text.
fn provider_detail(body: &str) -> String {
    match serde_json::from_str::<ProviderErrorBody>(body) {
        Ok(ProviderErrorBody {
            error,
            error_description: Some(description),
        }) => format!("{error}: {description}"),
        Ok(ProviderErrorBody { error, .. }) => error,
        Err(_) if body.trim().is_empty() => "<no body>".to_owned(),
        Err(_) => body.trim().to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use httpmock::prelude::*;

    fn test_client(token_url: Url) -> OAuthClient {
        let config = OAuthConfig::new(
            Credentials::new("client-id", "client-secret"),
            Url::parse("http://localhost/callback").unwrap(),
        )
        .with_scopes(["read"]);
        let endpoints = OAuthEndpoints {
            authorization_url: Url::parse("http://localhost/authorize").unwrap(),
            token_url,
        };
        OAuthClient::new(config, endpoints).unwrap()
    }

    #[test]
    fn authorization_url_contains_required_params() {
        let client = test_client(Url::parse("http://localhost/token").unwrap());
        let url = client.authorization_url("nonce-1", &["a".into(), "b c".into()]);
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        let get = |key: &str| {
            pairs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("client_id"), Some("client-id"));
        assert_eq!(get("redirect_uri"), Some("http://localhost/callback"));
        assert_eq!(get("response_type"), Some("code"));
        assert_eq!(get("scope"), Some("a b c"));
        assert_eq!(get("state"), Some("nonce-1"));
        assert_eq!(get("access_type"), Some("offline"));
        assert_eq!(get("prompt"), Some("consent"));
        assert!(url.as_str().starts_with("http://localhost/authorize?"));
    }

    #[test]
    fn authorization_url_uses_configured_scopes_by_default() {
        let client = test_client(Url::parse("http://localhost/token").unwrap());
        let url = client.authorization_url("s", &[]);
        assert!(url.query_pairs().any(|(k, v)| k == "scope" && v == "read"));
    }

    #[tokio::test]
    async fn exchange_code_success() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/token")
                .header("content-type", "application/x-www-form-urlencoded")
                .body_contains("grant_type=authorization_code")
                .body_contains("code=abc")
                .body_contains("client_secret=client-secret")
                .body_contains("redirect_uri=http%3A%2F%2Flocalhost%2Fcallback");
            then.status(200).json_body_obj(&serde_json::json!({
                "access_token": "t1",
                "refresh_token": "r1",
                "expires_in": 3600
            }));
        });

        let client = test_client(Url::parse(&server.url("/token")).unwrap());
        let before = Utc::now();
        let tokens = client.exchange_code("abc").await.unwrap();
        mock.assert();
        assert_eq!(tokens.access_token, "t1");
        assert_eq!(tokens.refresh_token.as_deref(), Some("r1"));
        let expires_at = tokens.expires_at.unwrap();
        assert!(expires_at >= before + Duration::seconds(3600));
        assert!(expires_at <= Utc::now() + Duration::seconds(3600));
    }

    #[tokio::test]
    async fn exchange_failure_carries_provider_detail() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/token");
            then.status(400).json_body_obj(&serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Bad Request"
            }));
        });

        let client = test_client(Url::parse(&server.url("/token")).unwrap());
        let err = client.exchange_code("bad").await.unwrap_err();
        mock.assert();
        match err {
            AuthError::TokenExchangeFailed { status, detail } => {
                assert_eq!(status, Some(StatusCode::BAD_REQUEST));
                assert_eq!(detail, "invalid_grant: Bad Request");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn refresh_sends_refresh_grant() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/token")
                .body_contains("grant_type=refresh_token")
                .body_contains("refresh_token=r1")
                .body_contains("client_id=client-id");
            then.status(200).json_body_obj(&serde_json::json!({
                "access_token": "t2",
                "expires_in": 3600
            }));
        });

        let client = test_client(Url::parse(&server.url("/token")).unwrap());
        let tokens = client.refresh("r1").await.unwrap();
        mock.assert();
        assert_eq!(tokens.access_token, "t2");
        assert!(tokens.refresh_token.is_none());
    }

    #[tokio::test]
    async fn refresh_failure_with_plain_body() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/token");
            then.status(401).body("revoked");
        });

        let client = test_client(Url::parse(&server.url("/token")).unwrap());
        let err = client.refresh("r1").await.unwrap_err();
        match err {
            AuthError::RefreshFailed { status, detail } => {
                assert_eq!(status, Some(StatusCode::UNAUTHORIZED));
                assert_eq!(detail, "revoked");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn out_of_range_expires_in_is_rejected() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/token");
            then.status(200).json_body_obj(&serde_json::json!({
                "access_token": "t2",
                "expires_in": i64::MAX
            }));
        });

        let client = test_client(Url::parse(&server.url("/token")).unwrap());
        match client.refresh("r1").await.unwrap_err() {
            AuthError::RefreshFailed { status, detail } => {
                assert_eq!(status, Some(StatusCode::OK));
                assert_eq!(detail, "invalid token response: expires_in out of range");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        match client.exchange_code("abc").await.unwrap_err() {
            AuthError::TokenExchangeFailed { detail, .. } => {
                assert_eq!(detail, "invalid token response: expires_in out of range");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        mock.assert_hits(2);
    }

    #[test]
    fn provider_detail_fallbacks() {
        assert_eq!(provider_detail(r#"{"error":"invalid_client"}"#), "invalid_client");
        assert_eq!(provider_detail("  "), "<no body>");
        assert_eq!(provider_detail("gateway timeout\n"), "gateway timeout");
    }
}
