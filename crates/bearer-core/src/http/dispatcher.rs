use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::auth::{AuthError, TokenLifecycle};

/// Re-sends allowed after a 401; any other status is final.
const MAX_AUTH_RETRIES: u32 = 1;

/// One outbound API call.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub endpoint: String,
    pub method: Method,
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
}

impl RequestDescriptor {
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            method,
            body: None,
            headers: vec![],
        }
    }

    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(Method::GET, endpoint)
    }

    pub fn post(endpoint: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, endpoint).with_json(body)
    }

    pub fn with_json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    fn sends_body(&self) -> bool {
        matches!(self.method, Method::POST | Method::PUT | Method::PATCH)
    }
}

/// Sends requests with the current bearer token, recovering once from a rejected token.
#[derive(Clone)]
pub struct RequestDispatcher {
    http: Client,
    lifecycle: Arc<TokenLifecycle>,
}

impl RequestDispatcher {
    pub fn new(http: Client, lifecycle: Arc<TokenLifecycle>) -> Self {
        Self { http, lifecycle }
    }

    /// Issue `descriptor` and return the decoded response body.
    ///
    /// Empty bodies decode to `Value::Null`; bodies that are not JSON come back as `Value::String`.
    pub async fn make_request(&self, descriptor: &RequestDescriptor) -> Result<Value, AuthError> {
        let url = Url::parse(&descriptor.endpoint)?;
        let headers = caller_headers(&descriptor.headers)?;
        let mut token = self.lifecycle.ensure_valid().await?;
        let mut retries = 0;

        loop {
            let response = match self.send(descriptor, &url, &headers, &token).await {
                Ok(response) => response,
                Err(err) if retries > 0 => {
                    return Err(AuthError::AuthenticationFailed(format!(
                        "retry after refresh failed: {err}"
                    )))
                }
                Err(err) => return Err(err),
            };
            let status = response.status();
            debug!(method = %descriptor.method, endpoint = %url, %status, "API response");

            if status == StatusCode::UNAUTHORIZED {
                if retries >= MAX_AUTH_RETRIES {
                    warn!(endpoint = %url, "request still unauthorized after refresh");
                    return Err(AuthError::AuthenticationFailed(
                        "request still unauthorized after refreshing the access token".into(),
                    ));
                }
                retries += 1;
                info!(endpoint = %url, "request unauthorized, refreshing token and retrying");
                token = self
                    .lifecycle
                    .refresh_after(&token)
                    .await
                    .map_err(|err| AuthError::AuthenticationFailed(err.to_string()))?
                    .access_token;
                continue;
            }

            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                let message = match text.trim() {
                    "" => status.canonical_reason().unwrap_or_default().to_owned(),
                    trimmed => trimmed.to_owned(),
                };
                return Err(AuthError::ApiRequestFailed { status, message });
            }

            return decode_body(response).await;
        }
    }

    /// Like [`make_request`](Self::make_request), deserializing the body into `T`.
    pub async fn make_request_as<T>(&self, descriptor: &RequestDescriptor) -> Result<T, AuthError>
    where
        T: DeserializeOwned,
    {
        let value = self.make_request(descriptor).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn send(
        &self,
        descriptor: &RequestDescriptor,
        url: &Url,
        headers: &HeaderMap,
        token: &str,
    ) -> Result<Response, AuthError> {
        let mut headers = headers.clone();
        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| AuthError::InvalidRequest("access token is not a valid header".into()))?;
        headers.insert(AUTHORIZATION, bearer);

        let mut request = self
            .http
            .request(descriptor.method.clone(), url.clone())
            .headers(headers);
        if descriptor.sends_body() {
            if let Some(body) = &descriptor.body {
                request = request.json(body);
            }
        }
        Ok(request.send().await?)
    }
}

fn caller_headers(pairs: &[(String, String)]) -> Result<HeaderMap, AuthError> {
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| AuthError::InvalidRequest(format!("invalid header name '{name}'")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| AuthError::InvalidRequest(format!("invalid value for header '{name}'")))?;
        headers.append(name, value);
    }
    Ok(headers)
}

async fn decode_body(response: Response) -> Result<Value, AuthError> {
    let bytes = response.bytes().await?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned())))
}
