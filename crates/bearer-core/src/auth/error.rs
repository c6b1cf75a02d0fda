use std::fmt;

use reqwest::StatusCode;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors surfaced by the authorization flow, token lifecycle and request dispatch.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authorization state mismatch")]
    CsrfMismatch,
    #[error("token exchange failed: {}", describe_status(*status, detail))]
    TokenExchangeFailed {
        status: Option<StatusCode>,
        detail: String,
    },
    #[error("no refresh token stored")]
    NoRefreshToken,
    #[error("token refresh failed: {}", describe_status(*status, detail))]
    RefreshFailed {
        status: Option<StatusCode>,
        detail: String,
    },
    #[error("not authorized: no access token stored")]
    NotAuthorized,
    #[error("authentication rejected after token refresh: {0}")]
    AuthenticationFailed(String),
    #[error("API request failed with status {status}: {message}")]
    ApiRequestFailed { status: StatusCode, message: String },
    #[error("authorization request denied ({0})")]
    AccessDenied(String),
    #[error("authorization response missing code parameter")]
    MissingAuthorizationCode,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

fn describe_status(status: Option<StatusCode>, detail: &str) -> String {
    match status {
        Some(status) => format!("{status}: {detail}"),
        None => detail.to_owned(),
    }
}

/// Corrective step a caller should take after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    /// Start the authorization flow again.
    Reauthorize,
    /// The grant lacks permissions for the resource.
    CheckScopes,
    /// The provider or API could not be reached.
    CheckNetwork,
    /// Transient server-side failure; the same call may succeed later.
    Retry,
    /// Nothing automatic will help.
    Abort,
}

impl fmt::Display for NextAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hint = match self {
            NextAction::Reauthorize => "sign in again to obtain new credentials",
            NextAction::CheckScopes => "check that the requested scopes cover this resource",
            NextAction::CheckNetwork => "check your network connection and the provider URLs",
            NextAction::Retry => "try again shortly",
            NextAction::Abort => "fix the request or local configuration",
        };
        f.write_str(hint)
    }
}

impl AuthError {
    /// Recommended corrective action for this failure.
    pub fn next_action(&self) -> NextAction {
        match self {
            AuthError::CsrfMismatch
            | AuthError::NoRefreshToken
            | AuthError::NotAuthorized
            | AuthError::MissingAuthorizationCode
            | AuthError::AuthenticationFailed(_)
            | AuthError::RefreshFailed { .. } => NextAction::Reauthorize,
            AuthError::TokenExchangeFailed { status: None, .. } => NextAction::CheckNetwork,
            AuthError::TokenExchangeFailed { .. } => NextAction::Reauthorize,
            AuthError::AccessDenied(_) => NextAction::CheckScopes,
            AuthError::ApiRequestFailed { status, .. } => match *status {
                StatusCode::FORBIDDEN => NextAction::CheckScopes,
                StatusCode::TOO_MANY_REQUESTS => NextAction::Retry,
                s if s.is_server_error() => NextAction::Retry,
                _ => NextAction::Abort,
            },
            AuthError::Http(_) => NextAction::CheckNetwork,
            AuthError::InvalidRequest(_)
            | AuthError::Config(_)
            | AuthError::Io(_)
            | AuthError::Serde(_)
            | AuthError::Url(_) => NextAction::Abort,
        }
    }

    /// Whether the stored credentials can no longer be used.
    pub fn requires_reauthorization(&self) -> bool {
        self.next_action() == NextAction::Reauthorize
    }
}
