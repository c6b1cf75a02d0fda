use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Seconds subtracted from the recorded expiry when deciding whether a token is still usable.
pub const DEFAULT_EXPIRY_BUFFER_SECS: i64 = 60;

/// The persisted credential set. Always replaced as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Real expiry of `access_token`; the safety buffer is never folded in.
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenSet {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
            expires_at,
        }
    }

    /// Token set whose expiry is `expires_in` seconds after `received_at`.
    ///
    /// `None` when the expiry is not representable as a timestamp.
    pub fn issued_at(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_in: i64,
        received_at: DateTime<Utc>,
    ) -> Option<Self> {
        let expires_at = Duration::try_seconds(expires_in)
            .and_then(|lifetime| received_at.checked_add_signed(lifetime))?;
        Some(Self::new(access_token, refresh_token, Some(expires_at)))
    }

    /// Expired if no expiry is recorded or `now` has reached `expires_at - buffer`.
    pub fn is_expired_at(&self, now: DateTime<Utc>, buffer: Duration) -> bool {
        match self.expires_at {
            Some(ts) => ts
                .checked_sub_signed(buffer)
                .map_or(true, |deadline| now >= deadline),
            None => true,
        }
    }

    pub fn is_expired(&self, buffer: Duration) -> bool {
        self.is_expired_at(Utc::now(), buffer)
    }
}

/// Where the client stands in the authorization round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    Unauthenticated,
    AwaitingCallback,
    Authenticated,
}

impl std::fmt::Display for AuthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = match self {
            AuthStatus::Unauthenticated => "unauthenticated",
            AuthStatus::AwaitingCallback => "awaiting-callback",
            AuthStatus::Authenticated => "authenticated",
        };
        write!(f, "{value}")
    }
}
