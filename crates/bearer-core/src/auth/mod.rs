mod error;
mod flow;
mod lifecycle;
mod nonce;
mod oauth;
mod secret;
mod token;
mod token_store;

pub use error::{AuthError, NextAction};
pub use flow::{AuthorizationFlow, CallbackParams};
pub use lifecycle::TokenLifecycle;
pub use nonce::{generate_nonce, FileNonceStore, MemoryNonceStore, NonceStore};
pub use oauth::{OAuthClient, OAuthConfig, OAuthEndpoints};
pub use secret::{Credentials, Secret};
pub use token::{AuthStatus, TokenSet, DEFAULT_EXPIRY_BUFFER_SECS};
pub use token_store::{FileTokenStore, MemoryTokenStore, TokenStore};
