//! OAuth 2.0 authorization-code client: obtains, persists and refreshes bearer tokens and
//! applies them to outbound API calls.

pub mod auth;
pub mod client;
pub mod config;
pub mod http;

pub use client::{AuthClient, AuthClientBuilder};

pub(crate) const USER_AGENT: &str = concat!("bearer/", env!("CARGO_PKG_VERSION"));
