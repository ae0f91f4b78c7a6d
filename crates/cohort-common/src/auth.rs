//! Process-wide authentication state.
//!
//! A single bearer token is shared by every client in the process.
//! The token is read when the headers of each request are built,
//! so a token set after a client is created still applies to its later calls.

use std::sync::RwLock;

use log::debug;

static AUTH_TOKEN: RwLock<Option<String>> = RwLock::new(None);

/// Sets the bearer token for all subsequent requests.
/// An empty token clears the state.
pub fn set_auth_token(token: impl Into<String>) {
    let token = token.into();
    let value = if token.is_empty() { None } else { Some(token) };
    debug!("auth token {}", if value.is_some() { "set" } else { "cleared" });
    let mut state = AUTH_TOKEN.write().unwrap_or_else(|e| e.into_inner());
    *state = value;
}

pub fn clear_auth_token() {
    let mut state = AUTH_TOKEN.write().unwrap_or_else(|e| e.into_inner());
    *state = None;
}

/// Returns the current bearer token, or `None` if requests should go out
/// without an `Authorization` header.
pub fn auth_token() -> Option<String> {
    AUTH_TOKEN
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .clone()
}
