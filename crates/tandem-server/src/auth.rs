//! Upgrade authentication.
//!
//! Sessions are authenticated once, before the WebSocket upgrade. The token
//! comes from `Authorization: Bearer <token>` or the `token` query
//! parameter; the header wins when both are present.

use axum::http::{header, HeaderMap};
use std::collections::HashMap;
use tandem_core::UserId;
use thiserror::Error;

/// Authentication errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing access token")]
    MissingToken,

    #[error("Invalid access token")]
    InvalidToken,
}

/// Resolves access tokens to user ids.
pub trait TokenVerifier: Send + Sync {
    /// # Errors
    ///
    /// Returns `InvalidToken` if the token is unknown or expired.
    fn verify(&self, token: &str) -> Result<UserId, AuthError>;
}

/// Verifier backed by a fixed token table from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, UserId>,
}

impl StaticTokenVerifier {
    #[must_use]
    pub fn new(tokens: HashMap<String, UserId>) -> Self {
        Self { tokens }
    }
}

impl TokenVerifier for StaticTokenVerifier {
    fn verify(&self, token: &str) -> Result<UserId, AuthError> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or(AuthError::InvalidToken)
    }
}

/// Pull the access token out of the request.
///
/// # Errors
///
/// Returns `MissingToken` if neither the header nor the query carries one.
pub fn extract_token(headers: &HeaderMap, query: &HashMap<String, String>) -> Result<String, AuthError> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());

    if let Some(token) = bearer {
        return Ok(token.to_string());
    }

    query
        .get("token")
        .filter(|t| !t.is_empty())
        .cloned()
        .ok_or(AuthError::MissingToken)
}

/// Check the `Origin` header against the allow list.
///
/// Requests without an `Origin` header are not browser requests and are
/// allowed.
#[must_use]
pub fn origin_allowed(headers: &HeaderMap, allowed: &[String]) -> bool {
    let Some(origin) = headers.get(header::ORIGIN) else {
        return true;
    };
    let Ok(origin) = origin.to_str() else {
        return false;
    };
    allowed.iter().any(|a| a == "*" || a.eq_ignore_ascii_case(origin))
}
