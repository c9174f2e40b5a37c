//! Auth gate: bearer token verification at connection time.
//!
//! ARCHITECTURE
//! ============
//! Token verification is a black box behind `TokenVerifier`. Production uses
//! `SessionVerifier`, which resolves opaque session tokens through the store;
//! tests plug in `StaticVerifier`. The websocket upgrade and the REST
//! extractor both go through `authenticate`.
//!
//! Failure is connection-fatal: the caller refuses the upgrade and emits no
//! event. Nothing here touches presence.

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use rand::Rng;
use uuid::Uuid;

use crate::db::models::{DAY_MS, User, now_ms};
use crate::db::{Store, StoreError};
use crate::protocol::Actor;

/// Session lifetime for tokens minted by `create_session`.
pub const SESSION_TTL_MS: i64 = 30 * DAY_MS;

// =============================================================================
// TYPES
// =============================================================================

/// Authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub email: String,
    pub name: String,
}

impl Identity {
    #[must_use]
    pub fn actor(&self) -> Actor {
        Actor { id: self.user_id, email: self.email.clone(), name: self.name.clone() }
    }
}

impl From<User> for Identity {
    fn from(user: User) -> Self {
        Self { user_id: user.id, email: user.email, name: user.name }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("invalid or expired token")]
    InvalidToken,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl crate::protocol::ErrorCode for AuthError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::MissingToken => "E_MISSING_TOKEN",
            Self::InvalidToken => "E_INVALID_TOKEN",
            Self::Store(_) => "E_DATABASE",
        }
    }
}

// =============================================================================
// VERIFIERS
// =============================================================================

#[async_trait::async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError>;
}

/// Resolves session tokens against the `sessions` table.
pub struct SessionVerifier {
    store: Arc<dyn Store>,
}

impl SessionVerifier {
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl TokenVerifier for SessionVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        self.store
            .find_session_user(token, now_ms())
            .await?
            .map(Identity::from)
            .ok_or(AuthError::InvalidToken)
    }
}

/// Fixed token table. For tests and local tooling.
#[derive(Default)]
pub struct StaticVerifier {
    tokens: HashMap<String, Identity>,
}

impl StaticVerifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>, identity: Identity) -> Self {
        self.tokens.insert(token.into(), identity);
        self
    }
}

#[async_trait::async_trait]
impl TokenVerifier for StaticVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        self.tokens.get(token).cloned().ok_or(AuthError::InvalidToken)
    }
}

// =============================================================================
// GATE
// =============================================================================

/// Verify a raw token. Empty or absent tokens never reach the verifier.
///
/// # Errors
///
/// `MissingToken` when no token was presented, `InvalidToken` when the
/// verifier rejects it, `Store` when the lookup itself failed.
pub async fn authenticate(verifier: &dyn TokenVerifier, raw_token: Option<&str>) -> Result<Identity, AuthError> {
    let token = raw_token.map(str::trim).filter(|t| !t.is_empty());
    let Some(token) = token else {
        return Err(AuthError::MissingToken);
    };
    verifier.verify(token).await
}

/// Pull the token from the `token` query parameter, falling back to an
/// `Authorization: Bearer` header.
#[must_use]
pub fn extract_token(query: &HashMap<String, String>, headers: &HeaderMap) -> Option<String> {
    if let Some(token) = query.get("token").filter(|t| !t.is_empty()) {
        return Some(token.clone());
    }
    bearer_token(headers)
}

/// Token from an `Authorization: Bearer <token>` header.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_owned())
}

// =============================================================================
// TOKENS
// =============================================================================

pub(crate) fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// Generate a cryptographically random 32-byte hex token.
#[must_use]
pub fn generate_token() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    bytes_to_hex(&bytes)
}

/// Create a session for the given user, returning the token.
///
/// # Errors
///
/// Returns a store error if the session row cannot be written.
pub async fn create_session(store: &dyn Store, user_id: Uuid) -> Result<String, StoreError> {
    let token = generate_token();
    store.insert_session(&token, user_id, now_ms() + SESSION_TTL_MS).await?;
    Ok(token)
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
