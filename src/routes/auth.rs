//! Auth routes: bearer extractor and identity lookup.

use axum::extract::FromRef;
use axum::http::StatusCode;
use axum::response::Json;
use tracing::warn;

use crate::protocol::Actor;
use crate::services::auth::{self as auth_svc, AuthError, Identity};
use crate::state::AppState;

// =============================================================================
// AUTH EXTRACTOR
// =============================================================================

/// Authenticated caller extracted from the `Authorization: Bearer` header.
/// Use as a handler parameter to require authentication.
pub struct AuthUser {
    pub identity: Identity,
}

impl<S> axum::extract::FromRequestParts<S> for AuthUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut axum::http::request::Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        let token = auth_svc::bearer_token(&parts.headers);
        let identity = auth_svc::authenticate(app_state.verifier.as_ref(), token.as_deref())
            .await
            .map_err(auth_error_to_status)?;
        Ok(Self { identity })
    }
}

pub(crate) fn auth_error_to_status(err: AuthError) -> StatusCode {
    match err {
        AuthError::MissingToken | AuthError::InvalidToken => StatusCode::UNAUTHORIZED,
        AuthError::Store(e) => {
            warn!(error = %e, "auth: token lookup failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

// =============================================================================
// HANDLERS
// =============================================================================

/// `GET /api/auth/me`: the authenticated caller.
pub async fn me(auth: AuthUser) -> Json<Actor> {
    Json(auth.identity.actor())
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
