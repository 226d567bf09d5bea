// backend/src/auth/middleware.rs

use std::sync::Arc;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use crate::error::AuthError;
use crate::jwt::TokenSigner;
use crate::state::AppState;

/// Identity attached to a request by [`require_auth`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: String,
}

/// Pulls the token out of an `Authorization: Bearer <token>` value.
pub fn bearer_token(header: Option<&str>) -> Result<&str, AuthError> {
    let value = header.ok_or(AuthError::MissingCredential)?;
    let (scheme, token) = value.split_once(' ').ok_or(AuthError::MissingCredential)?;
    let token = token.trim();
    if scheme != "Bearer" || token.is_empty() {
        return Err(AuthError::MissingCredential);
    }
    Ok(token)
}

/// Resolves a raw Authorization header value to a user id.
pub fn authenticate(signer: &TokenSigner, header: Option<&str>) -> Result<String, AuthError> {
    let token = bearer_token(header)?;
    signer.validate(token)
}

/// Gate for protected routes. The rejection body never says why a token failed.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    let user_id = authenticate(&state.signer, header).map_err(|e| {
        debug!("rejected request to {}: {}", req.uri().path(), e);
        e
    })?;

    req.extensions_mut().insert(AuthenticatedUser { user_id });
    Ok(next.run(req).await)
}

// --- AXUM 0.8 EXTRACTOR ---
// A handler that asks for an identity on a route without `require_auth` gets a
// 401, never an anonymous caller.

impl<S: Send + Sync> FromRequestParts<S> for AuthenticatedUser {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .filter(|user| !user.user_id.is_empty())
            .cloned()
            .ok_or(AuthError::MissingCredential)
    }
}
