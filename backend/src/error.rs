// backend/src/error.rs

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::models::InvalidTransition;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("OAuth provider unavailable: {0}")]
    ProviderUnavailable(#[source] anyhow::Error),

    /// Not a failure: the user has not approved the device yet.
    #[error("authorization pending")]
    AuthorizationPending,

    #[error("device auth session not found")]
    SessionNotFound,

    #[error("device auth session expired")]
    SessionExpired,

    #[error("token exchange failed: {0}")]
    TokenExchangeFailed(String),

    #[error("invalid token")]
    InvalidToken,

    #[error("token expired")]
    ExpiredToken,

    #[error("missing or malformed authorization header")]
    MissingCredential,

    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),

    #[error(transparent)]
    Transition(#[from] InvalidTransition),

    #[error("{message}")]
    BadRequest { code: &'static str, message: String },

    #[error("request timed out")]
    Timeout,

    #[error("internal error: {0}")]
    Internal(#[source] anyhow::Error),
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::ProviderUnavailable(_) => "EXTERNAL_SERVICE_ERROR",
            Self::AuthorizationPending => "AUTHORIZATION_PENDING",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::SessionExpired => "SESSION_EXPIRED",
            Self::TokenExchangeFailed(_) => "TOKEN_EXCHANGE_FAILED",
            Self::InvalidToken | Self::ExpiredToken | Self::MissingCredential => "AUTHENTICATION_ERROR",
            Self::Persistence(_) => "DATABASE_ERROR",
            Self::Transition(_) => "CONFLICT",
            Self::BadRequest { code, .. } => *code,
            Self::Timeout => "TIMEOUT",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::ProviderUnavailable(_) => StatusCode::BAD_GATEWAY,
            Self::AuthorizationPending => StatusCode::ACCEPTED,
            Self::SessionNotFound => StatusCode::NOT_FOUND,
            Self::SessionExpired => StatusCode::GONE,
            Self::TokenExchangeFailed(_) => StatusCode::FORBIDDEN,
            Self::InvalidToken | Self::ExpiredToken | Self::MissingCredential => StatusCode::UNAUTHORIZED,
            Self::Persistence(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Transition(_) => StatusCode::CONFLICT,
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Timeout => StatusCode::REQUEST_TIMEOUT,
        }
    }

    /// Authentication rejections share one message so callers cannot tell a bad
    /// signature from an expired token.
    fn public_message(&self) -> String {
        match self {
            Self::InvalidToken | Self::ExpiredToken => "invalid or expired token".into(),
            Self::Persistence(_) | Self::Internal(_) => "internal server error".into(),
            Self::ProviderUnavailable(_) => "authentication provider unavailable".into(),
            other => other.to_string(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest { code: "BAD_REQUEST", message: message.into() }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = ?self, "request failed");
        }
        let body = json!({
            "success": false,
            "error": self.public_message(),
            "code": self.code(),
        });
        (status, Json(body)).into_response()
    }
}
