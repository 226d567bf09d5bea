// backend/src/routes/auth.rs

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderMap},
    middleware,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

use crate::auth::middleware::bearer_token;
use crate::auth::{require_auth, AuthenticatedUser, PollOutcome};
use crate::error::AuthError;
use crate::models::*;
use crate::state::AppState;
use crate::store::StoreError;

pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let protected = Router::new()
        .route("/refresh", post(refresh))
        .route("/me", get(me))
        .route("/account", delete(delete_account))
        .route_layer(middleware::from_fn_with_state(state, require_auth));

    Router::new()
        .route("/device", post(device_start))
        .route("/poll", post(poll))
        .merge(protected)
}

/// Initiates the device flow authentication process.
///
/// # Returns
/// * `200 OK` with the device code, user code and verification address.
/// * `502 Bad Gateway` if the OAuth provider could not be reached.
/// * `500 Internal Server Error` if the session could not be stored.
pub async fn device_start(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, AuthError> {
    let start = with_deadline(state.config.request_timeout, state.flow.start_flow()).await?;
    Ok(envelope(true, start, "Device flow started successfully"))
}

/// Polls the status of a pending device flow authentication.
///
/// # Arguments
/// * `q` - JSON body containing the device code.
///
/// # Returns
/// * `200 OK` with `data.status` of `pending` (keep polling), `authorized`
///   (token issued), or `denied`/`expired` (start over, `success: false`).
/// * `404 Not Found` if the device code is unknown.
/// * `502 Bad Gateway` if the OAuth provider could not be reached.
pub async fn poll(
    State(state): State<Arc<AppState>>,
    body: Result<Json<PollQuery>, JsonRejection>,
) -> Result<Json<Value>, AuthError> {
    let Json(q) = body.map_err(|_| AuthError::bad_request("Invalid JSON format"))?;
    if q.device_code.trim().is_empty() {
        return Err(AuthError::bad_request("device_code is required"));
    }

    let outcome = with_deadline(state.config.request_timeout, state.flow.poll_flow(&q.device_code)).await?;
    let status = outcome.status();
    let mut out = PollOut {
        status,
        access_token: None,
        user: None,
        slow_down: None,
        interval: None,
        expires_in: None,
        reason: None,
    };

    let message = match outcome {
        PollOutcome::Pending { slow_down, interval, expires_in } => {
            out.slow_down = Some(slow_down);
            out.interval = Some(interval);
            out.expires_in = Some(expires_in);
            "Waiting for user authorization"
        }
        PollOutcome::Authorized { user, token } => {
            out.access_token = Some(token);
            out.user = Some(user.into());
            "Authentication successful"
        }
        PollOutcome::Denied { reason } => {
            out.reason = Some(reason);
            "Authentication failed; start a new device flow"
        }
        PollOutcome::Expired => "Device code expired; start a new device flow",
    };
    Ok(envelope(!status.is_terminal(), out, message))
}

/// Exchanges the presented token for a fresh one.
///
/// # Returns
/// * `200 OK` with a new access token.
/// * `401 Unauthorized` if the token is missing, invalid or expired, or the
///   account behind it has been deleted.
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    headers: HeaderMap,
) -> Result<Json<Value>, AuthError> {
    current_user(&state, &user.user_id).await?;
    let header = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok());
    let access_token = state.signer.refresh(bearer_token(header)?)?;
    Ok(envelope(true, RefreshOut { access_token }, "Token refreshed"))
}

/// Returns the current user.
///
/// # Returns
/// * `200 OK` with the public user record.
/// * `401 Unauthorized` if the token is bad or the account no longer exists.
pub async fn me(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<Json<Value>, AuthError> {
    let user = current_user(&state, &user.user_id).await?;
    Ok(envelope(true, UserInfo::from(user), "User info retrieved successfully"))
}

/// Deletes the current user's account. Requires `{"confirm": true}`.
pub async fn delete_account(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    body: Result<Json<AccountDeleteIn>, JsonRejection>,
) -> Result<Json<Value>, AuthError> {
    let Json(inp) = body.map_err(|_| AuthError::bad_request("Invalid JSON format"))?;
    if inp.confirm != Some(true) {
        return Err(AuthError::BadRequest {
            code: "CONFIRMATION_REQUIRED",
            message: "Account deletion requires confirmation".into(),
        });
    }

    match state.store.delete_user(&user.user_id).await {
        Ok(()) => {}
        Err(StoreError::NotFound) => return Err(AuthError::InvalidToken),
        Err(e) => return Err(e.into()),
    }

    info!("deleted account {}", user.user_id);
    Ok(Json(json!({ "success": true, "message": "Account deleted successfully" })))
}

// A token outliving its account is treated like any other bad token.
async fn current_user(state: &AppState, user_id: &str) -> Result<User, AuthError> {
    match state.store.get_user(user_id).await {
        Ok(user) => Ok(user),
        Err(StoreError::NotFound) => Err(AuthError::InvalidToken),
        Err(e) => Err(e.into()),
    }
}

fn envelope<T: Serialize>(success: bool, data: T, message: &str) -> Json<Value> {
    Json(json!({
        "success": success,
        "data": data,
        "message": message,
    }))
}

// Bounds work done on behalf of a request, provider round-trips included.
async fn with_deadline<T>(
    limit: Duration,
    work: impl Future<Output = Result<T, AuthError>>,
) -> Result<T, AuthError> {
    tokio::time::timeout(limit, work)
        .await
        .map_err(|_| AuthError::Timeout)?
}
