// backend/src/lib.rs

pub mod auth;
pub mod clock;
pub mod error;
pub mod jwt;
pub mod models;
pub mod routes;
pub mod state;
pub mod store;

use std::sync::Arc;
use std::time::Duration;
use axum::{
    http::{header, HeaderValue, Method},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::warn;

use crate::state::AppState;

/// Builds the full HTTP application around an already assembled state.
pub fn app_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.cors_allowed_origins);

    Router::new()
        .nest("/auth", routes::auth::router(state.clone()))
        .merge(routes::health::router())
        // Each clone of the Arc points at the same AppState.
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Permissive when no origins are configured (local development).
fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("ignoring invalid CORS origin '{}'", o);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::ACCEPT, header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
        .max_age(Duration::from_secs(300))
}
