// backend/tests/common/mod.rs
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{body::Body, http::Request, response::Response, Router};
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::Value;

use memoya_backend::app_router;
use memoya_backend::auth::{OAuthProvider, ProviderIdentity, TokenExchange};
use memoya_backend::clock::ManualClock;
use memoya_backend::models::DeviceFlowResponse;
use memoya_backend::state::{AppState, Config};
use memoya_backend::store::MemoryStore;

pub const JWT_SECRET: &str = "api-test-secret";
pub const SUBJECT: &str = "google-subject-1";

/// Provider whose token-endpoint answers are queued up by the test.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    answers: Mutex<VecDeque<TokenExchange>>,
    starts: AtomicUsize,
    exchanges: AtomicUsize,
    pub unavailable: AtomicBool,
    /// Makes device code requests hang for a minute.
    pub stalled: AtomicBool,
}

impl ScriptedProvider {
    pub fn answer(&self, outcome: TokenExchange) {
        self.answers.lock().unwrap().push_back(outcome);
    }

    pub fn grant(&self) {
        self.answer(TokenExchange::Granted { access_token: "provider-token".into() });
    }

    pub fn exchanges(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OAuthProvider for ScriptedProvider {
    fn id(&self) -> &'static str {
        "scripted"
    }

    async fn request_device_code(&self) -> anyhow::Result<DeviceFlowResponse> {
        anyhow::ensure!(!self.unavailable.load(Ordering::SeqCst), "connection refused");
        if self.stalled.load(Ordering::SeqCst) {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        }
        let n = self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(DeviceFlowResponse {
            device_code: format!("device-code-{}", n),
            user_code: "ABCD-EFGH".into(),
            verification_uri: "https://www.google.com/device".into(),
            expires_in: 600,
            interval: 5,
        })
    }

    async fn exchange_device_code(&self, _device_code: &str) -> anyhow::Result<TokenExchange> {
        anyhow::ensure!(!self.unavailable.load(Ordering::SeqCst), "connection refused");
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(TokenExchange::Pending))
    }

    async fn fetch_identity(&self, _access_token: &str) -> anyhow::Result<ProviderIdentity> {
        Ok(ProviderIdentity {
            subject_id: SUBJECT.into(),
            email: Some("someone@example.com".into()),
            name: None,
        })
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub provider: Arc<ScriptedProvider>,
    pub store: Arc<MemoryStore>,
    pub clock: ManualClock,
}

pub fn test_app() -> TestApp {
    test_app_with(&[])
}

/// Like [`test_app`], with extra environment variables layered on top.
pub fn test_app_with(vars: &[(&str, &str)]) -> TestApp {
    let config = Config::from_lookup(|key| match key {
        "JWT_SECRET" => Some(JWT_SECRET.to_string()),
        _ => vars.iter().find(|(k, _)| *k == key).map(|(_, v)| v.to_string()),
    });
    let store = Arc::new(MemoryStore::new());
    let provider = Arc::new(ScriptedProvider::default());
    let clock = ManualClock::new(Utc::now());

    let state = AppState::with_parts(config, store.clone(), provider.clone(), Arc::new(clock.clone()));
    TestApp {
        router: app_router(state.clone()),
        state,
        provider,
        store,
        clock,
    }
}

pub fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn with_bearer(method: &str, uri: &str, token: &str) -> axum::http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {}", token))
}

pub async fn body_json(response: Response) -> Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}
