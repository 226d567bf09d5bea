// backend/src/auth/fake.rs

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use async_trait::async_trait;
use uuid::Uuid;

use crate::auth::provider::{OAuthProvider, ProviderIdentity, TokenExchange};
use crate::models::DeviceFlowResponse;

pub const FAKE_SUBJECT: &str = "fake-user-id-456";
const FAKE_ACCESS_TOKEN: &str = "fake-access-token";

/// Provider for local runs and CI: every device code is approved on the first
/// exchange and maps to the same external subject.
#[derive(Debug, Default)]
pub struct FakeProvider {
    exchanges: AtomicUsize,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of token-endpoint exchanges performed so far.
    pub fn exchanges(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OAuthProvider for FakeProvider {
    fn id(&self) -> &'static str {
        "fake"
    }

    async fn request_device_code(&self) -> anyhow::Result<DeviceFlowResponse> {
        Ok(DeviceFlowResponse {
            device_code: format!("fake-device-code-{}", Uuid::new_v4()),
            user_code: "FAKE-CODE".into(),
            verification_uri: "http://localhost/fake-verify".into(),
            expires_in: 300,
            interval: 1, // Fast polling for CI
        })
    }

    async fn exchange_device_code(&self, _device_code: &str) -> anyhow::Result<TokenExchange> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        Ok(TokenExchange::Granted {
            access_token: FAKE_ACCESS_TOKEN.into(),
        })
    }

    async fn fetch_identity(&self, access_token: &str) -> anyhow::Result<ProviderIdentity> {
        anyhow::ensure!(access_token == FAKE_ACCESS_TOKEN, "unknown fake access token");
        Ok(ProviderIdentity {
            subject_id: FAKE_SUBJECT.into(),
            email: Some("ci@test.local".into()),
            name: Some("ci-test-user".into()),
        })
    }
}
