// backend/src/auth/provider.rs

use std::sync::Arc;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::DeviceFlowResponse;

/// What the provider's identity endpoint told us. Only `subject_id` is kept
/// past the login; the rest is dropped once the user is resolved.
#[derive(Clone, Debug, Serialize)]
pub struct ProviderIdentity {
    pub subject_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
}

/// Result of one token-endpoint exchange for a device code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenExchange {
    Granted { access_token: String },
    Pending,
    SlowDown,
    /// `access_denied`, `expired_token` or any other error code.
    Rejected { error: String },
}

impl TokenExchange {
    /// Maps an RFC 8628 error code onto an exchange outcome.
    pub fn from_error_code(code: &str) -> Self {
        match code {
            "authorization_pending" => Self::Pending,
            "slow_down" => Self::SlowDown,
            other => Self::Rejected { error: other.to_string() },
        }
    }
}

// Any type implementing OAuthProvider must also implement Debug, Send, and Sync.
#[async_trait]
pub trait OAuthProvider: std::fmt::Debug + Send + Sync {
    fn id(&self) -> &'static str;

    async fn request_device_code(&self) -> anyhow::Result<DeviceFlowResponse>;

    async fn exchange_device_code(&self, device_code: &str) -> anyhow::Result<TokenExchange>;

    async fn fetch_identity(&self, access_token: &str) -> anyhow::Result<ProviderIdentity>;
}

pub type OAuthProviderDyn = Arc<dyn OAuthProvider>;
