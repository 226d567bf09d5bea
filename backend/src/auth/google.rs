// backend/src/auth/google.rs

use std::sync::Arc;
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::auth::provider::{OAuthProvider, OAuthProviderDyn, ProviderIdentity, TokenExchange};
use crate::models::DeviceFlowResponse;

pub const DEFAULT_DEVICE_AUTH_URL: &str = "https://oauth2.googleapis.com/device/code";
pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const DEFAULT_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

const DEVICE_SCOPE: &str = "openid email profile";
const DEVICE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";

#[derive(Clone, Debug)]
pub struct GoogleEndpoints {
    pub device_auth_url: String,
    pub token_url: String,
    pub userinfo_url: String,
}

impl Default for GoogleEndpoints {
    fn default() -> Self {
        Self {
            device_auth_url: DEFAULT_DEVICE_AUTH_URL.into(),
            token_url: DEFAULT_TOKEN_URL.into(),
            userinfo_url: DEFAULT_USERINFO_URL.into(),
        }
    }
}

#[derive(Debug)]
pub struct GoogleProvider {
    client_id: String,
    client_secret: String,
    endpoints: GoogleEndpoints,
    http: Client,
}

impl GoogleProvider {
    pub fn new(
        http: Client,
        client_id: String,
        client_secret: String,
        endpoints: GoogleEndpoints,
    ) -> OAuthProviderDyn {
        Arc::new(Self {
            client_id,
            client_secret,
            endpoints,
            http,
        })
    }
}

#[async_trait]
impl OAuthProvider for GoogleProvider {
    fn id(&self) -> &'static str {
        "google"
    }

    async fn request_device_code(&self) -> anyhow::Result<DeviceFlowResponse> {
        let params = [
            ("client_id", self.client_id.as_str()),
            ("scope", DEVICE_SCOPE),
        ];

        let out: DeviceCodeOut = self.http
            .post(&self.endpoints.device_auth_url)
            .header("Accept", "application/json")
            .form(&params)
            .send()
            .await
            .context("request device code")?
            .error_for_status()
            .context("device code endpoint")?
            .json()
            .await
            .context("decode device code response")?;

        Ok(DeviceFlowResponse {
            device_code: out.device_code,
            user_code: out.user_code,
            verification_uri: out.verification_uri,
            expires_in: out.expires_in,
            interval: out.interval.unwrap_or(5),
        })
    }

    async fn exchange_device_code(&self, device_code: &str) -> anyhow::Result<TokenExchange> {
        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("device_code", device_code),
            ("grant_type", DEVICE_GRANT_TYPE),
        ];

        let resp = self.http
            .post(&self.endpoints.token_url)
            .header("Accept", "application/json")
            .form(&params)
            .send()
            .await
            .context("poll token endpoint")?;

        // Google reports pending/denied with 4xx and a JSON error body, so only
        // server errors are treated as the provider being unavailable.
        let status = resp.status();
        if status.is_server_error() {
            return Err(anyhow!("token endpoint returned {}", status));
        }

        let body = resp.text().await.context("read token response")?;
        match serde_json::from_str::<DeviceTokenOut>(&body) {
            Ok(DeviceTokenOut::Ok { access_token }) => Ok(TokenExchange::Granted { access_token }),
            Ok(DeviceTokenOut::Err { error, error_description }) => {
                debug!("token endpoint answered '{}' ({:?})", error, error_description);
                Ok(TokenExchange::from_error_code(&error))
            }
            Err(e) => Err(anyhow!("unexpected token response ({}): {}", status, e)),
        }
    }

    async fn fetch_identity(&self, access_token: &str) -> anyhow::Result<ProviderIdentity> {
        let user = self.http
            .get(&self.endpoints.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .context("request userinfo")?
            .error_for_status()
            .context("userinfo endpoint")?
            .json::<GoogleUser>()
            .await
            .context("decode userinfo response")?;

        if user.id.is_empty() {
            return Err(anyhow!("userinfo response carried an empty subject"));
        }

        Ok(ProviderIdentity {
            subject_id: user.id,
            email: user.email,
            name: user.name,
        })
    }
}

// --- DTOs for Google OAuth ---

#[derive(Deserialize)]
struct DeviceCodeOut {
    device_code: String,
    user_code: String,
    #[serde(alias = "verification_url")]
    verification_uri: String,
    expires_in: u64,
    interval: Option<u64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DeviceTokenOut {
    Ok {
        access_token: String,
    },
    Err {
        error: String,
        error_description: Option<String>,
    },
}

#[derive(Deserialize)]
struct GoogleUser {
    #[serde(alias = "sub")]
    id: String,
    email: Option<String>,
    name: Option<String>,
}
