// backend/src/state.rs

use std::{sync::Arc, time::Duration};
use anyhow::{Context, Result};
use reqwest::Client;
use tracing::{info, warn};

use crate::auth::fake::FakeProvider;
use crate::auth::google::{GoogleEndpoints, GoogleProvider};
use crate::auth::{DeviceFlowService, OAuthProviderDyn};
use crate::clock::{ClockDyn, SystemClock};
use crate::jwt::TokenSigner;
use crate::store::AuthStoreDyn;

// --- Centralized Configuration ---
#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub enable_fake_auth: bool,
    pub oauth_client_id: Option<String>,
    pub oauth_client_secret: Option<String>,
    pub jwt_secret: Option<String>,
    pub cors_allowed_origins: Vec<String>,
    pub provider_timeout: Duration,
    pub request_timeout: Duration,
    /// `None` disables the stale-session reaper.
    pub session_reaper_interval: Option<Duration>,
    pub google: GoogleEndpoints,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let secs = |key: &str, default: u64| {
            non_empty(key).and_then(|v| v.parse::<u64>().ok()).unwrap_or(default)
        };

        let defaults = GoogleEndpoints::default();
        Self {
            port: non_empty("PORT").and_then(|s| s.parse().ok()).unwrap_or(8080),
            enable_fake_auth: get("ENABLE_FAKE_AUTH").is_some(),
            oauth_client_id: non_empty("OAUTH_CLIENT_ID"),
            oauth_client_secret: non_empty("OAUTH_CLIENT_SECRET"),
            jwt_secret: non_empty("JWT_SECRET"),
            cors_allowed_origins: non_empty("CORS_ALLOWED_ORIGINS")
                .map(|s| {
                    s.split(',')
                        .map(|o| o.trim().to_string())
                        .filter(|o| !o.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            provider_timeout: Duration::from_secs(secs("PROVIDER_TIMEOUT_SECS", 30)),
            request_timeout: Duration::from_secs(secs("REQUEST_TIMEOUT_SECS", 60)),
            session_reaper_interval: match secs("SESSION_REAPER_INTERVAL_SECS", 0) {
                0 => None,
                n => Some(Duration::from_secs(n)),
            },
            google: GoogleEndpoints {
                device_auth_url: non_empty("GOOGLE_DEVICE_AUTH_URL").unwrap_or(defaults.device_auth_url),
                token_url: non_empty("GOOGLE_TOKEN_URL").unwrap_or(defaults.token_url),
                userinfo_url: non_empty("GOOGLE_USERINFO_URL").unwrap_or(defaults.userinfo_url),
            },
        }
    }
}

// Secrets stay out of logs.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field("enable_fake_auth", &self.enable_fake_auth)
            .field("oauth_client_id", &self.oauth_client_id)
            .field("oauth_client_secret", &self.oauth_client_secret.as_ref().map(|_| "<redacted>"))
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| "<redacted>"))
            .field("cors_allowed_origins", &self.cors_allowed_origins)
            .field("provider_timeout", &self.provider_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("session_reaper_interval", &self.session_reaper_interval)
            .field("google", &self.google)
            .finish()
    }
}

// --- AppState Definition ---
// Everything inside is Arc-backed, so cloning is cheap.
#[derive(Clone, Debug)]
pub struct AppState {
    pub config: Config,
    pub signer: TokenSigner,
    pub store: AuthStoreDyn,
    pub flow: DeviceFlowService,
}

impl AppState {
    pub fn try_new(config: Config, store: AuthStoreDyn) -> Result<Arc<Self>> {
        let http = Client::builder()
            .user_agent("memoya-server/1.0")
            .timeout(config.provider_timeout)
            .pool_max_idle_per_host(8)
            .build()
            .context("build reqwest client")?;

        let provider = build_provider(&config, http)?;
        Ok(Self::with_parts(config, store, provider, Arc::new(SystemClock)))
    }

    /// Assembles the state from explicit collaborators. The signer is built
    /// once here and shared by the device flow and the auth middleware.
    pub fn with_parts(config: Config, store: AuthStoreDyn, provider: OAuthProviderDyn, clock: ClockDyn) -> Arc<Self> {
        let signer = TokenSigner::from_secret(config.jwt_secret.as_deref(), clock.clone());
        let flow = DeviceFlowService::new(store.clone(), provider, signer.clone(), clock);

        Arc::new(Self {
            config,
            signer,
            store,
            flow,
        })
    }
}

fn build_provider(config: &Config, http: Client) -> Result<OAuthProviderDyn> {
    if config.enable_fake_auth {
        warn!("ENABLE_FAKE_AUTH is set; every device flow will be approved automatically");
        return Ok(FakeProvider::new());
    }

    let client_id = config.oauth_client_id.clone()
        .context("OAUTH_CLIENT_ID is not configured on the server")?;
    let client_secret = config.oauth_client_secret.clone()
        .context("OAUTH_CLIENT_SECRET is not configured on the server")?;

    info!("using Google device flow at {}", config.google.device_auth_url);
    Ok(GoogleProvider::new(http, client_id, client_secret, config.google.clone()))
}
